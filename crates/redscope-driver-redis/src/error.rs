//! Mapping of `redis` errors onto the Redscope error taxonomy

use redscope_core::RedscopeError;

/// Classify a `redis::RedisError`.
///
/// Timeouts become `Timeout`, anything that means the socket is gone becomes
/// `Connection`, and the rest (server replies, type errors) is `Command`.
pub fn map_redis_error(err: redis::RedisError) -> RedscopeError {
    if err.is_timeout() {
        return RedscopeError::Timeout(err.to_string());
    }

    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || is_auth_error(&err)
    {
        return RedscopeError::Connection(err.to_string());
    }

    RedscopeError::Command(err.to_string())
}

fn is_auth_error(err: &redis::RedisError) -> bool {
    matches!(err.kind(), redis::ErrorKind::AuthenticationFailed)
        || matches!(err.code(), Some("NOAUTH") | Some("WRONGPASS"))
}
