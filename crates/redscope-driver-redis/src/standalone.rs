//! Client for a single Redis node

use crate::{
    ClientState, ClientStatus, NodeRole, RedisClient, RedisCommand, into_reply, map_redis_error,
    to_pipeline,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use redis::Value;
use redis::aio::ConnectionLike;
use redscope_core::{ClientMetadata, ConnectionType, Endpoint, RedscopeError, Result};
use std::sync::Arc;
use tokio::time::Instant;

/// Client bound to one node.
///
/// Generic over the connection flavor: a multiplexed connection, or a
/// connection manager that reconnects on its own. Both are cheap to clone,
/// so each request works on its own clone and no lock is held across I/O.
pub struct StandaloneRedisClient<C> {
    state: ClientState,
    endpoint: Endpoint,
    connection_type: ConnectionType,
    connection: RwLock<Option<C>>,
}

impl<C> StandaloneRedisClient<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    pub fn new(
        metadata: ClientMetadata,
        endpoint: Endpoint,
        connection_type: ConnectionType,
        connection: C,
    ) -> Self {
        let state = ClientState::new(metadata);
        state.set_status(ClientStatus::Connected);

        Self {
            state,
            endpoint,
            connection_type,
            connection: RwLock::new(Some(connection)),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn connection(&self) -> Result<C> {
        self.connection.read().clone().ok_or_else(|| {
            RedscopeError::Connection(format!("Connection to {} is closed", self.endpoint))
        })
    }
}

#[async_trait]
impl<C> RedisClient for StandaloneRedisClient<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        self.state.id()
    }

    fn metadata(&self) -> &ClientMetadata {
        self.state.metadata()
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn status(&self) -> ClientStatus {
        self.state.status()
    }

    fn last_time_used(&self) -> Instant {
        self.state.last_time_used()
    }

    fn touch(&self) {
        self.state.touch()
    }

    async fn send_command(&self, command: RedisCommand) -> Result<Value> {
        let mut connection = self.connection()?;
        let cmd = command.to_cmd();

        let result = connection
            .req_packed_command(&cmd)
            .await
            .map_err(map_redis_error)
            .and_then(into_reply);
        self.state.observe(&result);
        result
    }

    async fn send_pipeline(&self, commands: Vec<RedisCommand>) -> Result<Vec<Result<Value>>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut connection = self.connection()?;
        let pipeline = to_pipeline(&commands);

        let result = connection
            .req_packed_commands(&pipeline, 0, commands.len())
            .await
            .map_err(map_redis_error);
        self.state.observe(&result);

        Ok(result?.into_iter().map(into_reply).collect())
    }

    async fn nodes(self: Arc<Self>, _role: NodeRole) -> Result<Vec<Arc<dyn RedisClient>>> {
        let client: Arc<dyn RedisClient> = self;
        Ok(vec![client])
    }

    async fn disconnect(&self) -> Result<()> {
        // Dropping the last handle closes the socket
        self.connection.write().take();
        self.state.set_status(ClientStatus::Closed);
        tracing::debug!(client_id = %self.state.id(), endpoint = %self.endpoint, "client disconnected");
        Ok(())
    }
}
