//! Redscope Connection - Redis client lifecycle
//!
//! This crate creates Redis clients for any topology, pools them by client
//! id and retires them when idle or invalidated.

mod config;
mod factory;
mod provider;
mod storage;
#[cfg(test)]
mod test_support;

pub use config::ClientsConfig;
pub use factory::{REDIS_CLIENT_FLAG, RedisClientFactory, StrategyFlagSource};
pub use provider::{InMemoryDatabaseRepository, RedisClientProvider};
pub use storage::RedisClientStorage;
