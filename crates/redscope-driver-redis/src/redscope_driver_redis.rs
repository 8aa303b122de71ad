//! Redis clients for Redscope
//!
//! This crate turns a `Database` descriptor into a live `RedisClient` for one
//! of the three Redis topologies:
//!
//! - Standalone: one connection to a single node
//! - Cluster: a cluster-aware connection plus lazily opened per-primary clients
//! - Sentinel: a primary discovered through the sentinels, re-resolved on failure
//!
//! Connection strategies decide the topology, node connectors decide how a
//! single node connection is opened (multiplexed or auto-reconnecting).

mod client;
mod cluster;
#[cfg(test)]
mod cluster_tests;
mod command;
#[cfg(test)]
mod command_tests;
mod connector;
#[cfg(test)]
mod connector_tests;
mod error;
pub mod keys;
#[cfg(test)]
mod keys_tests;
mod retry;
#[cfg(test)]
mod retry_tests;
mod sentinel;
#[cfg(test)]
mod sentinel_tests;
mod standalone;
mod strategy;
#[cfg(test)]
mod strategy_tests;

pub use client::*;
pub use cluster::{ClusterNode, ClusterRedisClient, parse_cluster_nodes};
pub use command::*;
pub use connector::*;
pub use error::map_redis_error;
pub use keys::*;
pub use retry::*;
pub use sentinel::{SentinelRedisClient, SentinelTopology, parse_master_address, resolve_primary};
pub use standalone::StandaloneRedisClient;
pub use strategy::*;
