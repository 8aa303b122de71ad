//! Topology strategies
//!
//! Each strategy builds a client for exactly one topology. They hold no
//! state besides the node connector, so the same instance serves every
//! request.

use crate::{
    ClusterRedisClient, ConnectionOptions, NodeConnector, NodeTarget, RedisClient,
    SentinelRedisClient, SentinelTopology, connect_node,
};
use async_trait::async_trait;
use redscope_core::{ClientMetadata, ConnectionType, Database, RedscopeError, Result};
use std::sync::Arc;

/// Builds a client for one topology
#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    fn connection_type(&self) -> ConnectionType;

    /// Connect and return a verified client, or a `Connection` error when
    /// the database is unreachable, rejects the credentials, fails the TLS
    /// handshake or does not have this topology
    async fn create_client(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>>;
}

/// Single node deployments
pub struct StandaloneStrategy {
    connector: Arc<dyn NodeConnector>,
}

impl StandaloneStrategy {
    pub fn new(connector: Arc<dyn NodeConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ConnectionStrategy for StandaloneStrategy {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Standalone
    }

    #[tracing::instrument(skip_all, fields(database_id = %database.id, connector = self.connector.name()))]
    async fn create_client(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        database.validate()?;
        let target = NodeTarget::from_database(metadata, database);

        connect_node(self.connector.as_ref(), &target, options).await
    }
}

/// Redis Cluster deployments
pub struct ClusterStrategy {
    connector: Arc<dyn NodeConnector>,
}

impl ClusterStrategy {
    pub fn new(connector: Arc<dyn NodeConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ConnectionStrategy for ClusterStrategy {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Cluster
    }

    #[tracing::instrument(skip_all, fields(database_id = %database.id, connector = self.connector.name()))]
    async fn create_client(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        database.validate()?;
        let target = NodeTarget::from_database(metadata, database);
        let seeds = database.seed_endpoints();

        let connect = || {
            ClusterRedisClient::connect(
                target.clone(),
                seeds.clone(),
                self.connector.clone(),
                options.clone(),
            )
        };

        let client = if options.use_retry {
            options.retry.run(connect).await?
        } else {
            connect().await?
        };

        Ok(Arc::new(client))
    }
}

/// Sentinel-managed deployments
pub struct SentinelStrategy {
    connector: Arc<dyn NodeConnector>,
}

impl SentinelStrategy {
    pub fn new(connector: Arc<dyn NodeConnector>) -> Self {
        Self { connector }
    }

    /// Sentinels are reached with the database credentials, the data nodes
    /// with the sentinel master credentials
    pub fn topology(metadata: &ClientMetadata, database: &Database) -> Result<SentinelTopology> {
        let sentinel_master = database.sentinel_master.as_ref().ok_or_else(|| {
            RedscopeError::Configuration(format!(
                "Database {} has no sentinel master configured",
                database.id
            ))
        })?;

        let sentinel_target = NodeTarget::from_database(metadata, database).with_db(None);
        let master_target = NodeTarget::from_database(metadata, database)
            .with_credentials(
                sentinel_master.username.clone(),
                sentinel_master.password.clone(),
            )
            .with_connection_type(ConnectionType::Sentinel);

        Ok(SentinelTopology {
            sentinel_target,
            sentinels: database.seed_endpoints(),
            master_name: sentinel_master.name.clone(),
            master_target,
        })
    }
}

#[async_trait]
impl ConnectionStrategy for SentinelStrategy {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Sentinel
    }

    #[tracing::instrument(skip_all, fields(database_id = %database.id, connector = self.connector.name()))]
    async fn create_client(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        database.validate()?;
        let topology = Self::topology(metadata, database)?;

        let client =
            SentinelRedisClient::connect(topology, self.connector.clone(), options.clone()).await?;
        Ok(Arc::new(client))
    }
}
