//! Topology dispatch for new clients
//!
//! `RedisClientFactory` picks the connection strategy for a database. An
//! explicit connection type is dispatched directly; otherwise the topology
//! is probed in the order sentinel, cluster, standalone.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use redscope_core::{ClientMetadata, ConnectionType, Database, Result};
use redscope_driver_redis::{
    ClusterStrategy, ConnectionOptions, ConnectionStrategy, MultiplexedConnector, NodeConnector,
    RedisClient, SentinelStrategy, StandaloneStrategy, connector_by_name,
};

use crate::ClientsConfig;


/// Feature flag selecting the default node connector
pub const REDIS_CLIENT_FLAG: &str = "redis_client";

/// Source of feature flag data, e.g. a remote feature config
#[async_trait]
pub trait StrategyFlagSource: Send + Sync {
    /// Data attached to the flag `name`, `None` when the flag is not defined
    async fn flag_data(&self, name: &str) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Creates clients for databases of any topology
pub struct RedisClientFactory {
    config: ClientsConfig,
    connector: RwLock<Arc<dyn NodeConnector>>,
}

impl RedisClientFactory {
    /// Create a factory using the connector named in the config, falling
    /// back to the multiplexed one for unknown names
    pub fn new(config: ClientsConfig) -> Self {
        let connector = connector_by_name(config.default_connector()).unwrap_or_else(|| {
            tracing::warn!(
                connector = config.default_connector(),
                "unknown default connector, using multiplexed"
            );
            Arc::new(MultiplexedConnector)
        });
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: ClientsConfig, connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            config,
            connector: RwLock::new(connector),
        }
    }

    pub fn config(&self) -> &ClientsConfig {
        &self.config
    }

    /// Connector used for new clients
    pub fn default_connector(&self) -> Arc<dyn NodeConnector> {
        self.connector.read().clone()
    }

    pub fn set_default_connector(&self, connector: Arc<dyn NodeConnector>) {
        *self.connector.write() = connector;
    }

    /// Resolve the default connector from the `redis_client` feature flag.
    ///
    /// The flag data is expected as `{"strategy": "<name>"}`. A missing flag,
    /// an unknown name or a failing source keeps the current connector.
    pub async fn init(&self, source: &dyn StrategyFlagSource) {
        let data = match source.flag_data(REDIS_CLIENT_FLAG).await {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "unable to resolve the redis client flag");
                return;
            }
        };

        let name = data
            .as_ref()
            .and_then(|data| data.get("strategy"))
            .and_then(|strategy| strategy.as_str());
        let Some(name) = name else {
            tracing::debug!(connector = self.default_connector().name(), "no redis client strategy flagged");
            return;
        };

        match connector_by_name(name) {
            Some(connector) => {
                tracing::info!(connector = connector.name(), "default redis connector selected");
                self.set_default_connector(connector);
            }
            None => {
                tracing::warn!(strategy = name, "unknown redis client strategy, keeping the default");
            }
        }
    }

    /// Options used for a connection to `database`
    pub fn connection_options(&self, database: &Database) -> ConnectionOptions {
        self.config.connection_options(database)
    }

    pub async fn create_standalone_client(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        StandaloneStrategy::new(self.default_connector())
            .create_client(metadata, database, options)
            .await
    }

    pub async fn create_cluster_client(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        ClusterStrategy::new(self.default_connector())
            .create_client(metadata, database, options)
            .await
    }

    pub async fn create_sentinel_client(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        SentinelStrategy::new(self.default_connector())
            .create_client(metadata, database, options)
            .await
    }

    /// Create a client with the default options for `database`
    #[tracing::instrument(skip_all, fields(database_id = %database.id, connection_type = %database.connection_type))]
    pub async fn create_client(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
    ) -> Result<Arc<dyn RedisClient>> {
        let options = self.connection_options(database);
        self.create_client_with_options(metadata, database, &options)
            .await
    }

    pub async fn create_client_with_options(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        match database.connection_type {
            ConnectionType::Standalone => {
                self.create_standalone_client(metadata, database, options)
                    .await
            }
            ConnectionType::Cluster => self.create_cluster_client(metadata, database, options).await,
            ConnectionType::Sentinel => {
                self.create_sentinel_client(metadata, database, options)
                    .await
            }
            ConnectionType::NotConnected => {
                self.create_client_automatically(metadata, database, options)
                    .await
            }
        }
    }

    /// Probe sentinel (when a master is configured), then cluster, then
    /// standalone. Only the standalone error is returned.
    async fn create_client_automatically(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        let probe = options.without_retry();

        if database.sentinel_master.is_some() {
            match self.create_sentinel_client(metadata, database, &probe).await {
                Ok(client) => return Ok(client),
                Err(err) => tracing::debug!(error = %err, "sentinel probe failed"),
            }
        }

        match self.create_cluster_client(metadata, database, &probe).await {
            Ok(client) => return Ok(client),
            Err(err) => tracing::debug!(error = %err, "cluster probe failed"),
        }

        self.create_standalone_client(metadata, database, options)
            .await
    }
}
