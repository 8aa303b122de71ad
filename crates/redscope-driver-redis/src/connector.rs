//! Opening connections to a single Redis node
//!
//! A `NodeConnector` knows how to open one node connection. Two flavors
//! exist and are selectable by name:
//!
//! - `multiplexed`: one multiplexed connection per node (default)
//! - `managed`: a connection manager that transparently reconnects

use crate::{RedisClient, RedisCommand, RetryStrategy, StandaloneRedisClient, map_redis_error};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig, MultiplexedConnection};
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use redscope_core::{
    ClientMetadata, ConnectionType, Database, Endpoint, RedscopeError, Result, TlsConfig,
};
use std::sync::Arc;
use std::time::Duration;

pub const MULTIPLEXED_CONNECTOR: &str = "multiplexed";
pub const MANAGED_CONNECTOR: &str = "managed";

/// Options that apply to every connection created for one request
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Retry failed connection attempts with `retry`
    pub use_retry: bool,
    pub retry: RetryStrategy,
    /// Name set with `CLIENT SETNAME`; derived from the metadata when unset
    pub connection_name: Option<String>,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            use_retry: false,
            retry: RetryStrategy::default(),
            connection_name: None,
            connect_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionOptions {
    pub fn with_retry(mut self, use_retry: bool) -> Self {
        self.use_retry = use_retry;
        self
    }

    pub fn with_retry_strategy(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, response_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.response_timeout = response_timeout;
        self
    }

    /// Apply the database timeout, which overrides both defaults
    pub fn for_database(mut self, database: &Database) -> Self {
        if let Some(timeout) = database.timeout() {
            self.connect_timeout = timeout;
            self.response_timeout = timeout;
        }
        self
    }

    /// The same options without retries, used for topology probes
    pub fn without_retry(&self) -> Self {
        Self {
            use_retry: false,
            ..self.clone()
        }
    }
}

/// Connection name reported to the server: `redscope-<context>-<database>`
pub fn connection_name(metadata: &ClientMetadata, options: &ConnectionOptions) -> String {
    if let Some(name) = &options.connection_name {
        return sanitize_connection_name(name);
    }

    let database: String = metadata.database_id.chars().take(8).collect();
    sanitize_connection_name(&format!("redscope-{}-{}", metadata.context, database))
}

/// `CLIENT SETNAME` rejects spaces and newlines
fn sanitize_connection_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() || c.is_control() { '-' } else { c })
        .collect()
}

/// Everything needed to open a connection to one node
#[derive(Debug, Clone)]
pub struct NodeTarget {
    pub metadata: ClientMetadata,
    pub endpoint: Endpoint,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<u32>,
    pub tls: Option<TlsConfig>,
    /// Topology reported by the resulting client
    pub connection_type: ConnectionType,
}

impl NodeTarget {
    /// Target the main endpoint of a database. The metadata db index wins
    /// over the database default.
    pub fn from_database(metadata: &ClientMetadata, database: &Database) -> Self {
        Self {
            metadata: metadata.clone(),
            endpoint: database.endpoint(),
            username: database.username.clone(),
            password: database.password.clone(),
            db: metadata.db.or(database.db),
            tls: database.tls.clone(),
            connection_type: ConnectionType::Standalone,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_db(mut self, db: Option<u32>) -> Self {
        self.db = db;
        self
    }

    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        let addr = match &self.tls {
            Some(tls) => ConnectionAddr::TcpTls {
                host: self.endpoint.host.clone(),
                port: self.endpoint.port,
                insecure: !tls.verify_server_cert,
                tls_params: None,
            },
            None => ConnectionAddr::Tcp(self.endpoint.host.clone(), self.endpoint.port),
        };

        ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: self.db.unwrap_or(0) as i64,
                username: self.username.clone(),
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }

    /// Build the `redis::Client` for this target, attaching certificates
    /// when the TLS configuration carries any
    pub fn open_client(&self) -> Result<redis::Client> {
        if let Some(tls) = &self.tls {
            tls.validate()?;
            if tls.ca_cert.is_some() || tls.has_client_auth() {
                return redis::Client::build_with_tls(self.connection_info(), tls_certificates(tls))
                    .map_err(|e| {
                        RedscopeError::Connection(format!("Invalid TLS configuration: {}", e))
                    });
            }
        }

        redis::Client::open(self.connection_info())
            .map_err(|e| RedscopeError::Connection(format!("Failed to create Redis client: {}", e)))
    }
}

pub(crate) fn tls_certificates(tls: &TlsConfig) -> redis::TlsCertificates {
    let client_tls = match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => Some(redis::ClientTlsConfig {
            client_cert: cert.as_bytes().to_vec(),
            client_key: key.as_bytes().to_vec(),
        }),
        _ => None,
    };

    redis::TlsCertificates {
        client_tls,
        root_cert: tls.ca_cert.as_ref().map(|ca| ca.as_bytes().to_vec()),
    }
}

/// Opens a connection to a single node and wraps it in a client
#[async_trait]
pub trait NodeConnector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(
        &self,
        target: &NodeTarget,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>>;
}

/// Connector producing multiplexed connections
#[derive(Debug, Default, Clone, Copy)]
pub struct MultiplexedConnector;

#[async_trait]
impl NodeConnector for MultiplexedConnector {
    fn name(&self) -> &'static str {
        MULTIPLEXED_CONNECTOR
    }

    #[tracing::instrument(skip(self, target, options), fields(endpoint = %target.endpoint))]
    async fn connect(
        &self,
        target: &NodeTarget,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        let client = target.open_client()?;
        let connection: MultiplexedConnection = client
            .get_multiplexed_async_connection_with_timeouts(
                options.response_timeout,
                options.connect_timeout,
            )
            .await
            .map_err(map_redis_error)?;

        let client = Arc::new(StandaloneRedisClient::new(
            target.metadata.clone(),
            target.endpoint.clone(),
            target.connection_type,
            connection,
        ));
        verify_connection(client.as_ref(), target, options).await?;

        Ok(client)
    }
}

/// Connector producing auto-reconnecting connection managers
#[derive(Debug, Clone, Copy)]
pub struct ManagedConnector {
    reconnect_retries: usize,
}

impl ManagedConnector {
    pub fn new(reconnect_retries: usize) -> Self {
        Self { reconnect_retries }
    }
}

impl Default for ManagedConnector {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl NodeConnector for ManagedConnector {
    fn name(&self) -> &'static str {
        MANAGED_CONNECTOR
    }

    #[tracing::instrument(skip(self, target, options), fields(endpoint = %target.endpoint))]
    async fn connect(
        &self,
        target: &NodeTarget,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        let client = target.open_client()?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(options.connect_timeout)
            .set_response_timeout(options.response_timeout)
            .set_number_of_retries(self.reconnect_retries);

        let connection = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(map_redis_error)?;

        let client = Arc::new(StandaloneRedisClient::new(
            target.metadata.clone(),
            target.endpoint.clone(),
            target.connection_type,
            connection,
        ));
        verify_connection(client.as_ref(), target, options).await?;

        Ok(client)
    }
}

/// Resolve a connector by its flag name
pub fn connector_by_name(name: &str) -> Option<Arc<dyn NodeConnector>> {
    match name.trim().to_lowercase().as_str() {
        MULTIPLEXED_CONNECTOR => Some(Arc::new(MultiplexedConnector)),
        MANAGED_CONNECTOR => Some(Arc::new(ManagedConnector::default())),
        _ => None,
    }
}

/// Open a node connection, retrying when the options ask for it
pub async fn connect_node(
    connector: &dyn NodeConnector,
    target: &NodeTarget,
    options: &ConnectionOptions,
) -> Result<Arc<dyn RedisClient>> {
    if options.use_retry {
        options
            .retry
            .run(|| connector.connect(target, options))
            .await
    } else {
        connector.connect(target, options).await
    }
}

/// PING the fresh connection and name it.
///
/// Authentication problems only surface on the first command, so the PING
/// is what turns bad credentials into a connection error.
async fn verify_connection(
    client: &dyn RedisClient,
    target: &NodeTarget,
    options: &ConnectionOptions,
) -> Result<()> {
    if let Err(err) = client.send_command(RedisCommand::new("PING")).await {
        let _ = client.disconnect().await;
        return Err(match err {
            RedscopeError::Command(message) => RedscopeError::Connection(format!(
                "Connection check failed for {}: {}",
                target.endpoint, message
            )),
            other => other,
        });
    }

    let name = connection_name(&target.metadata, options);
    if let Err(err) = client
        .send_command(RedisCommand::new("CLIENT").arg("SETNAME").arg(name.as_str()))
        .await
    {
        tracing::debug!(endpoint = %target.endpoint, error = %err, "unable to set connection name");
    }

    Ok(())
}
