//! Database descriptor
//!
//! A `Database` describes one Redis deployment: where it lives, how to
//! authenticate, and which topology it uses. It is read-only input to the
//! connection layer.

use crate::{RedscopeError, Result, TlsConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Redis port
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Redis deployment topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    Standalone,
    Cluster,
    Sentinel,
    /// Topology not known yet; detected on connect
    #[default]
    #[serde(alias = "AUTO")]
    NotConnected,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Standalone => "standalone",
            ConnectionType::Cluster => "cluster",
            ConnectionType::Sentinel => "sentinel",
            ConnectionType::NotConnected => "not_connected",
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A host/port pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, accepting bracketed IPv6 hosts
    pub fn parse(address: &str) -> Result<Self> {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            RedscopeError::Configuration(format!("Invalid address '{}': missing port", address))
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            RedscopeError::Configuration(format!("Invalid address '{}': bad port", address))
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        Ok(Self::new(host, port))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Sentinel-monitored primary group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentinelMaster {
    /// Name of the primary group as known by the sentinels
    pub name: String,
    /// Credentials for the data nodes (the database credentials authenticate
    /// against the sentinels themselves)
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl SentinelMaster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }
}

/// Descriptor of a Redis deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Logical database index selected after connecting
    #[serde(default)]
    pub db: Option<u32>,
    /// Connect and command timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub sentinel_master: Option<SentinelMaster>,
    /// Additional seed nodes (cluster)
    #[serde(default)]
    pub nodes: Vec<Endpoint>,
}

impl Database {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            username: None,
            password: None,
            db: None,
            timeout_ms: None,
            tls: None,
            connection_type: ConnectionType::NotConnected,
            sentinel_master: None,
            nodes: Vec::new(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: Option<impl Into<String>>,
        password: Option<impl Into<String>>,
    ) -> Self {
        self.username = username.map(Into::into);
        self.password = password.map(Into::into);
        self
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    pub fn with_sentinel_master(mut self, sentinel_master: SentinelMaster) -> Self {
        self.sentinel_master = Some(sentinel_master);
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<Endpoint>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Seed endpoints: the main endpoint followed by any extra nodes
    pub fn seed_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = vec![self.endpoint()];
        for node in &self.nodes {
            if !endpoints.contains(node) {
                endpoints.push(node.clone());
            }
        }
        endpoints
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RedscopeError::Configuration(format!(
                "Database {} has no host",
                self.id
            )));
        }

        if self.port == 0 {
            return Err(RedscopeError::Configuration(format!(
                "Database {} has no port",
                self.id
            )));
        }

        if self.connection_type == ConnectionType::Sentinel && self.sentinel_master.is_none() {
            return Err(RedscopeError::Configuration(format!(
                "Database {} uses sentinel but has no sentinel master",
                self.id
            )));
        }

        if let Some(tls) = &self.tls {
            tls.validate()?;
        }

        Ok(())
    }
}

/// Source of database descriptors
#[async_trait]
pub trait DatabaseRepository: Send + Sync {
    /// Look up a database by id, failing with `NotFound` when unknown
    async fn get(&self, database_id: &str) -> Result<Database>;

    /// Remember the topology detected on the first successful connection
    async fn update_connection_type(
        &self,
        database_id: &str,
        connection_type: ConnectionType,
    ) -> Result<()>;
}
