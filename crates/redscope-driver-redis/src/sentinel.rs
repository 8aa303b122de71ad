//! Sentinel client
//!
//! The primary is discovered by asking the sentinels for the address of the
//! monitored group. When the primary connection breaks the address is
//! resolved again, so a failover is followed on the next command.

use crate::{
    ClientState, ClientStatus, ConnectionOptions, NodeConnector, NodeRole, NodeTarget,
    RedisClient, RedisCommand, connect_node, reply_to_string,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use redis::Value;
use redscope_core::{ClientMetadata, ConnectionType, Endpoint, RedscopeError, Result};
use std::sync::Arc;
use tokio::time::Instant;

/// Where the sentinels are and which group they monitor
#[derive(Debug, Clone)]
pub struct SentinelTopology {
    /// Target used to talk to the sentinels themselves
    pub sentinel_target: NodeTarget,
    pub sentinels: Vec<Endpoint>,
    pub master_name: String,
    /// Template for the data node connection; the endpoint is replaced by
    /// the resolved primary
    pub master_target: NodeTarget,
}

/// Ask the sentinels for the current primary of `master_name`.
///
/// Sentinels are tried in order; the first one that answers wins.
pub async fn resolve_primary(
    connector: &dyn NodeConnector,
    topology: &SentinelTopology,
    options: &ConnectionOptions,
) -> Result<Endpoint> {
    let mut last_error = None;

    for sentinel in &topology.sentinels {
        let target = topology
            .sentinel_target
            .clone()
            .with_endpoint(sentinel.clone())
            .with_db(None);

        let client = match connector.connect(&target, options).await {
            Ok(client) => client,
            Err(err) => {
                tracing::debug!(sentinel = %sentinel, error = %err, "sentinel unreachable");
                last_error = Some(err);
                continue;
            }
        };

        let reply = client
            .send_command(
                RedisCommand::new("SENTINEL")
                    .arg("get-master-addr-by-name")
                    .arg(topology.master_name.as_str()),
            )
            .await;
        let _ = client.disconnect().await;

        match reply.and_then(|reply| parse_master_address(&reply, &topology.master_name)) {
            Ok(endpoint) => return Ok(endpoint),
            Err(err) => last_error = Some(err),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        RedscopeError::Connection("No sentinel endpoints configured".to_string())
    }))
}

/// Parse the `[host, port]` reply of `SENTINEL get-master-addr-by-name`
pub fn parse_master_address(reply: &Value, master_name: &str) -> Result<Endpoint> {
    match reply {
        Value::Array(parts) if parts.len() == 2 => {
            let host = reply_to_string(&parts[0]);
            let port = reply_to_string(&parts[1]).and_then(|port| port.parse::<u16>().ok());
            match (host, port) {
                (Some(host), Some(port)) => Ok(Endpoint::new(host, port)),
                _ => Err(RedscopeError::Connection(format!(
                    "Invalid primary address for '{}': {:?}",
                    master_name, reply
                ))),
            }
        }
        Value::Nil => Err(RedscopeError::Connection(format!(
            "Sentinel does not monitor a group named '{}'",
            master_name
        ))),
        other => Err(RedscopeError::Connection(format!(
            "Unexpected sentinel reply for '{}': {:?}",
            master_name, other
        ))),
    }
}

/// Client for a sentinel-managed deployment
pub struct SentinelRedisClient {
    state: ClientState,
    topology: SentinelTopology,
    connector: Arc<dyn NodeConnector>,
    options: ConnectionOptions,
    primary: RwLock<Option<Arc<dyn RedisClient>>>,
}

impl SentinelRedisClient {
    #[tracing::instrument(skip_all, fields(master = %topology.master_name))]
    pub async fn connect(
        topology: SentinelTopology,
        connector: Arc<dyn NodeConnector>,
        options: ConnectionOptions,
    ) -> Result<Self> {
        let state = ClientState::new(topology.master_target.metadata.clone());
        let client = Self {
            state,
            topology,
            connector,
            options,
            primary: RwLock::new(None),
        };

        client.connect_primary().await?;
        client.state.set_status(ClientStatus::Connected);
        Ok(client)
    }

    /// Resolve the primary and replace the current connection with one to it
    async fn connect_primary(&self) -> Result<Arc<dyn RedisClient>> {
        let endpoint = resolve_primary(self.connector.as_ref(), &self.topology, &self.options).await?;
        let target = self
            .topology
            .master_target
            .clone()
            .with_endpoint(endpoint.clone())
            .with_connection_type(ConnectionType::Sentinel);
        let primary = connect_node(self.connector.as_ref(), &target, &self.options).await?;

        let previous = self.primary.write().replace(primary.clone());
        if let Some(previous) = previous {
            let _ = previous.disconnect().await;
        }

        tracing::debug!(client_id = %self.state.id(), primary = %endpoint, "sentinel primary resolved");
        Ok(primary)
    }

    fn current_primary(&self) -> Result<Arc<dyn RedisClient>> {
        if self.state.status() == ClientStatus::Closed {
            return Err(RedscopeError::Connection(
                "Sentinel client is closed".to_string(),
            ));
        }

        self.primary
            .read()
            .clone()
            .ok_or_else(|| RedscopeError::Connection("No primary connection".to_string()))
    }

    /// Run `request` against the primary, following a failover once when
    /// the primary connection is gone
    async fn with_primary<T, F, Fut>(&self, request: F) -> Result<T>
    where
        F: Fn(Arc<dyn RedisClient>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let primary = self.current_primary()?;
        let result = match request(primary).await {
            Err(err) if err.is_connection_error() => {
                tracing::info!(client_id = %self.state.id(), error = %err, "primary connection lost, re-resolving");
                let primary = self.connect_primary().await?;
                request(primary).await
            }
            other => other,
        };

        self.state.observe(&result);
        result
    }
}

#[async_trait]
impl RedisClient for SentinelRedisClient {
    fn id(&self) -> &str {
        self.state.id()
    }

    fn metadata(&self) -> &ClientMetadata {
        self.state.metadata()
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Sentinel
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
        self.with_primary(|primary| {
            let command = command.clone();
            async move { primary.send_command(command).await }
        })
        .await
    }

    async fn send_pipeline(&self, commands: Vec<RedisCommand>) -> Result<Vec<Result<Value>>> {
        self.with_primary(|primary| {
            let commands = commands.clone();
            async move { primary.send_pipeline(commands).await }
        })
        .await
    }

    async fn nodes(self: Arc<Self>, _role: NodeRole) -> Result<Vec<Arc<dyn RedisClient>>> {
        let client: Arc<dyn RedisClient> = self;
        Ok(vec![client])
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.set_status(ClientStatus::Closed);
        let primary = self.primary.write().take();
        if let Some(primary) = primary {
            primary.disconnect().await?;
        }
        tracing::debug!(client_id = %self.state.id(), "sentinel client disconnected");
        Ok(())
    }
}
