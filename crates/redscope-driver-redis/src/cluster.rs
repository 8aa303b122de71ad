//! Cluster client
//!
//! Keeps one cluster-aware connection for regular commands and opens plain
//! clients for the individual nodes on demand (bulk actions scan every
//! primary separately).

use crate::{
    ClientState, ClientStatus, ConnectionOptions, NodeConnector, NodeRole, NodeTarget,
    RedisClient, RedisCommand, connect_node, connector::tls_certificates, into_reply,
    map_redis_error, reply_to_string,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use redis::Value;
use redis::aio::ConnectionLike;
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redscope_core::{ClientMetadata, ConnectionType, Endpoint, RedscopeError, Result};
use std::sync::Arc;
use tokio::time::Instant;

/// One line of `CLUSTER NODES`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,
    pub endpoint: Endpoint,
    pub flags: Vec<String>,
    /// Id of the primary this node replicates, if it is a replica
    pub primary_id: Option<String>,
}

impl ClusterNode {
    pub fn is_primary(&self) -> bool {
        self.flags.iter().any(|flag| flag == "master")
    }

    /// Failed, unreachable or still joining
    pub fn is_available(&self) -> bool {
        !self
            .flags
            .iter()
            .any(|flag| matches!(flag.as_str(), "fail" | "fail?" | "handshake" | "noaddr"))
    }
}

/// Parse the output of `CLUSTER NODES`.
///
/// Lines that cannot be parsed (or have no address) are skipped.
pub fn parse_cluster_nodes(output: &str) -> Vec<ClusterNode> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            let address = fields.next()?;
            let flags = fields.next()?;
            let primary_id = fields.next()?;

            // ip:port@cport[,hostname]
            let address = address.split(',').next()?;
            let address = address.split('@').next()?;
            let endpoint = Endpoint::parse(address).ok()?;
            if endpoint.host.is_empty() || endpoint.port == 0 {
                return None;
            }

            Some(ClusterNode {
                id: id.to_string(),
                endpoint,
                flags: flags.split(',').map(str::to_string).collect(),
                primary_id: (primary_id != "-").then(|| primary_id.to_string()),
            })
        })
        .collect()
}

/// Client for a Redis Cluster deployment
pub struct ClusterRedisClient {
    state: ClientState,
    connection: RwLock<Option<ClusterConnection>>,
    node_target: NodeTarget,
    connector: Arc<dyn NodeConnector>,
    options: ConnectionOptions,
    node_clients: DashMap<Endpoint, Arc<dyn RedisClient>>,
}

impl ClusterRedisClient {
    /// Connect to the cluster through the given seed nodes.
    ///
    /// Fails when the seeds do not belong to a cluster, which is what makes
    /// this usable as a topology probe.
    #[tracing::instrument(skip_all, fields(seeds = seeds.len()))]
    pub async fn connect(
        target: NodeTarget,
        seeds: Vec<Endpoint>,
        connector: Arc<dyn NodeConnector>,
        options: ConnectionOptions,
    ) -> Result<Self> {
        // Cluster nodes only have db 0
        let node_target = target
            .with_db(None)
            .with_connection_type(ConnectionType::Cluster);

        let initial_nodes = seeds
            .iter()
            .map(|endpoint| node_target.clone().with_endpoint(endpoint.clone()).connection_info())
            .collect::<Vec<_>>();

        let mut builder = ClusterClientBuilder::new(initial_nodes)
            .connection_timeout(options.connect_timeout)
            .response_timeout(options.response_timeout);
        if let Some(username) = &node_target.username {
            builder = builder.username(username.clone());
        }
        if let Some(password) = &node_target.password {
            builder = builder.password(password.clone());
        }
        if let Some(tls) = &node_target.tls {
            tls.validate()?;
            builder = builder.tls(if tls.verify_server_cert {
                redis::TlsMode::Secure
            } else {
                redis::TlsMode::Insecure
            });
            if tls.ca_cert.is_some() || tls.has_client_auth() {
                builder = builder.certs(tls_certificates(tls));
            }
        }

        let client = builder.build().map_err(|e| {
            RedscopeError::Connection(format!("Failed to create cluster client: {}", e))
        })?;
        let mut connection = client.get_async_connection().await.map_err(map_redis_error)?;

        connection
            .req_packed_command(&redis::cmd("PING"))
            .await
            .map_err(map_redis_error)?;

        let state = ClientState::new(node_target.metadata.clone());
        state.set_status(ClientStatus::Connected);
        tracing::debug!(client_id = %state.id(), "cluster client connected");

        Ok(Self {
            state,
            connection: RwLock::new(Some(connection)),
            node_target,
            connector,
            options,
            node_clients: DashMap::new(),
        })
    }

    fn connection(&self) -> Result<ClusterConnection> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| RedscopeError::Connection("Cluster connection is closed".to_string()))
    }

    /// Current cluster topology as reported by `CLUSTER NODES`
    pub async fn cluster_nodes(&self) -> Result<Vec<ClusterNode>> {
        let reply = self
            .send_command(RedisCommand::new("CLUSTER").arg("NODES"))
            .await?;
        let output = reply_to_string(&reply).ok_or_else(|| {
            RedscopeError::Command(format!("Unexpected CLUSTER NODES reply: {:?}", reply))
        })?;

        Ok(parse_cluster_nodes(&output))
    }

    async fn node_client(&self, endpoint: &Endpoint) -> Result<Arc<dyn RedisClient>> {
        if let Some(client) = self.node_clients.get(endpoint) {
            if client.is_connected() {
                return Ok(client.clone());
            }
        }

        let target = self
            .node_target
            .clone()
            .with_endpoint(endpoint.clone())
            .with_connection_type(ConnectionType::Standalone);
        let client = connect_node(self.connector.as_ref(), &target, &self.options).await?;

        if let Some(stale) = self.node_clients.insert(endpoint.clone(), client.clone()) {
            let _ = stale.disconnect().await;
        }
        Ok(client)
    }
}

#[async_trait]
impl RedisClient for ClusterRedisClient {
    fn id(&self) -> &str {
        self.state.id()
    }

    fn metadata(&self) -> &ClientMetadata {
        self.state.metadata()
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Cluster
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

    /// Keys of one pipeline may live in different slots, so commands are
    /// sent one by one
    async fn send_pipeline(&self, commands: Vec<RedisCommand>) -> Result<Vec<Result<Value>>> {
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            let reply = self.send_command(command).await;
            if let Err(err) = &reply
                && err.is_connection_error()
            {
                return Err(RedscopeError::Connection(err.to_string()));
            }
            replies.push(reply);
        }
        Ok(replies)
    }

    async fn nodes(self: Arc<Self>, role: NodeRole) -> Result<Vec<Arc<dyn RedisClient>>> {
        let nodes: Vec<ClusterNode> = self
            .cluster_nodes()
            .await?
            .into_iter()
            .filter(|node| node.is_available())
            .filter(|node| role == NodeRole::All || node.is_primary())
            .collect();

        if nodes.is_empty() {
            return Err(RedscopeError::Connection(
                "Cluster reported no available nodes".to_string(),
            ));
        }

        let mut clients = Vec::with_capacity(nodes.len());
        for node in &nodes {
            clients.push(self.node_client(&node.endpoint).await?);
        }

        tracing::debug!(client_id = %self.state.id(), nodes = clients.len(), ?role, "resolved cluster nodes");
        Ok(clients)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connection.write().take();
        self.state.set_status(ClientStatus::Closed);

        let node_clients: Vec<Arc<dyn RedisClient>> = self
            .node_clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.node_clients.clear();

        for client in node_clients {
            if let Err(err) = client.disconnect().await {
                tracing::warn!(error = %err, "failed to disconnect cluster node client");
            }
        }

        tracing::debug!(client_id = %self.state.id(), "cluster client disconnected");
        Ok(())
    }
}
