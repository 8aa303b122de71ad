//! The `RedisClient` abstraction shared by all topologies

use crate::RedisCommand;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::Value;
use redscope_core::{ClientMetadata, ConnectionType, Result};
use std::sync::Arc;
use tokio::time::Instant;

/// Connection status of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// Created, connection not verified yet
    Idle,
    Connected,
    /// The underlying connection reported a fatal error
    Error,
    /// Disconnected on purpose
    Closed,
}

/// Which nodes of a deployment to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Primary,
    All,
}

/// A live connection (or group of connections) to one Redis database.
///
/// Clients are owned by the pool once stored there; holders of an `Arc`
/// must not call `disconnect` on a pooled client.
#[async_trait]
pub trait RedisClient: Send + Sync {
    /// Deterministic id derived from the client metadata
    fn id(&self) -> &str;

    fn metadata(&self) -> &ClientMetadata;

    fn connection_type(&self) -> ConnectionType;

    fn status(&self) -> ClientStatus;

    fn is_connected(&self) -> bool {
        self.status() == ClientStatus::Connected
    }

    /// When the client was last handed out or used
    fn last_time_used(&self) -> Instant;

    /// Mark the client as used now
    fn touch(&self);

    /// Send one command and return its reply.
    ///
    /// Error replies are returned as `Command` errors.
    async fn send_command(&self, command: RedisCommand) -> Result<Value>;

    /// Send commands as one pipeline.
    ///
    /// The outer error means the pipeline as a whole failed; per-command
    /// error replies are returned in place.
    async fn send_pipeline(&self, commands: Vec<RedisCommand>) -> Result<Vec<Result<Value>>>;

    /// Clients for the individual nodes of the deployment.
    ///
    /// Standalone and sentinel clients return themselves.
    async fn nodes(self: Arc<Self>, role: NodeRole) -> Result<Vec<Arc<dyn RedisClient>>>;

    async fn disconnect(&self) -> Result<()>;
}

/// Bookkeeping shared by every client implementation
pub struct ClientState {
    id: String,
    metadata: ClientMetadata,
    status: Mutex<ClientStatus>,
    last_time_used: Mutex<Instant>,
}

impl ClientState {
    pub fn new(metadata: ClientMetadata) -> Self {
        Self {
            id: metadata.client_id(),
            metadata,
            status: Mutex::new(ClientStatus::Idle),
            last_time_used: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    pub fn status(&self) -> ClientStatus {
        *self.status.lock()
    }

    /// Update the status; a closed client stays closed
    pub fn set_status(&self, status: ClientStatus) {
        let mut current = self.status.lock();
        if *current != ClientStatus::Closed {
            *current = status;
        }
    }

    pub fn last_time_used(&self) -> Instant {
        *self.last_time_used.lock()
    }

    pub fn touch(&self) {
        *self.last_time_used.lock() = Instant::now();
    }

    /// Record the outcome of a request: connection-class failures put the
    /// client into `Error`, a success brings it back to `Connected`
    pub fn observe<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.set_status(ClientStatus::Connected),
            Err(err) if err.is_connection_error() => self.set_status(ClientStatus::Error),
            Err(_) => {}
        }
    }
}
