//! Shared helpers for the connection integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::Value;
use redscope_connection::{
    ClientsConfig, InMemoryDatabaseRepository, RedisClientFactory, RedisClientProvider,
    RedisClientStorage,
};
use redscope_core::{
    ClientContext, ClientMetadata, ConnectionType, Database, RedscopeError, Result,
    SessionMetadata,
};
use redscope_driver_redis::{
    ClientState, ClientStatus, ConnectionOptions, NodeConnector, NodeRole, NodeTarget,
    RedisClient, RedisCommand,
};
use tokio::time::Instant;

/// Minimal connected client
pub struct FakeClient {
    state: ClientState,
    connection_type: ConnectionType,
    disconnects: AtomicUsize,
}

impl FakeClient {
    pub fn new(metadata: ClientMetadata, connection_type: ConnectionType) -> Self {
        let state = ClientState::new(metadata);
        state.set_status(ClientStatus::Connected);
        Self {
            state,
            connection_type,
            disconnects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RedisClient for FakeClient {
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

    async fn send_command(&self, _command: RedisCommand) -> Result<Value> {
        Ok(Value::Okay)
    }

    async fn send_pipeline(&self, commands: Vec<RedisCommand>) -> Result<Vec<Result<Value>>> {
        Ok(commands.iter().map(|_| Ok(Value::Okay)).collect())
    }

    async fn nodes(self: Arc<Self>, _role: NodeRole) -> Result<Vec<Arc<dyn RedisClient>>> {
        let client: Arc<dyn RedisClient> = self;
        Ok(vec![client])
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.set_status(ClientStatus::Closed);
        Ok(())
    }
}

/// Connector counting connections; each one takes `delay` to open
pub struct CountingConnector {
    connects: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl CountingConnector {
    pub fn new(delay: Duration) -> Self {
        Self {
            connects: AtomicUsize::new(0),
            delay,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            connects: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail: true,
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeConnector for CountingConnector {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn connect(
        &self,
        target: &NodeTarget,
        _options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(RedscopeError::Connection(format!(
                "Connection refused: {}",
                target.endpoint
            )));
        }
        Ok(Arc::new(FakeClient::new(
            target.metadata.clone(),
            target.connection_type,
        )))
    }
}

pub struct Harness {
    pub repository: Arc<InMemoryDatabaseRepository>,
    pub connector: Arc<CountingConnector>,
    pub storage: Arc<RedisClientStorage>,
    pub provider: RedisClientProvider,
}

/// Provider over an in-memory repository holding one standalone database `db-1`
pub fn harness(connector: CountingConnector) -> Harness {
    let config = ClientsConfig::default().with_retry(1, 10);
    let repository = Arc::new(InMemoryDatabaseRepository::new());
    repository.insert(
        Database::new("db-1", "127.0.0.1", 6379).with_connection_type(ConnectionType::Standalone),
    );

    let connector = Arc::new(connector);
    let factory = Arc::new(RedisClientFactory::with_connector(
        config.clone(),
        connector.clone(),
    ));
    let storage = Arc::new(RedisClientStorage::new(&config));
    let provider = RedisClientProvider::new(repository.clone(), factory, storage.clone());

    Harness {
        repository,
        connector,
        storage,
        provider,
    }
}

pub fn metadata(session_id: &str, context: ClientContext) -> ClientMetadata {
    ClientMetadata::new(
        SessionMetadata::new(session_id).with_user("u1"),
        "db-1",
        context,
    )
}
