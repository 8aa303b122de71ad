//! Shared helpers for the bulk action integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::Value;
use redscope_bulk_actions::{
    BulkAction, BulkActionsConfig, BulkActionsProvider, BulkActionsService, BulkImportService,
};
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

pub fn keys(prefix: &str, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("{}{}", prefix, i).into_bytes())
        .collect()
}

fn glob_match(pattern: &[u8], key: &[u8]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((b'*', rest)) => (0..=key.len()).any(|i| glob_match(rest, &key[i..])),
        Some((c, rest)) => key.first() == Some(c) && glob_match(rest, &key[1..]),
    }
}

/// One Redis node with a fixed key space; deleted keys are skipped on scan
pub struct FakeNode {
    keys: Vec<Vec<u8>>,
    deleted: Mutex<HashSet<Vec<u8>>>,
    denied: HashSet<Vec<u8>>,
    scan_delay: Duration,
    drop_after_scans: Option<usize>,
    fail_pipelines: bool,
    scans: AtomicUsize,
    pipelines: AtomicUsize,
    executed: Mutex<Vec<RedisCommand>>,
}

impl FakeNode {
    pub fn new(keys: Vec<Vec<u8>>) -> Self {
        Self {
            keys,
            deleted: Mutex::new(HashSet::new()),
            denied: HashSet::new(),
            scan_delay: Duration::ZERO,
            drop_after_scans: None,
            fail_pipelines: false,
            scans: AtomicUsize::new(0),
            pipelines: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Commands on `key` get an error reply
    pub fn deny(mut self, key: &str) -> Self {
        self.denied.insert(key.as_bytes().to_vec());
        self
    }

    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    pub fn drop_after_scans(mut self, scans: usize) -> Self {
        self.drop_after_scans = Some(scans);
        self
    }

    pub fn fail_pipelines(mut self) -> Self {
        self.fail_pipelines = true;
        self
    }

    pub fn remaining_keys(&self) -> usize {
        self.keys.len() - self.deleted.lock().len()
    }

    pub fn pipelines(&self) -> usize {
        self.pipelines.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<RedisCommand> {
        self.executed.lock().clone()
    }

    async fn command(&self, command: &RedisCommand) -> Result<Value> {
        match command.name() {
            "DBSIZE" => Ok(Value::Int(self.remaining_keys() as i64)),
            "SCAN" => self.scan(command).await,
            _ => self.execute(command),
        }
    }

    async fn scan(&self, command: &RedisCommand) -> Result<Value> {
        let scans = self.scans.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.scan_delay).await;
        if self.drop_after_scans.is_some_and(|limit| scans >= limit) {
            return Err(RedscopeError::Connection("Connection reset by peer".to_string()));
        }

        let args = command.args();
        let cursor: usize = String::from_utf8_lossy(&args[0]).parse().unwrap_or(0);
        let count: usize = String::from_utf8_lossy(&args[4]).parse().unwrap_or(10);
        let end = (cursor + count).min(self.keys.len());
        let deleted = self.deleted.lock();
        let page = self.keys[cursor..end]
            .iter()
            .filter(|key| !deleted.contains(*key) && glob_match(&args[2], key))
            .map(|key| Value::BulkString(key.clone()))
            .collect();
        let next = if end >= self.keys.len() { 0 } else { end };

        Ok(Value::Array(vec![
            Value::BulkString(next.to_string().into_bytes()),
            Value::Array(page),
        ]))
    }

    fn execute(&self, command: &RedisCommand) -> Result<Value> {
        self.executed.lock().push(command.clone());
        let key = command.args().first();
        if key.is_some_and(|key| self.denied.contains(key)) {
            return Err(RedscopeError::Command(
                "NOPERM this user has no permissions to access one of the keys".to_string(),
            ));
        }
        match (command.name(), key) {
            ("DEL", Some(key)) => {
                let removed = self.keys.contains(key) && self.deleted.lock().insert(key.clone());
                Ok(Value::Int(i64::from(removed)))
            }
            _ => Ok(Value::Okay),
        }
    }

    async fn pipeline(&self, commands: &[RedisCommand]) -> Result<Vec<Result<Value>>> {
        self.pipelines.fetch_add(1, Ordering::SeqCst);
        if self.fail_pipelines {
            return Err(RedscopeError::Timeout("Response timed out".to_string()));
        }
        Ok(commands.iter().map(|command| self.execute(command)).collect())
    }
}

/// Client for one node, as handed out by [`FakeDeployment::nodes`]
pub struct FakeNodeClient {
    state: ClientState,
    node: Arc<FakeNode>,
}

#[async_trait]
impl RedisClient for FakeNodeClient {
    fn id(&self) -> &str {
        self.state.id()
    }

    fn metadata(&self) -> &ClientMetadata {
        self.state.metadata()
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Standalone
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
        self.node.command(&command).await
    }

    async fn send_pipeline(&self, commands: Vec<RedisCommand>) -> Result<Vec<Result<Value>>> {
        self.node.pipeline(&commands).await
    }

    async fn nodes(self: Arc<Self>, _role: NodeRole) -> Result<Vec<Arc<dyn RedisClient>>> {
        let client: Arc<dyn RedisClient> = self;
        Ok(vec![client])
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.set_status(ClientStatus::Closed);
        Ok(())
    }
}

/// A database made of one or more primaries
pub struct FakeDeployment {
    state: ClientState,
    connection_type: ConnectionType,
    nodes: Vec<Arc<FakeNode>>,
    disconnects: AtomicUsize,
}

impl FakeDeployment {
    pub fn node(&self, index: usize) -> &Arc<FakeNode> {
        &self.nodes[index]
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RedisClient for FakeDeployment {
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

    async fn send_command(&self, command: RedisCommand) -> Result<Value> {
        self.nodes[0].command(&command).await
    }

    async fn send_pipeline(&self, commands: Vec<RedisCommand>) -> Result<Vec<Result<Value>>> {
        if self.connection_type == ConnectionType::Cluster {
            return Err(RedscopeError::Command(
                "CROSSSLOT Keys in request don't hash to the same slot".to_string(),
            ));
        }
        self.nodes[0].pipeline(&commands).await
    }

    async fn nodes(self: Arc<Self>, _role: NodeRole) -> Result<Vec<Arc<dyn RedisClient>>> {
        Ok(self
            .nodes
            .iter()
            .map(|node| {
                let state = ClientState::new(self.state.metadata().clone());
                state.set_status(ClientStatus::Connected);
                Arc::new(FakeNodeClient {
                    state,
                    node: node.clone(),
                }) as Arc<dyn RedisClient>
            })
            .collect())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.set_status(ClientStatus::Closed);
        Ok(())
    }
}

type NodeBuilder = Box<dyn Fn() -> Vec<FakeNode> + Send + Sync>;

/// Connector opening a fresh [`FakeDeployment`] on every connect
pub struct FakeConnector {
    connection_type: ConnectionType,
    build: NodeBuilder,
    deployments: Mutex<Vec<Arc<FakeDeployment>>>,
    refuse: AtomicBool,
}

impl FakeConnector {
    pub fn new<F>(connection_type: ConnectionType, build: F) -> Self
    where
        F: Fn() -> Vec<FakeNode> + Send + Sync + 'static,
    {
        Self {
            connection_type,
            build: Box::new(build),
            deployments: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
        }
    }

    pub fn refuse(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Deployment opened by the `index`th connect
    pub fn deployment(&self, index: usize) -> Arc<FakeDeployment> {
        self.deployments.lock()[index].clone()
    }

    pub fn connects(&self) -> usize {
        self.deployments.lock().len()
    }
}

#[async_trait]
impl NodeConnector for FakeConnector {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn connect(
        &self,
        target: &NodeTarget,
        _options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RedscopeError::Connection(format!(
                "Connection refused: {}",
                target.endpoint
            )));
        }

        let state = ClientState::new(target.metadata.clone());
        state.set_status(ClientStatus::Connected);
        let deployment = Arc::new(FakeDeployment {
            state,
            connection_type: self.connection_type,
            nodes: (self.build)().into_iter().map(Arc::new).collect(),
            disconnects: AtomicUsize::new(0),
        });
        self.deployments.lock().push(deployment.clone());
        Ok(deployment)
    }
}

pub struct Harness {
    pub connector: Arc<FakeConnector>,
    pub clients: Arc<RedisClientProvider>,
    pub service: BulkActionsService,
    pub import: BulkImportService,
}

/// Services over one database `db-1` whose connections come from `connector`
pub fn harness(connector: FakeConnector, config: BulkActionsConfig) -> Harness {
    let clients_config = ClientsConfig::default().with_retry(1, 10);
    let repository = Arc::new(InMemoryDatabaseRepository::new());
    repository.insert(
        Database::new("db-1", "127.0.0.1", 6379).with_connection_type(ConnectionType::Standalone),
    );

    let connector = Arc::new(connector);
    let factory = Arc::new(RedisClientFactory::with_connector(
        clients_config.clone(),
        connector.clone(),
    ));
    let storage = Arc::new(RedisClientStorage::new(&clients_config));
    let clients = Arc::new(RedisClientProvider::new(repository, factory, storage));

    let provider = Arc::new(BulkActionsProvider::new(clients.clone(), config.clone()));
    Harness {
        connector,
        clients: clients.clone(),
        service: BulkActionsService::new(provider),
        import: BulkImportService::new(clients, config),
    }
}

pub fn session() -> SessionMetadata {
    SessionMetadata::new("s1").with_user("u1")
}

pub fn metadata() -> ClientMetadata {
    ClientMetadata::new(session(), "db-1", ClientContext::Common)
}

pub async fn wait_for_terminal(action: &Arc<BulkAction>) {
    for _ in 0..500 {
        if action.status().is_terminal() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("action stuck in {}", action.status());
}
