//! In-memory Redis nodes and emitters for unit tests

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::Value;
use redscope_core::{
    ClientContext, ClientMetadata, ConnectionType, RedscopeError, Result, SessionMetadata,
};
use redscope_driver_redis::{ClientState, ClientStatus, NodeRole, RedisClient, RedisCommand};
use tokio::time::Instant;

use crate::{BulkActionOverview, BulkActionStatus, OverviewEmitter};

pub fn metadata(unique_id: &str) -> ClientMetadata {
    ClientMetadata::new(
        SessionMetadata::new("s1").with_user("u1"),
        "db-1",
        ClientContext::Common,
    )
    .with_unique_id(unique_id)
}

pub fn keys(prefix: &str, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("{}{}", prefix, i).into_bytes())
        .collect()
}

/// `*` only glob, enough for the patterns used in tests
fn glob_match(pattern: &[u8], key: &[u8]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((b'*', rest)) => (0..=key.len()).any(|i| glob_match(rest, &key[i..])),
        Some((c, rest)) => key.first() == Some(c) && glob_match(rest, &key[1..]),
    }
}

/// A single node holding a fixed key set.
///
/// Deleted keys stay in place and are skipped, so cursors stay stable the
/// way Redis cursors do.
pub struct MockNode {
    state: ClientState,
    connection_type: ConnectionType,
    keys: Vec<Vec<u8>>,
    deleted: Mutex<HashSet<Vec<u8>>>,
    denied: HashSet<Vec<u8>>,
    page_size: usize,
    scan_delay: Duration,
    drop_after_scans: Option<usize>,
    pipeline_timeout: AtomicBool,
    scans: AtomicUsize,
    pipelines: AtomicUsize,
    commands: Mutex<Vec<RedisCommand>>,
    disconnects: AtomicUsize,
}

impl MockNode {
    pub fn new(name: &str, keys: Vec<Vec<u8>>) -> Self {
        let state = ClientState::new(metadata(name));
        state.set_status(ClientStatus::Connected);
        Self {
            state,
            connection_type: ConnectionType::Standalone,
            keys,
            deleted: Mutex::new(HashSet::new()),
            denied: HashSet::new(),
            page_size: 10,
            scan_delay: Duration::ZERO,
            drop_after_scans: None,
            pipeline_timeout: AtomicBool::new(false),
            scans: AtomicUsize::new(0),
            pipelines: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    /// Keys returned per `SCAN` call, before `MATCH` filtering
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Commands whose first argument is `key` get an error reply
    pub fn deny(mut self, key: &str) -> Self {
        self.denied.insert(key.as_bytes().to_vec());
        self
    }

    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    /// The connection breaks on `SCAN` number `scans + 1`
    pub fn drop_after_scans(mut self, scans: usize) -> Self {
        self.drop_after_scans = Some(scans);
        self
    }

    pub fn time_out_pipelines(self) -> Self {
        self.pipeline_timeout.store(true, Ordering::SeqCst);
        self
    }

    pub fn remaining_keys(&self) -> usize {
        self.keys.len() - self.deleted.lock().len()
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn pipelines(&self) -> usize {
        self.pipelines.load(Ordering::SeqCst)
    }

    /// Commands executed other than `SCAN` and `DBSIZE`
    pub fn commands(&self) -> Vec<RedisCommand> {
        self.commands.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    async fn scan(&self, command: &RedisCommand) -> Result<Value> {
        let scans = self.scans.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.scan_delay).await;
        if self.drop_after_scans.is_some_and(|limit| scans >= limit) {
            self.state.set_status(ClientStatus::Error);
            return Err(RedscopeError::Connection("Connection reset by peer".to_string()));
        }

        let args = command.args();
        let cursor: usize = String::from_utf8_lossy(&args[0]).parse().unwrap_or(0);
        let pattern = args[2].as_slice();
        let end = (cursor + self.page_size).min(self.keys.len());
        let deleted = self.deleted.lock();
        let page = self.keys[cursor..end]
            .iter()
            .filter(|key| !deleted.contains(*key) && glob_match(pattern, key))
            .map(|key| Value::BulkString(key.clone()))
            .collect();
        let next = if end >= self.keys.len() { 0 } else { end };

        Ok(Value::Array(vec![
            Value::BulkString(next.to_string().into_bytes()),
            Value::Array(page),
        ]))
    }

    fn execute(&self, command: &RedisCommand) -> Result<Value> {
        self.commands.lock().push(command.clone());
        let key = command.args().first();
        if key.is_some_and(|key| self.denied.contains(key)) {
            return Err(RedscopeError::Command(
                "NOPERM this user has no permissions to access one of the keys".to_string(),
            ));
        }

        match (command.name(), key) {
            ("DEL", Some(key)) => {
                let exists = self.keys.contains(key);
                let inserted = exists && self.deleted.lock().insert(key.clone());
                Ok(Value::Int(i64::from(inserted)))
            }
            _ => Ok(Value::Okay),
        }
    }
}

#[async_trait]
impl RedisClient for MockNode {
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
        match command.name() {
            "SCAN" => self.scan(&command).await,
            "DBSIZE" => Ok(Value::Int(self.remaining_keys() as i64)),
            _ => self.execute(&command),
        }
    }

    async fn send_pipeline(&self, commands: Vec<RedisCommand>) -> Result<Vec<Result<Value>>> {
        self.pipelines.fetch_add(1, Ordering::SeqCst);
        if self.pipeline_timeout.load(Ordering::SeqCst) {
            return Err(RedscopeError::Timeout("Response timed out".to_string()));
        }
        Ok(commands.iter().map(|command| self.execute(command)).collect())
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

/// Cluster client over a set of primary nodes
pub struct MockCluster {
    state: ClientState,
    nodes: Vec<Arc<MockNode>>,
    disconnects: AtomicUsize,
}

impl MockCluster {
    pub fn new(nodes: Vec<MockNode>) -> Self {
        let state = ClientState::new(metadata("cluster"));
        state.set_status(ClientStatus::Connected);
        Self {
            state,
            nodes: nodes.into_iter().map(Arc::new).collect(),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn node(&self, index: usize) -> &Arc<MockNode> {
        &self.nodes[index]
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RedisClient for MockCluster {
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
        self.nodes[0].send_command(command).await
    }

    async fn send_pipeline(&self, _commands: Vec<RedisCommand>) -> Result<Vec<Result<Value>>> {
        Err(RedscopeError::Command(
            "CROSSSLOT Keys in request don't hash to the same slot".to_string(),
        ))
    }

    async fn nodes(self: Arc<Self>, _role: NodeRole) -> Result<Vec<Arc<dyn RedisClient>>> {
        Ok(self
            .nodes
            .iter()
            .map(|node| node.clone() as Arc<dyn RedisClient>)
            .collect())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.set_status(ClientStatus::Closed);
        Ok(())
    }
}

/// Emitter keeping every overview it receives
pub struct RecordingEmitter {
    owner_id: String,
    overviews: Mutex<Vec<BulkActionOverview>>,
    fail: bool,
}

impl RecordingEmitter {
    pub fn new(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            overviews: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Records overviews but reports every emit as failed
    pub fn failing(owner_id: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(owner_id)
        }
    }

    pub fn overviews(&self) -> Vec<BulkActionOverview> {
        self.overviews.lock().clone()
    }

    pub fn statuses(&self) -> Vec<BulkActionStatus> {
        self.overviews
            .lock()
            .iter()
            .map(|overview| overview.status)
            .collect()
    }
}

impl OverviewEmitter for RecordingEmitter {
    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn emit(&self, overview: &BulkActionOverview) -> Result<()> {
        self.overviews.lock().push(overview.clone());
        if self.fail {
            return Err(RedscopeError::Other("socket closed".to_string()));
        }
        Ok(())
    }
}

/// Let spawned tasks run without moving a paused clock
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
