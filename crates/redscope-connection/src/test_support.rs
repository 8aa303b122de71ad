//! Mock clients and connectors shared by the unit tests

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::Value;
use redscope_core::{ClientMetadata, ConnectionType, Endpoint, RedscopeError, Result};
use redscope_driver_redis::{
    ClientState, ClientStatus, ConnectionOptions, NodeConnector, NodeRole, NodeTarget,
    RedisClient, RedisCommand,
};
use tokio::time::Instant;

/// Mock client recording disconnects and answering every command with OK,
/// except `SENTINEL get-master-addr-by-name` which returns `master`
pub struct MockRedisClient {
    state: ClientState,
    connection_type: ConnectionType,
    master: Option<Endpoint>,
    connected: AtomicBool,
    disconnects: AtomicUsize,
    fail_disconnect: AtomicBool,
}

impl MockRedisClient {
    pub fn new(metadata: ClientMetadata) -> Arc<Self> {
        Self::with_type(metadata, ConnectionType::Standalone, None)
    }

    pub fn with_type(
        metadata: ClientMetadata,
        connection_type: ConnectionType,
        master: Option<Endpoint>,
    ) -> Arc<Self> {
        let state = ClientState::new(metadata);
        state.set_status(ClientStatus::Connected);
        Arc::new(Self {
            state,
            connection_type,
            master,
            connected: AtomicBool::new(true),
            disconnects: AtomicUsize::new(0),
            fail_disconnect: AtomicBool::new(false),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_disconnect(&self) {
        self.fail_disconnect.store(true, Ordering::SeqCst);
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RedisClient for MockRedisClient {
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
        if self.connected.load(Ordering::SeqCst) {
            self.state.status()
        } else {
            ClientStatus::Error
        }
    }

    fn last_time_used(&self) -> Instant {
        self.state.last_time_used()
    }

    fn touch(&self) {
        self.state.touch()
    }

    async fn send_command(&self, command: RedisCommand) -> Result<Value> {
        if command.name().eq_ignore_ascii_case("SENTINEL") {
            return Ok(match &self.master {
                Some(master) => Value::Array(vec![
                    Value::BulkString(master.host.clone().into_bytes()),
                    Value::BulkString(master.port.to_string().into_bytes()),
                ]),
                None => Value::Nil,
            });
        }
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
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(RedscopeError::Connection("Can't disconnect".to_string()));
        }
        Ok(())
    }
}

/// Mock connector refusing some ports and recording every attempt
pub struct MockConnector {
    name: &'static str,
    refused_ports: HashSet<u16>,
    /// Reply of sentinels to the master address lookup
    master: Option<Endpoint>,
    attempts: Mutex<Vec<(Endpoint, ConnectionType)>>,
}

impl MockConnector {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            refused_ports: HashSet::new(),
            master: None,
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing(mut self, port: u16) -> Self {
        self.refused_ports.insert(port);
        self
    }

    pub fn with_master(mut self, master: Endpoint) -> Self {
        self.master = Some(master);
        self
    }

    pub fn attempts(&self) -> Vec<(Endpoint, ConnectionType)> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl NodeConnector for MockConnector {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn connect(
        &self,
        target: &NodeTarget,
        _options: &ConnectionOptions,
    ) -> Result<Arc<dyn RedisClient>> {
        self.attempts
            .lock()
            .push((target.endpoint.clone(), target.connection_type));

        if self.refused_ports.contains(&target.endpoint.port) {
            return Err(RedscopeError::Connection(format!(
                "Connection refused: {}",
                target.endpoint
            )));
        }

        Ok(MockRedisClient::with_type(
            target.metadata.clone(),
            target.connection_type,
            self.master.clone(),
        ))
    }
}

/// A local port nothing listens on
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
