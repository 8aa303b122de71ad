//! Pool of live Redis clients
//!
//! Clients are keyed by the id derived from their metadata, so every
//! distinct `ClientMetadata` maps to at most one pooled client. A background
//! sweep evicts clients that have not been used for a while.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use redscope_core::{ClientMetadata, ClientMetadataFilter, Result};
use redscope_driver_redis::RedisClient;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ClientsConfig;


type ClientMap = DashMap<String, Arc<dyn RedisClient>>;

/// Shortest sweep period; `tokio::time::interval` rejects a zero period
const MIN_IDLE_SYNC_INTERVAL: Duration = Duration::from_millis(1);

/// Concurrent store of pooled clients.
///
/// The pool is the only owner allowed to disconnect a pooled client. Map
/// guards are never held across an `.await`: entries are cloned or removed
/// first and disconnected afterwards.
pub struct RedisClientStorage {
    clients: Arc<ClientMap>,
    max_idle_threshold: Duration,
    idle_sync_interval: Duration,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RedisClientStorage {
    /// Create an empty pool. The idle sweep starts with [`start`](Self::start).
    pub fn new(config: &ClientsConfig) -> Self {
        let idle_sync_interval = config.idle_sync_interval();
        if idle_sync_interval < MIN_IDLE_SYNC_INTERVAL {
            tracing::warn!(
                interval_ms = idle_sync_interval.as_millis() as u64,
                "idle sync interval too short, using 1ms"
            );
        }

        Self {
            clients: Arc::new(DashMap::new()),
            max_idle_threshold: config.max_idle_threshold(),
            idle_sync_interval: idle_sync_interval.max(MIN_IDLE_SYNC_INTERVAL),
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Spawn the idle sweep on the current runtime. Calling it again while
    /// the sweep runs does nothing.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() || self.shutdown.is_cancelled() {
            return;
        }

        let clients = self.clients.clone();
        let shutdown = self.shutdown.clone();
        let threshold = self.max_idle_threshold;
        let period = self.idle_sync_interval;

        *sweeper = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("client pool sweep stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        sync_idle_clients(&clients, threshold).await;
                    }
                }
            }
        }));

        tracing::debug!(
            interval_ms = period.as_millis() as u64,
            threshold_ms = threshold.as_millis() as u64,
            "client pool sweep started"
        );
    }

    /// Stop the sweep and disconnect every pooled client
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }

        let ids: Vec<String> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        let removed = self.remove_ids(ids).await;
        tracing::info!(clients = removed, "client pool shut down");
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// Evict clients idle for longer than the threshold right away
    pub async fn sync_clients(&self) -> usize {
        sync_idle_clients(&self.clients, self.max_idle_threshold).await
    }

    /// Connected client for `id`, marked as used.
    ///
    /// A client that lost its connection is evicted and `None` returned.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn RedisClient>> {
        let client = self.clients.get(id).map(|entry| entry.value().clone())?;

        if client.is_connected() {
            client.touch();
            return Some(client);
        }

        let removed = self
            .clients
            .remove_if(id, |_, pooled| Arc::ptr_eq(pooled, &client))
            .is_some();
        if removed {
            tracing::debug!(client_id = %id, status = ?client.status(), "evicting disconnected client");
            disconnect_quietly(client.as_ref()).await;
        }
        None
    }

    pub async fn get_by_metadata(
        &self,
        metadata: &ClientMetadata,
    ) -> Result<Option<Arc<dyn RedisClient>>> {
        let id = metadata.validated_client_id()?;
        Ok(self.get(&id).await)
    }

    /// Store `client` and return the client that ended up in the pool.
    ///
    /// When a connected client with the same id is already pooled it wins
    /// and `client` is disconnected; a pooled client that lost its
    /// connection is replaced and disconnected instead.
    pub async fn set(&self, client: Arc<dyn RedisClient>) -> Result<Arc<dyn RedisClient>> {
        let id = client.metadata().validated_client_id()?;

        let (survivor, loser) = match self.clients.entry(id.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(client.clone());
                (client, None)
            }
            Entry::Occupied(mut entry) => {
                let existing = entry.get().clone();
                if Arc::ptr_eq(&existing, &client) {
                    (existing, None)
                } else if existing.is_connected() {
                    (existing, Some(client))
                } else {
                    entry.insert(client.clone());
                    (client, Some(existing))
                }
            }
        };

        if let Some(loser) = loser {
            tracing::debug!(client_id = %id, "client already pooled, disconnecting the duplicate");
            disconnect_quietly(loser.as_ref()).await;
        }

        survivor.touch();
        Ok(survivor)
    }

    /// Remove and disconnect the client with `id`; returns how many were
    /// removed (0 or 1)
    pub async fn remove(&self, id: &str) -> usize {
        match self.clients.remove(id) {
            Some((_, client)) => {
                disconnect_quietly(client.as_ref()).await;
                1
            }
            None => 0,
        }
    }

    pub async fn remove_by_metadata(&self, metadata: &ClientMetadata) -> Result<usize> {
        let id = metadata.validated_client_id()?;
        Ok(self.remove(&id).await)
    }

    /// Remove every client whose metadata matches all fields set on
    /// `filter`. An empty filter removes everything.
    pub async fn remove_many_by_metadata(&self, filter: &ClientMetadataFilter) -> usize {
        let ids = self.find_clients(filter);
        let removed = self.remove_ids(ids).await;
        tracing::debug!(?filter, removed, "removed clients by metadata");
        removed
    }

    /// Ids of the pooled clients matching `filter`
    pub fn find_clients(&self, filter: &ClientMetadataFilter) -> Vec<String> {
        self.clients
            .iter()
            .filter(|entry| filter.matches(entry.value().metadata()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    async fn remove_ids(&self, ids: Vec<String>) -> usize {
        let removed: Vec<Arc<dyn RedisClient>> = ids
            .iter()
            .filter_map(|id| self.clients.remove(id).map(|(_, client)| client))
            .collect();

        let count = removed.len();
        futures::future::join_all(
            removed
                .iter()
                .map(|client| disconnect_quietly(client.as_ref())),
        )
        .await;
        count
    }
}

impl Drop for RedisClientStorage {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

/// Remove clients whose last use is older than `threshold`.
///
/// A client touched between the scan and the removal is kept.
async fn sync_idle_clients(clients: &ClientMap, threshold: Duration) -> usize {
    let idle: Vec<String> = clients
        .iter()
        .filter(|entry| entry.value().last_time_used().elapsed() > threshold)
        .map(|entry| entry.key().clone())
        .collect();

    let evicted: Vec<Arc<dyn RedisClient>> = idle
        .iter()
        .filter_map(|id| {
            clients
                .remove_if(id, |_, client| client.last_time_used().elapsed() > threshold)
                .map(|(_, client)| client)
        })
        .collect();

    for client in &evicted {
        tracing::debug!(client_id = %client.id(), "evicting idle client");
        disconnect_quietly(client.as_ref()).await;
    }

    if !evicted.is_empty() {
        tracing::info!(evicted = evicted.len(), remaining = clients.len(), "idle clients evicted");
    }
    evicted.len()
}

async fn disconnect_quietly(client: &dyn RedisClient) {
    if let Err(err) = client.disconnect().await {
        tracing::warn!(client_id = %client.id(), error = %err, "failed to disconnect client");
    }
}
