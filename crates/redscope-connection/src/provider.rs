//! Get-or-create access to pooled clients

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use redscope_core::{
    ClientMetadata, ClientMetadataFilter, ConnectionType, Database, DatabaseRepository,
    RedscopeError, Result,
};
use redscope_driver_redis::RedisClient;

use crate::{RedisClientFactory, RedisClientStorage};

/// Hands out pooled clients, creating them on first use.
///
/// Concurrent requests for the same metadata are serialized per client id,
/// so only one connection is opened for them; requests for different ids
/// never wait on each other.
pub struct RedisClientProvider {
    repository: Arc<dyn DatabaseRepository>,
    factory: Arc<RedisClientFactory>,
    storage: Arc<RedisClientStorage>,
    creating: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl RedisClientProvider {
    pub fn new(
        repository: Arc<dyn DatabaseRepository>,
        factory: Arc<RedisClientFactory>,
        storage: Arc<RedisClientStorage>,
    ) -> Self {
        Self {
            repository,
            factory,
            storage,
            creating: DashMap::new(),
        }
    }

    pub fn factory(&self) -> &Arc<RedisClientFactory> {
        &self.factory
    }

    pub fn storage(&self) -> &Arc<RedisClientStorage> {
        &self.storage
    }

    /// Pooled client for `metadata`, connecting to the database from the
    /// repository when none is pooled yet
    #[tracing::instrument(skip_all, fields(database_id = %metadata.database_id, context = %metadata.context))]
    pub async fn get_or_create_client(
        &self,
        metadata: &ClientMetadata,
    ) -> Result<Arc<dyn RedisClient>> {
        self.get_or_create(metadata, None).await
    }

    /// Same as [`get_or_create_client`](Self::get_or_create_client) with a
    /// database descriptor supplied by the caller
    #[tracing::instrument(skip_all, fields(database_id = %metadata.database_id, context = %metadata.context))]
    pub async fn get_or_create_client_for(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
    ) -> Result<Arc<dyn RedisClient>> {
        if metadata.database_id != database.id {
            return Err(RedscopeError::InvalidClientMetadata(format!(
                "client metadata targets database {} but {} was given",
                metadata.database_id, database.id
            )));
        }
        self.get_or_create(metadata, Some(database)).await
    }

    async fn get_or_create(
        &self,
        metadata: &ClientMetadata,
        database: Option<&Database>,
    ) -> Result<Arc<dyn RedisClient>> {
        let id = metadata.validated_client_id()?;
        if let Some(client) = self.storage.get(&id).await {
            return Ok(client);
        }

        let lock = self
            .creating
            .entry(id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            match self.storage.get(&id).await {
                Some(client) => Ok(client),
                None => self.connect_and_store(metadata, database).await,
            }
        };

        // Nobody else waits on this id once only the map and `lock` hold it
        self.creating
            .remove_if(&id, |_, pending| Arc::strong_count(pending) <= 2);
        result
    }

    async fn connect_and_store(
        &self,
        metadata: &ClientMetadata,
        database: Option<&Database>,
    ) -> Result<Arc<dyn RedisClient>> {
        let client = match database {
            Some(database) => self.connect(metadata, database).await?,
            None => self.create_client(metadata).await?,
        };
        let client = self.storage.set(client).await?;
        tracing::info!(client_id = %client.id(), connection_type = %client.connection_type(), "redis client created");
        Ok(client)
    }

    /// Create a client that is not pooled. The caller owns it and must
    /// disconnect it when done.
    pub async fn create_client(&self, metadata: &ClientMetadata) -> Result<Arc<dyn RedisClient>> {
        metadata.validate()?;
        let database = self.repository.get(&metadata.database_id).await?;
        self.connect(metadata, &database).await
    }

    async fn connect(
        &self,
        metadata: &ClientMetadata,
        database: &Database,
    ) -> Result<Arc<dyn RedisClient>> {
        let client = match self.factory.create_client(metadata, database).await {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(database_id = %database.id, error = %err, "unable to connect to database");
                return Err(err);
            }
        };

        if database.connection_type == ConnectionType::NotConnected {
            let detected = client.connection_type();
            if let Err(err) = self
                .repository
                .update_connection_type(&database.id, detected)
                .await
            {
                tracing::warn!(database_id = %database.id, error = %err, "unable to store detected connection type");
            }
        }

        Ok(client)
    }

    /// Remove and disconnect every pooled client matching `filter`
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_clients(&self, filter: &ClientMetadataFilter) -> usize {
        self.storage.remove_many_by_metadata(filter).await
    }
}

/// Database repository kept in memory
#[derive(Default)]
pub struct InMemoryDatabaseRepository {
    databases: DashMap<String, Database>,
}

impl InMemoryDatabaseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, database: Database) {
        self.databases.insert(database.id.clone(), database);
    }

    pub fn remove(&self, database_id: &str) -> Option<Database> {
        self.databases.remove(database_id).map(|(_, database)| database)
    }
}

#[async_trait]
impl DatabaseRepository for InMemoryDatabaseRepository {
    async fn get(&self, database_id: &str) -> Result<Database> {
        self.databases
            .get(database_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RedscopeError::NotFound(format!("Database {}", database_id)))
    }

    async fn update_connection_type(
        &self,
        database_id: &str,
        connection_type: ConnectionType,
    ) -> Result<()> {
        let mut database = self
            .databases
            .get_mut(database_id)
            .ok_or_else(|| RedscopeError::NotFound(format!("Database {}", database_id)))?;
        database.connection_type = connection_type;
        Ok(())
    }
}
