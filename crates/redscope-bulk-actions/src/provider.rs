//! Registry of running bulk actions

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use redscope_connection::RedisClientProvider;
use redscope_core::{ClientContext, ClientMetadata, RedscopeError, Result, SessionMetadata};
use redscope_driver_redis::RedisClient;

use crate::{
    BulkAction, BulkActionRunner, BulkActionType, BulkActionsConfig, CreateBulkActionRequest,
    DeleteBulkActionRunner, OverviewEmitter,
};

type RunnerFactory = fn(Weak<BulkAction>, Arc<dyn RedisClient>) -> Arc<dyn BulkActionRunner>;

fn runner_factory(action_type: BulkActionType) -> Result<RunnerFactory> {
    match action_type {
        BulkActionType::Delete => Ok(DeleteBulkActionRunner::create),
        BulkActionType::Upload => Err(RedscopeError::Configuration(
            "Upload actions are started through the import service".to_string(),
        )),
    }
}

/// Owns every bulk action by id and starts new ones
pub struct BulkActionsProvider {
    actions: DashMap<String, Arc<BulkAction>>,
    clients: Arc<RedisClientProvider>,
    config: BulkActionsConfig,
}

impl BulkActionsProvider {
    pub fn new(clients: Arc<RedisClientProvider>, config: BulkActionsConfig) -> Self {
        Self {
            actions: DashMap::new(),
            clients,
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Register, prepare and start a new action.
    ///
    /// An action that cannot be prepared or started is failed and dropped
    /// from the registry, so its id may be reused.
    #[tracing::instrument(skip_all, fields(id = %request.id, database_id = %request.database_id, action_type = %request.action_type))]
    pub async fn create(
        &self,
        session: &SessionMetadata,
        request: CreateBulkActionRequest,
        emitter: Arc<dyn OverviewEmitter>,
    ) -> Result<Arc<BulkAction>> {
        request.filter.validate()?;
        let make_runner = runner_factory(request.action_type)?;

        let action = match self.actions.entry(request.id.clone()) {
            Entry::Occupied(_) => {
                return Err(RedscopeError::Duplicate(
                    "You already have bulk action with such id".to_string(),
                ));
            }
            Entry::Vacant(entry) => {
                let action = BulkAction::new(
                    request.id.clone(),
                    request.database_id.clone(),
                    request.action_type,
                    request.filter,
                    emitter,
                    self.config.overview_interval(),
                );
                entry.insert(action.clone());
                action
            }
        };

        let metadata = ClientMetadata::new(
            session.clone(),
            request.database_id.as_str(),
            ClientContext::Common,
        );
        if let Err(err) = self.prepare_and_start(&action, &metadata, make_runner).await {
            self.actions
                .remove_if(&request.id, |_, registered| Arc::ptr_eq(registered, &action));
            action.fail(err.to_string());
            return Err(err);
        }

        tracing::info!(owner_id = %action.emitter().owner_id(), "bulk action started");
        Ok(action)
    }

    async fn prepare_and_start(
        &self,
        action: &Arc<BulkAction>,
        metadata: &ClientMetadata,
        make_runner: RunnerFactory,
    ) -> Result<()> {
        let client = self.clients.get_or_create_client(metadata).await?;
        action.prepare(client, make_runner).await?;
        action.start()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<BulkAction>> {
        self.actions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RedscopeError::NotFound("Unable to find bulk action".to_string()))
    }

    /// Abort the action and forget it
    pub fn abort(&self, id: &str) -> Result<Arc<BulkAction>> {
        let (_, action) = self
            .actions
            .remove(id)
            .ok_or_else(|| RedscopeError::NotFound("Unable to find bulk action".to_string()))?;
        action.abort();
        Ok(action)
    }

    /// Abort every action created by `owner_id`; returns how many were aborted
    pub fn abort_users_bulk_actions(&self, owner_id: &str) -> usize {
        let ids: Vec<String> = self
            .actions
            .iter()
            .filter(|entry| entry.value().emitter().owner_id() == owner_id)
            .map(|entry| entry.key().clone())
            .collect();

        let aborted = ids.iter().filter(|id| self.abort(id).is_ok()).count();
        if aborted > 0 {
            tracing::info!(owner_id, aborted, "aborted bulk actions of disconnected owner");
        }
        aborted
    }
}
