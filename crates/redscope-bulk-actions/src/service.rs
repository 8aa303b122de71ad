//! Operations offered to API handlers

use std::sync::Arc;

use redscope_core::{Result, SessionMetadata};

use crate::{BulkActionOverview, BulkActionsProvider, CreateBulkActionRequest, OverviewEmitter};

pub struct BulkActionsService {
    provider: Arc<BulkActionsProvider>,
}

impl BulkActionsService {
    pub fn new(provider: Arc<BulkActionsProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<BulkActionsProvider> {
        &self.provider
    }

    /// Start a bulk action; its overviews go to `emitter`
    pub async fn create_bulk_action(
        &self,
        session: &SessionMetadata,
        request: CreateBulkActionRequest,
        emitter: Arc<dyn OverviewEmitter>,
    ) -> Result<BulkActionOverview> {
        let action = self.provider.create(session, request, emitter).await?;
        Ok(action.get_overview())
    }

    pub fn get_bulk_action_overview(&self, id: &str) -> Result<BulkActionOverview> {
        Ok(self.provider.get(id)?.get_overview())
    }

    pub fn abort_bulk_action(&self, id: &str) -> Result<BulkActionOverview> {
        Ok(self.provider.abort(id)?.get_overview())
    }

    /// The owner went away: abort whatever it left running
    pub fn disconnect(&self, owner_id: &str) -> usize {
        self.provider.abort_users_bulk_actions(owner_id)
    }
}
