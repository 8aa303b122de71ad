//! Per-node workers of a bulk action

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use redscope_core::{RedscopeError, Result};
use redscope_driver_redis::{RedisClient, RedisCommand, ScanPage, reply_to_i64};

use crate::{BulkAction, BulkActionError, BulkActionProgress, BulkActionSummary};

/// Work a bulk action performs on one node
#[async_trait]
pub trait BulkActionRunner: Send + Sync {
    /// Collect what is needed before the action starts, such as the key count
    async fn prepare_to_start(&self) -> Result<()>;

    /// Process the node until done or until the owner stops running.
    ///
    /// Errors returned here are systemic and fail the whole action.
    async fn run(&self) -> Result<()>;

    fn progress(&self) -> BulkActionProgress;

    fn summary(&self) -> BulkActionSummary;
}

/// Deletes every key of one node matching the owner's filter
pub struct DeleteBulkActionRunner {
    owner: Weak<BulkAction>,
    node: Arc<dyn RedisClient>,
    progress: Mutex<BulkActionProgress>,
    summary: Mutex<BulkActionSummary>,
}

impl DeleteBulkActionRunner {
    pub fn new(owner: Weak<BulkAction>, node: Arc<dyn RedisClient>) -> Self {
        Self {
            owner,
            node,
            progress: Mutex::new(BulkActionProgress::default()),
            summary: Mutex::new(BulkActionSummary::default()),
        }
    }

    /// Runner factory for [`BulkAction::prepare`]
    pub fn create(owner: Weak<BulkAction>, node: Arc<dyn RedisClient>) -> Arc<dyn BulkActionRunner> {
        Arc::new(Self::new(owner, node))
    }

    /// The owner, while it is still running
    fn running_owner(&self) -> Option<Arc<BulkAction>> {
        self.owner.upgrade().filter(|owner| owner.is_running())
    }

    async fn delete_keys(&self, keys: Vec<Vec<u8>>) -> Result<()> {
        let commands = keys
            .iter()
            .map(|key| RedisCommand::new("DEL").arg(key.as_slice()))
            .collect();

        let replies = match self.node.send_pipeline(commands).await {
            Ok(replies) => replies,
            Err(err) if err.is_connection_error() => return Err(err),
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(node = %self.node.id(), keys = keys.len(), error = %message, "delete batch failed");
                let mut summary = self.summary.lock();
                summary.add_processed(keys.len() as u64);
                summary.add_errors(
                    keys.into_iter()
                        .map(|key| BulkActionError::new(key, message.as_str()))
                        .collect(),
                );
                return Ok(());
            }
        };

        let mut succeed = 0;
        let mut errors = Vec::new();
        for (key, reply) in keys.into_iter().zip(replies) {
            match reply {
                Ok(_) => succeed += 1,
                Err(err) => errors.push(BulkActionError::new(key, command_error_message(&err))),
            }
        }

        let mut summary = self.summary.lock();
        summary.add_processed(succeed + errors.len() as u64);
        summary.add_success(succeed);
        summary.add_errors(errors);
        Ok(())
    }
}

#[async_trait]
impl BulkActionRunner for DeleteBulkActionRunner {
    async fn prepare_to_start(&self) -> Result<()> {
        let reply = self.node.send_command(RedisCommand::new("DBSIZE")).await?;
        let total = reply_to_i64(&reply)?;
        self.progress.lock().set_total(total.max(0) as u64);
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let Some(owner) = self.owner.upgrade() else {
            return Ok(());
        };
        let filter = owner.filter().clone();
        drop(owner);

        let scan = filter.scan_options();
        let mut cursor = 0;
        loop {
            let Some(owner) = self.running_owner() else {
                tracing::debug!(node = %self.node.id(), "runner stopped, owner no longer running");
                return Ok(());
            };

            let reply = self.node.send_command(scan.to_command(cursor)).await?;
            let page = ScanPage::from_reply(&reply)?;
            self.progress.lock().add_scanned(filter.count);

            let last = page.is_last();
            let next = page.cursor;
            if !page.keys.is_empty() {
                self.delete_keys(page.keys).await?;
            }
            owner.change_state();

            if last {
                break;
            }
            cursor = next;
        }

        let processed = self.summary.lock().processed;
        self.progress.lock().complete(processed);
        Ok(())
    }

    fn progress(&self) -> BulkActionProgress {
        *self.progress.lock()
    }

    fn summary(&self) -> BulkActionSummary {
        self.summary.lock().clone()
    }
}

/// Error text as Redis sent it, without our own prefix
fn command_error_message(err: &RedscopeError) -> String {
    match err {
        RedscopeError::Command(message) => message.clone(),
        other => other.to_string(),
    }
}
