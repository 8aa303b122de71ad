//! A bulk action spread over every primary node of a database

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future::try_join_all;
use futures::stream::FuturesUnordered;
use parking_lot::{Mutex, RwLock};
use redscope_core::{RedscopeError, Result};
use redscope_driver_redis::{NodeRole, RedisClient};
use tokio::time::Instant;

use crate::{
    BulkActionFilter, BulkActionOverview, BulkActionProgress, BulkActionRunner, BulkActionStatus,
    BulkActionSummary, BulkActionType, OverviewDebouncer, OverviewEmitter,
};

struct Lifecycle {
    status: BulkActionStatus,
    end_time: Option<Instant>,
    error: Option<String>,
}

/// One bulk action: its runners, its lifecycle and its overview broadcasts.
///
/// Status only moves forward through
/// `Initializing → Initialized → Preparing → Ready → Running` and then to one
/// of the terminal statuses, which are final.
pub struct BulkAction {
    id: String,
    database_id: String,
    action_type: BulkActionType,
    filter: BulkActionFilter,
    emitter: Arc<dyn OverviewEmitter>,
    created_at: DateTime<Utc>,
    start_time: Instant,
    lifecycle: Mutex<Lifecycle>,
    runners: RwLock<Vec<Arc<dyn BulkActionRunner>>>,
    /// Held while an overview is built and sent, so a debounced overview
    /// never overtakes the terminal one
    emit_lock: Mutex<()>,
    debouncer: OverviewDebouncer,
}

impl BulkAction {
    /// Create an action in the `Initialized` status. Must be called within a
    /// tokio runtime; overviews are broadcast at most once per `overview_interval`.
    pub fn new(
        id: impl Into<String>,
        database_id: impl Into<String>,
        action_type: BulkActionType,
        filter: BulkActionFilter,
        emitter: Arc<dyn OverviewEmitter>,
        overview_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<BulkAction>| {
            let this = this.clone();
            let debouncer = OverviewDebouncer::spawn(overview_interval, move || {
                if let Some(action) = this.upgrade() {
                    action.send_overview();
                }
            });

            Self {
                id: id.into(),
                database_id: database_id.into(),
                action_type,
                filter,
                emitter,
                created_at: Utc::now(),
                start_time: Instant::now(),
                lifecycle: Mutex::new(Lifecycle {
                    status: BulkActionStatus::Initialized,
                    end_time: None,
                    error: None,
                }),
                runners: RwLock::new(Vec::new()),
                emit_lock: Mutex::new(()),
                debouncer,
            }
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub fn action_type(&self) -> BulkActionType {
        self.action_type
    }

    pub fn filter(&self) -> &BulkActionFilter {
        &self.filter
    }

    pub fn emitter(&self) -> &Arc<dyn OverviewEmitter> {
        &self.emitter
    }

    /// Wall clock time the action was created at
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> BulkActionStatus {
        self.lifecycle.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == BulkActionStatus::Running
    }

    /// Message of the error that failed the action
    pub fn error(&self) -> Option<String> {
        self.lifecycle.lock().error.clone()
    }

    pub fn runners(&self) -> Vec<Arc<dyn BulkActionRunner>> {
        self.runners.read().clone()
    }

    /// Build one runner per primary node of `client` and prepare them all
    #[tracing::instrument(skip_all, fields(id = %self.id, database_id = %self.database_id))]
    pub async fn prepare<F>(
        self: &Arc<Self>,
        client: Arc<dyn RedisClient>,
        make_runner: F,
    ) -> Result<()>
    where
        F: Fn(Weak<BulkAction>, Arc<dyn RedisClient>) -> Arc<dyn BulkActionRunner> + Send + Sync,
    {
        self.transition(
            BulkActionStatus::Initialized,
            BulkActionStatus::Preparing,
            "prepare",
        )?;

        let nodes = client.nodes(NodeRole::Primary).await?;
        let runners: Vec<_> = nodes
            .into_iter()
            .map(|node| make_runner(Arc::downgrade(self), node))
            .collect();
        *self.runners.write() = runners.clone();

        try_join_all(runners.iter().map(|runner| runner.prepare_to_start())).await?;

        tracing::debug!(runners = runners.len(), "bulk action prepared");
        self.set_status(BulkActionStatus::Ready);
        Ok(())
    }

    /// Start the runners in the background and return the current overview
    pub fn start(self: &Arc<Self>) -> Result<BulkActionOverview> {
        self.transition(BulkActionStatus::Ready, BulkActionStatus::Running, "start")?;
        tokio::spawn(self.clone().run());
        Ok(self.get_overview())
    }

    /// Run every runner to the end and settle the final status.
    ///
    /// The first runner error fails the action right away; the other runners
    /// see it before their next batch and stop.
    pub async fn run(self: Arc<Self>) {
        self.set_status(BulkActionStatus::Running);

        let runners = self.runners();
        let mut running: FuturesUnordered<_> =
            runners.iter().map(|runner| runner.run()).collect();
        while let Some(result) = running.next().await {
            if let Err(err) = result {
                self.fail(err.to_string());
            }
        }

        self.set_status(BulkActionStatus::Completed);
    }

    /// Stop the action; runners notice before their next batch
    pub fn abort(&self) {
        self.set_status(BulkActionStatus::Aborted);
    }

    /// Fail the action and remember why
    pub fn fail(&self, error: impl Into<String>) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.status.is_terminal() {
                return;
            }
            lifecycle.error = Some(error.into());
        }
        self.set_status(BulkActionStatus::Failed);
    }

    /// Move from `from` to the non-terminal `to` in one step
    fn transition(&self, from: BulkActionStatus, to: BulkActionStatus, verb: &str) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.status != from {
                return Err(RedscopeError::BulkActionLifecycle(format!(
                    "Unable to {} bulk action with \"{}\" status",
                    verb, lifecycle.status
                )));
            }
            lifecycle.status = to;
        }
        self.change_state();
        Ok(())
    }

    /// Move to `status` unless the action already ended
    pub fn set_status(&self, status: BulkActionStatus) {
        let ended = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.status.is_terminal() {
                return;
            }
            lifecycle.status = status;
            if status.is_terminal() && lifecycle.end_time.is_none() {
                lifecycle.end_time = Some(Instant::now());
            }
            status.is_terminal()
        };

        if ended {
            self.debouncer.stop();
            let overview = {
                let _emitting = self.emit_lock.lock();
                let overview = self.get_overview();
                self.emit(&overview);
                overview
            };
            self.log_outcome(&overview);
        } else {
            self.change_state();
        }
    }

    /// Ask for a rate limited overview broadcast
    pub fn change_state(&self) {
        self.debouncer.request();
    }

    /// Current snapshot with the progress and summary of every runner summed
    pub fn get_overview(&self) -> BulkActionOverview {
        let (status, end_time) = {
            let lifecycle = self.lifecycle.lock();
            (lifecycle.status, lifecycle.end_time)
        };

        let mut progress = BulkActionProgress::default();
        let mut summary = BulkActionSummary::default();
        for runner in self.runners.read().iter() {
            progress.merge(&runner.progress());
            summary.merge(&runner.summary());
        }

        let end = end_time.unwrap_or_else(Instant::now);
        BulkActionOverview {
            id: self.id.clone(),
            database_id: self.database_id.clone(),
            action_type: self.action_type,
            duration_ms: end.duration_since(self.start_time).as_millis() as u64,
            status,
            filter: Some(self.filter.view()),
            progress: Some(progress),
            summary: summary.view(),
        }
    }

    /// Debounced broadcast; the terminal overview is sent by `set_status`
    fn send_overview(&self) {
        let _emitting = self.emit_lock.lock();
        let overview = self.get_overview();
        if overview.status.is_terminal() {
            return;
        }
        self.emit(&overview);
    }

    fn emit(&self, overview: &BulkActionOverview) {
        if let Err(err) = self.emitter.emit(overview) {
            tracing::warn!(id = %self.id, owner_id = %self.emitter.owner_id(), error = %err, "unable to send bulk action overview");
        }
    }

    fn log_outcome(&self, overview: &BulkActionOverview) {
        let summary = &overview.summary;
        match overview.status {
            BulkActionStatus::Failed => {
                let error = self.error().unwrap_or_default();
                tracing::warn!(
                    id = %self.id,
                    database_id = %self.database_id,
                    action_type = %self.action_type,
                    duration_ms = overview.duration_ms,
                    processed = summary.processed,
                    failed = summary.failed,
                    error = %error,
                    "bulk action failed"
                )
            }
            status => tracing::info!(
                id = %self.id,
                database_id = %self.database_id,
                action_type = %self.action_type,
                status = %status,
                duration_ms = overview.duration_ms,
                processed = summary.processed,
                succeed = summary.succeed,
                failed = summary.failed,
                "bulk action finished"
            ),
        }
    }
}
