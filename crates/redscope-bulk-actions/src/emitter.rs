//! Delivery of bulk action overviews to their subscriber

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use redscope_core::{RedscopeError, Result};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::BulkActionOverview;

/// Receives overviews of the actions created by one owner (a socket, a
/// user session). Failures are logged by the caller and never stop an action.
pub trait OverviewEmitter: Send + Sync {
    /// Owner the actions belong to
    fn owner_id(&self) -> &str;

    fn emit(&self, overview: &BulkActionOverview) -> Result<()>;
}

/// One overview tagged with the owner it is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewEvent {
    pub owner_id: String,
    pub overview: BulkActionOverview,
}

/// Emitter forwarding overviews into an mpsc channel
pub struct ChannelOverviewEmitter {
    owner_id: String,
    sender: mpsc::UnboundedSender<OverviewEvent>,
}

impl ChannelOverviewEmitter {
    pub fn new(owner_id: impl Into<String>, sender: mpsc::UnboundedSender<OverviewEvent>) -> Self {
        Self {
            owner_id: owner_id.into(),
            sender,
        }
    }

    /// Emitter plus the receiving end of a fresh channel
    pub fn channel(owner_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<OverviewEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(owner_id, sender), receiver)
    }
}

impl OverviewEmitter for ChannelOverviewEmitter {
    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn emit(&self, overview: &BulkActionOverview) -> Result<()> {
        self.sender
            .send(OverviewEvent {
                owner_id: self.owner_id.clone(),
                overview: overview.clone(),
            })
            .map_err(|_| {
                RedscopeError::Other(format!("Overview receiver of {} is gone", self.owner_id))
            })
    }
}

/// Rate limiter for overview broadcasts.
///
/// The first request in a quiet period runs `emit` right away; requests
/// arriving within the following window collapse into one trailing call at
/// the end of it.
pub struct OverviewDebouncer {
    dirty: Arc<AtomicBool>,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
}

impl OverviewDebouncer {
    /// Spawn the debounce task. Must be called within a tokio runtime.
    pub fn spawn<F>(window: Duration, emit: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let dirty = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        tokio::spawn(debounce_loop(
            window,
            dirty.clone(),
            notify.clone(),
            shutdown.clone(),
            emit,
        ));

        Self {
            dirty,
            notify,
            shutdown,
        }
    }

    /// Ask for an emit within the current window
    pub fn request(&self) {
        self.dirty.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Drop pending requests and end the task
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for OverviewDebouncer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn debounce_loop<F>(
    window: Duration,
    dirty: Arc<AtomicBool>,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
    emit: F,
) where
    F: Fn() + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            _ = notify.notified() => {}
        }

        while !shutdown.is_cancelled() && dirty.swap(false, Ordering::AcqRel) {
            emit();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(window) => {}
            }
        }
    }
}
