//! Redscope Bulk Actions - cluster-wide bulk delete and bulk upload
//!
//! A bulk action scans every primary node of a database in parallel, one
//! runner per node, and reports its aggregated progress to the owner that
//! created it. Uploads execute a text file of Redis commands in batches.

mod bulk_action;
mod config;
mod emitter;
mod import;
mod models;
mod provider;
mod runner;
mod service;
#[cfg(test)]
mod test_support;

pub use bulk_action::BulkAction;
pub use config::BulkActionsConfig;
pub use emitter::{ChannelOverviewEmitter, OverviewDebouncer, OverviewEmitter, OverviewEvent};
pub use import::BulkImportService;
pub use models::*;
pub use provider::BulkActionsProvider;
pub use runner::{BulkActionRunner, DeleteBulkActionRunner};
pub use service::BulkActionsService;
