//! Value types shared by bulk actions, their runners and their overviews

use redscope_core::{RedscopeError, Result};
use redscope_driver_redis::{KeyType, ScanOptions};
use serde::{Deserialize, Serialize};

/// Most errors kept in a summary; older ones are dropped first
pub const MAX_SUMMARY_ERRORS: usize = 500;

const DEFAULT_SCAN_COUNT: u64 = 10_000;

/// Kind of bulk action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkActionType {
    Delete,
    Upload,
}

impl std::fmt::Display for BulkActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BulkActionType::Delete => write!(f, "delete"),
            BulkActionType::Upload => write!(f, "upload"),
        }
    }
}

/// Lifecycle status of a bulk action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkActionStatus {
    Initializing,
    Initialized,
    Preparing,
    Ready,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl BulkActionStatus {
    /// Completed, failed and aborted actions never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BulkActionStatus::Completed | BulkActionStatus::Failed | BulkActionStatus::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BulkActionStatus::Initializing => "initializing",
            BulkActionStatus::Initialized => "initialized",
            BulkActionStatus::Preparing => "preparing",
            BulkActionStatus::Ready => "ready",
            BulkActionStatus::Running => "running",
            BulkActionStatus::Completed => "completed",
            BulkActionStatus::Failed => "failed",
            BulkActionStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for BulkActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which keys a bulk action touches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkActionFilter {
    #[serde(rename = "match")]
    pub match_pattern: String,
    #[serde(rename = "type")]
    pub key_type: Option<KeyType>,
    /// `SCAN` count hint, never reported to clients
    #[serde(skip_serializing)]
    pub count: u64,
}

impl Default for BulkActionFilter {
    fn default() -> Self {
        Self {
            match_pattern: "*".to_string(),
            key_type: None,
            count: DEFAULT_SCAN_COUNT,
        }
    }
}

impl BulkActionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_match(mut self, pattern: impl Into<String>) -> Self {
        self.match_pattern = pattern.into();
        self
    }

    pub fn with_type(mut self, key_type: Option<KeyType>) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(RedscopeError::Configuration(
                "filter count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions::new()
            .with_pattern(self.match_pattern.as_str())
            .with_count(self.count)
            .with_key_type(self.key_type)
    }

    /// The filter as shown to clients
    pub fn view(&self) -> BulkActionFilterView {
        BulkActionFilterView {
            match_pattern: self.match_pattern.clone(),
            key_type: self.key_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkActionFilterView {
    #[serde(rename = "match")]
    pub match_pattern: String,
    #[serde(rename = "type")]
    pub key_type: Option<KeyType>,
}

/// Scan progress of one node, or of a whole action once summed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkActionProgress {
    pub total: u64,
    pub scanned: u64,
}

impl BulkActionProgress {
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub fn add_scanned(&mut self, count: u64) {
        self.scanned += count;
    }

    /// Close the scan. Keys created while scanning may push `processed`
    /// above the initial total.
    pub fn complete(&mut self, processed: u64) {
        self.total = self.total.max(processed);
        self.scanned = self.total;
    }

    pub fn merge(&mut self, other: &BulkActionProgress) {
        self.total += other.total;
        self.scanned += other.scanned;
    }
}

/// A key that could not be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkActionError {
    pub key: Vec<u8>,
    pub error: String,
}

impl BulkActionError {
    pub fn new(key: impl Into<Vec<u8>>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            error: error.into(),
        }
    }
}

/// Outcome counters of one node, or of a whole action once summed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkActionSummary {
    pub processed: u64,
    pub succeed: u64,
    pub failed: u64,
    /// Most recent first, at most [`MAX_SUMMARY_ERRORS`]
    pub errors: Vec<BulkActionError>,
}

impl BulkActionSummary {
    pub fn add_processed(&mut self, count: u64) {
        self.processed += count;
    }

    pub fn add_success(&mut self, count: u64) {
        self.succeed += count;
    }

    /// Count failures that carry no per-key detail
    pub fn add_failed(&mut self, count: u64) {
        self.failed += count;
    }

    /// Count one failure per error and keep the newest errors
    pub fn add_errors(&mut self, errors: Vec<BulkActionError>) {
        if errors.is_empty() {
            return;
        }
        self.failed += errors.len() as u64;
        let mut errors = errors;
        errors.reverse();
        errors.append(&mut self.errors);
        errors.truncate(MAX_SUMMARY_ERRORS);
        self.errors = errors;
    }

    /// Add another summary; error lists are concatenated and capped
    pub fn merge(&mut self, other: &BulkActionSummary) {
        self.processed += other.processed;
        self.succeed += other.succeed;
        self.failed += other.failed;
        let room = MAX_SUMMARY_ERRORS.saturating_sub(self.errors.len());
        self.errors.extend(other.errors.iter().take(room).cloned());
    }

    pub fn view(&self) -> BulkActionSummaryView {
        BulkActionSummaryView {
            processed: self.processed,
            succeed: self.succeed,
            failed: self.failed,
            errors: self
                .errors
                .iter()
                .map(|error| BulkActionErrorView {
                    key: String::from_utf8_lossy(&error.key).into_owned(),
                    error: error.error.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkActionErrorView {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkActionSummaryView {
    pub processed: u64,
    pub succeed: u64,
    pub failed: u64,
    pub errors: Vec<BulkActionErrorView>,
}

/// Snapshot of a bulk action pushed to its subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionOverview {
    pub id: String,
    pub database_id: String,
    #[serde(rename = "type")]
    pub action_type: BulkActionType,
    /// Milliseconds since the action was created, frozen once it ends
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub status: BulkActionStatus,
    pub filter: Option<BulkActionFilterView>,
    pub progress: Option<BulkActionProgress>,
    pub summary: BulkActionSummaryView,
}

/// Request to start a bulk action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBulkActionRequest {
    pub id: String,
    pub database_id: String,
    #[serde(rename = "type")]
    pub action_type: BulkActionType,
    #[serde(default)]
    pub filter: BulkActionFilter,
}

impl CreateBulkActionRequest {
    pub fn new(
        id: impl Into<String>,
        database_id: impl Into<String>,
        action_type: BulkActionType,
    ) -> Self {
        Self {
            id: id.into(),
            database_id: database_id.into(),
            action_type,
            filter: BulkActionFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: BulkActionFilter) -> Self {
        self.filter = filter;
        self
    }
}
