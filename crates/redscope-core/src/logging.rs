//! Logging and tracing setup
//!
//! Builds a `tracing` subscriber with:
//! - Pretty console output for development
//! - Optional JSON output to daily-rotated files
//! - Filtering through `RUST_LOG`, falling back to the configured default

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const DEFAULT_FILTER: &str = "info,redscope_core=debug,redscope_driver_redis=debug,redscope_connection=debug,redscope_bulk_actions=debug";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory where JSON log files are written
    pub log_dir: PathBuf,

    /// Whether to write JSON logs to files
    pub enable_json_logs: bool,

    /// Whether to enable pretty console output
    pub enable_console_logs: bool,

    /// Whether to include file/line information in logs
    pub include_location: bool,

    /// Whether to log span open/close events
    pub enable_spans: bool,

    /// Default log level filter
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            enable_json_logs: false,
            enable_console_logs: true,
            include_location: cfg!(debug_assertions),
            enable_spans: cfg!(debug_assertions),
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl LoggingConfig {
    /// JSON logs to files, no console output
    pub fn production() -> Self {
        Self {
            log_dir: default_log_dir(),
            enable_json_logs: true,
            enable_console_logs: false,
            include_location: false,
            enable_spans: false,
            default_filter: "warn,redscope_connection=info,redscope_bulk_actions=info".to_string(),
        }
    }

    pub fn development() -> Self {
        Self::default()
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }
}

/// Keeps the background log writer alive; logs may be lost once dropped
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global subscriber with the given configuration
pub fn init(config: LoggingConfig) -> anyhow::Result<LoggingGuard> {
    // RUST_LOG takes precedence over the default filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();
    let mut file_guard = None;

    if config.enable_console_logs {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events.clone())
            .with_ansi(true)
            .pretty()
            .with_filter(env_filter.clone())
            .boxed();

        layers.push(console_layer);
    }

    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;

        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "redscope.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();

        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::info!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        console_enabled = config.enable_console_logs,
        "Logging system initialized"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Initialize logging with the configuration matching the build profile
pub fn init_default() -> anyhow::Result<LoggingGuard> {
    let config = if cfg!(debug_assertions) {
        LoggingConfig::development()
    } else {
        LoggingConfig::production()
    };

    init(config)
}

fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("redscope").join("logs")
}
