//! Dynamic logging configuration with reloadable filters and diagnostics.
//!
//! This module provides:
//! - Runtime log level changes via `tracing_subscriber::reload`
//! - Structured diagnostic records, broadcast live and persisted to a sink
//! - Log file retention cleanup (deletes logs older than 7 days)
//! - Local timezone timestamps for logs

mod diagnostics;

use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

pub use diagnostics::{DIAGNOSTICS_CHANNEL_CAPACITY, DiagnosticRecord, Severity};

use diagnostics::{DiagnosticsLayer, DiagnosticsState};

use crate::store::DiagnosticsSink;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "livewatch=info,onebot=info,sqlx=warn";

/// Log file name prefix; rolled files are suffixed with the date.
const LOG_FILE_PREFIX: &str = "livewatch.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Broadcast channel capacity for diagnostic records.
const LOG_BROADCAST_CAPACITY: usize = 1024;

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Logging configuration with reloadable filter and diagnostics routing.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_tx: broadcast::Sender<DiagnosticRecord>,
    log_dir: PathBuf,
    diagnostics: Arc<DiagnosticsState>,
}

impl LoggingConfig {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Set a new filter directive.
    ///
    /// # Arguments
    /// * `directive` - Filter string (e.g., "livewatch=debug,sqlx=warn")
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::Other(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    /// Subscribe to diagnostic records for real-time viewers.
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticRecord> {
        self.log_tx.subscribe()
    }

    /// Get the log directory path.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Persist records at or above `min_severity` to `sink`.
    ///
    /// Records older than `retention` are purged daily.
    pub fn attach_diagnostics_sink(
        &self,
        sink: Arc<dyn DiagnosticsSink>,
        min_severity: Severity,
        retention: Duration,
        cancel_token: CancellationToken,
    ) {
        diagnostics::attach_sink(
            &self.diagnostics,
            sink,
            min_severity,
            retention,
            cancel_token,
        );
        info!(min_severity = %min_severity, "Diagnostics sink attached");
    }

    /// Records dropped because the sink queue was full.
    pub fn dropped_diagnostics(&self) -> u64 {
        self.diagnostics.dropped()
    }

    /// Start the log retention cleanup task.
    ///
    /// Runs daily and deletes log files older than 7 days.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {
                        if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                            warn!(error = %e, "Failed to cleanup old logs");
                        }
                    }
                }
            }
        });
    }
}

/// Delete rolled log files older than the specified number of days.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let cutoff_date = cutoff.date_naive();
    let prefix = format!("{}.", LOG_FILE_PREFIX);

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(prefix.as_str()))
        else {
            continue;
        };

        if let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            && file_date < cutoff_date
        {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete old log file");
            } else {
                deleted_count += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

/// Log `error` at the severity its kind maps to.
pub fn report_error(
    error: &crate::Error,
    creator_id: Option<&str>,
    binding_id: Option<&str>,
    message: &str,
) {
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                creator_id = creator_id,
                binding_id = binding_id,
                error = %error,
                "{}",
                message
            )
        };
    }

    match error.severity() {
        Level::ERROR => emit!(Level::ERROR),
        Level::WARN => emit!(Level::WARN),
        Level::INFO => emit!(Level::INFO),
        Level::DEBUG => emit!(Level::DEBUG),
        _ => emit!(Level::TRACE),
    }
}

/// Initialize logging with reloadable filter and diagnostics capture.
///
/// # Arguments
/// * `log_dir` - Directory for log files
///
/// # Returns
/// Tuple of (LoggingConfig, WorkerGuard) - keep the guard alive for the app lifetime
pub fn init_logging(log_dir: &str) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_path = PathBuf::from(log_dir);
    std::fs::create_dir_all(&log_path)?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    let (log_tx, _) = broadcast::channel(LOG_BROADCAST_CAPACITY);
    let diagnostics = Arc::new(DiagnosticsState::default());
    let diagnostics_layer = DiagnosticsLayer::new(log_tx.clone(), diagnostics.clone());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .with(diagnostics_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_tx,
        log_dir: log_path,
        diagnostics,
    });

    Ok((config, guard))
}
