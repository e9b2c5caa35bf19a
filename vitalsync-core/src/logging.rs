//! Logging for vitalsync
//!
//! Sync runs log one `Sync started` / `Sync complete` (or `Sync failed`) pair
//! with the user id, score, failure class and duration, plus a line per retry
//! pass. Everything goes to `~/.local/state/vitalsync/vitalsync.log`; stdout
//! is left to the CLI's own output.
//!
//! The HTTP client stack logs every connection at debug, which would bury
//! the sync lines, so its targets are held at `warn` unless the configured
//! filter names them explicitly.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "vitalsync.log";

/// Targets pulled in by the dashboard client.
const HTTP_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

/// Filter directives for `level`, with the HTTP client targets capped at
/// `warn` unless `level` already mentions them.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim();
    let mut directives = if level.is_empty() {
        "info".to_string()
    } else {
        level.to_string()
    };

    for target in HTTP_TARGETS {
        let named = directives
            .split(',')
            .any(|d| d.trim().split('=').next() == Some(*target));
        if !named {
            directives.push_str(&format!(",{}=warn", target));
        }
    }
    directives
}

/// Build the filter: `RUST_LOG` wins, then the configured level.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(filter_directives(&config.level)).map_err(|e| {
        Error::Config(format!("invalid logging.level {:?}: {}", config.level, e))
    })
}

/// Initialize the logging system
///
/// Daily rotation in the XDG state directory, keeping at most `max_files`.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(build_filter(config)?)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install subscriber: {}", e)))?;

    tracing::info!(
        log_file = %log_file_path().display(),
        level = %config.level,
        max_files = config.max_files,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Keeps the background writer alive; dropping it flushes pending lines.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Path of the current log file, as shown by `vitalsync status`.
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_targets_capped_at_warn() {
        assert_eq!(
            filter_directives("debug"),
            "debug,hyper=warn,hyper_util=warn,reqwest=warn,h2=warn,rustls=warn"
        );
        assert!(filter_directives("  ").starts_with("info,hyper=warn"));
    }

    #[test]
    fn test_explicit_http_target_is_kept() {
        let directives = filter_directives("info,reqwest=trace");
        assert!(directives.contains("reqwest=trace"));
        assert!(!directives.contains("reqwest=warn"));
        assert!(directives.contains("hyper=warn"));
    }

    #[test]
    fn test_configured_level_must_parse() {
        let config = LoggingConfig {
            level: "vitalsync_core=loud".to_string(),
            ..LoggingConfig::default()
        };
        // Only meaningful when the environment does not override the level.
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(build_filter(&config), Err(Error::Config(_))));
        }
        assert!(EnvFilter::try_new(filter_directives("vitalsync_core=debug")).is_ok());
    }

    #[test]
    fn test_log_file_lives_in_state_dir() {
        let path = log_file_path();
        assert!(path.ends_with("vitalsync.log"));
        assert!(path.starts_with(Config::state_dir()));
    }
}
