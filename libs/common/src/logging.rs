//! Unified logging module
//!
//! Console output uses a compact `timestamp [LEVEL] message` format. When a log
//! directory is configured, the same events are also written to a daily rolling
//! file (`{dir}/{service}.log.YYYY-MM-DD`), optionally as JSON lines.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
pub fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Sync started`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Global guard for keeping the file writer alive
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Global log root directory (initialized once from config or env)
/// Priority: CONTENT_SYNC_LOG_DIR env > config value
static LOG_ROOT: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Environment variable overriding the log directory
pub const LOG_DIR_ENV: &str = "CONTENT_SYNC_LOG_DIR";

/// Initialize log root directory from config or environment
///
/// Must be called before [`init_with_config`] to take effect. Returns the
/// directory that will be used, `None` meaning console-only logging.
pub fn init_log_root(config_dir: Option<&str>) -> Option<PathBuf> {
    LOG_ROOT
        .get_or_init(|| {
            std::env::var(LOG_DIR_ENV)
                .ok()
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .or_else(|| config_dir.map(PathBuf::from))
        })
        .clone()
}

/// Get log root directory, `None` when only console logging is configured
pub fn get_log_root() -> Option<PathBuf> {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var(LOG_DIR_ENV)
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
    })
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as the default filter target and file prefix
    pub service_name: String,
    /// Directory for rolling log files (`None` = console only)
    pub log_dir: Option<PathBuf>,
    /// Console and file log level
    pub level: Level,
    /// Write file logs as JSON lines
    pub enable_json: bool,
    /// Colored console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "content_sync".to_string(),
            log_dir: get_log_root(),
            level: Level::INFO,
            enable_json: false,
            ansi: true,
        }
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise `{level},{service}={level}`
fn build_filter(config: &LogConfig) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(env_str) if !env_str.is_empty() => EnvFilter::new(env_str),
        _ => {
            let level = config.level.to_string().to_lowercase();
            EnvFilter::new(format!(
                "{level},{service}={level},sqlx=warn",
                service = config.service_name.replace('-', "_")
            ))
        },
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
            match guards.lock() {
                Ok(mut guards) => guards.push(guard),
                Err(poisoned) => {
                    eprintln!("Warning: GUARDS lock was poisoned, recovering...");
                    poisoned.into_inner().push(guard);
                },
            }

            let layer = if config.enable_json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_level(true)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(build_filter(&config))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// Console-only init at the given level
pub fn init(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig {
        level: level.parse().unwrap_or(Level::INFO),
        log_dir: None,
        ..Default::default()
    };
    init_with_config(config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_format_level_brackets() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::WARN), "[WARN]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_filter_uses_service_target() {
        let config = LogConfig {
            service_name: "content-sync".to_string(),
            log_dir: None,
            level: Level::DEBUG,
            enable_json: false,
            ansi: false,
        };
        if std::env::var("RUST_LOG").is_err() {
            let filter = build_filter(&config).to_string();
            assert!(filter.contains("content_sync=debug"));
        }
    }

    #[test]
    fn test_global_subscriber_installs_once() {
        assert!(init("debug").is_ok());
        assert!(init("info").is_err());
    }
}
