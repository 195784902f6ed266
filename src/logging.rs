//! Structured logging setup
//!
//! Every dispatch logs through `tracing` with structured fields
//! (`operation`, `dispatch_id`, `path`, `status`, `latency_ms`). This module
//! installs a subscriber for binaries and test suites that want to see them.
//!
//! ## Environment Variables
//!
//! - `FAKE_TRANSPORT_LOG_LEVEL`: `trace`, `debug`, `info` (default), `warn`, `error`
//! - `FAKE_TRANSPORT_LOG_FORMAT`: `json` (default) or `pretty`
//! - `FAKE_TRANSPORT_LOG_FILTER`: extra comma-separated directives, e.g.
//!   `fake_transport::tracker=debug`
//! - `FAKE_TRANSPORT_LOG_LOCATION`: include file and line (`true`/`false`)
//!
//! `RUST_LOG` takes precedence over the level when set.

use anyhow::{Context, Result};
use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for CI logs, pretty-print for local runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Base level
    pub log_level: String,
    /// Output format
    pub format: LogFormat,
    /// Extra filter directives
    pub target_filter: Option<String>,
    /// Include file and line number
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::default_dev()
    }
}

impl LogConfig {
    /// Load from `FAKE_TRANSPORT_LOG_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("FAKE_TRANSPORT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: LogFormat::parse(
                &env::var("FAKE_TRANSPORT_LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
            ),
            target_filter: env::var("FAKE_TRANSPORT_LOG_FILTER").ok(),
            include_location: env::var("FAKE_TRANSPORT_LOG_LOCATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        }
    }

    /// Verbose, human-readable output.
    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            target_filter: None,
            include_location: true,
        }
    }

    fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level().as_str()));

        if let Some(target_filter) = &self.target_filter {
            for filter in target_filter.split(',') {
                let filter = filter.trim();
                if filter.is_empty() {
                    continue;
                }
                match filter.parse() {
                    Ok(directive) => env_filter = env_filter.add_directive(directive),
                    Err(_) => eprintln!("Warning: Invalid log filter directive: {filter}"),
                }
            }
        }
        env_filter
    }
}

/// Initialize logging from the environment.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LogConfig::from_env())
}

/// Initialize logging with an explicit configuration.
///
/// ```rust,no_run
/// use fake_transport::logging::{init_logging_with_config, LogConfig};
///
/// init_logging_with_config(&LogConfig::from_env())?;
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging_with_config(config: &LogConfig) -> Result<()> {
    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

static TEST_LOGGING: Once = Once::new();

/// Install a test-writer subscriber once per process.
///
/// Output is captured by the test harness and shown only for failing tests.
/// Safe to call from every test; later calls and an already installed
/// subscriber are ignored.
pub fn init_test_logging() {
    TEST_LOGGING.call_once(|| {
        let config = LogConfig::from_env();
        let _ = tracing_subscriber::registry()
            .with(config.env_filter())
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Json);
    }

    #[test]
    fn test_level_fallback() {
        let mut config = LogConfig::default_dev();
        assert_eq!(config.level(), Level::DEBUG);
        config.log_level = "loud".to_string();
        assert_eq!(config.level(), Level::INFO);
    }

    #[test]
    fn test_init_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::info!(component = "logging", "Test logging ready");
    }
}
