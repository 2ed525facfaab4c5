//! Logging setup on top of `tracing-subscriber`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Initialization options for logging
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set (e.g. "info", "vtunnel_core=debug")
    pub default_filter: String,
    pub format: LogFormat,
    /// Include thread IDs in text output
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            format: LogFormat::Text,
            thread_ids: false,
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_filter`. A second call is a no-op so tests
/// and embedders can call this freely.
pub fn init_logging(config: &LoggingConfig) -> Result<(), anyhow::Error> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))?;

    let fmt_layer = match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_thread_ids(config.thread_ids)
            .with_target(true)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .boxed(),
    };

    if Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        tracing::debug!(format = ?config.format, "Logging initialized");
    }
    Ok(())
}

/// Minimal logging setup: info level, no targets.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
