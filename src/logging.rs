//! Tracing subscriber setup.
//!
//! Output goes to stderr, formatted as text or JSON lines. When
//! `logging.directory` is configured a daily-rolling file receives the same
//! events. `TASKBOARD_LOG` overrides the configured filter.

use anyhow::{Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSection;

pub const LOG_ENV_VAR: &str = "TASKBOARD_LOG";
const LOG_FILE_PREFIX: &str = "taskboard.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Pick the filter: `override_directive` if it parses, then the configured
/// level, then `info`.
pub fn resolve_filter(configured: &str, override_directive: Option<&str>) -> EnvFilter {
    override_directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_new(configured).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process so buffered file output is flushed.
pub fn init(config: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let env = std::env::var(LOG_ENV_VAR).ok();
    let filter = resolve_filter(&config.level, env.as_deref());

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    });

    let guard = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;
    Ok(guard)
}
