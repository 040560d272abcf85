//! `taskboard serve`.

use anyhow::Result;
use taskboard::config::TaskboardConfig;

pub async fn cmd_serve(config: TaskboardConfig) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    match &config.source {
        Some(path) => tracing::info!(config = %path.display(), "Loaded configuration"),
        None => tracing::info!("No taskboard.toml found, using defaults"),
    }
    taskboard::server::start_server(config).await
}
