use anyhow::Result;
use colored::Colorize;
use sql_profiler::{config, server};
use std::path::Path;
use tracing::info;

/// Execute the serve command
///
/// Loads configuration and runs the server until a shutdown signal arrives.
pub async fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Starting SQL profiler demo server...".green());

    let cfg = config::load_config(config_path)?;

    if !cfg.profiler.enabled {
        println!("{}", "Profiling is disabled, requests pass through untouched".yellow());
    }
    info!(config = %config_path.display(), "Configuration loaded");

    server::start_server(cfg, config_path.to_path_buf()).await?;

    Ok(())
}
