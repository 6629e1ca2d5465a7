//! JSON logging to the plugin log file.
//!
//! stdout belongs to the protocol envelope, so logs go to `log_path` when one
//! is configured and to stderr otherwise.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use libflexvol::PluginConfig;
use tracing_subscriber::EnvFilter;

pub fn init(config: &PluginConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_env_filter(filter);

    let installed = match &config.log_path {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create log dir {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
