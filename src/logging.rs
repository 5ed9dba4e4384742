//! `tracing` subscriber setup.
//!
//! `RUST_LOG` overrides `[logging].level` when set. Output goes to stderr
//! so answers on stdout stay clean.

use anyhow::{anyhow, bail, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("invalid log level '{}': {}", config.level, e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.format.as_str() {
        "text" => builder.try_init(),
        "json" => builder.json().try_init(),
        other => bail!("Unknown log format: {}", other),
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
