//! Logging goes to a file or nowhere, never the console: stdout carries the
//! vector and stderr carries only the failure lines.
//!
//! - **EMBEDDER_LOG**: filter, e.g. `debug` or `embedder=debug,ort=warn`. Default: `info`.
//! - **EMBEDDER_LOG_FILE**: when set, logs are appended there as plain text.
//!   When unset no subscriber is installed and events are discarded.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const FILTER_ENV: &str = "EMBEDDER_LOG";
const FILE_ENV: &str = "EMBEDDER_LOG_FILE";

pub fn init() -> Result<()> {
    let file = std::env::var_os(FILE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    install(file, filter)?;
    Ok(())
}

/// Installs the file subscriber. Returns whether one was installed.
fn install(file: Option<PathBuf>, filter: EnvFilter) -> Result<bool> {
    let Some(path) = file else {
        return Ok(false);
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .with_filter(filter);
    tracing_subscriber::registry().with(layer).try_init()?;
    tracing::debug!(path = %path.display(), "logging to file");
    Ok(true)
}
