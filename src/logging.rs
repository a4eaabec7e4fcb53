//! Logging initialization.
//!
//! Every log line goes to stdout (colored) and is appended to the reactor log
//! file (plain). `RUST_LOG` overrides the default `info` filter.

use anyhow::Result;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used. A log file
/// that cannot be opened is not fatal: logging continues on stdout alone.
pub fn init_tracing(log_path: &Path) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, file_error) = match open_log_file(log_path) {
        Ok(file) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_ansi(true).with_target(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {}", e))?;

    if let Some(e) = file_error {
        warn!(path = %log_path.display(), error = %e, "unable to open log file, logging to stdout only");
    }

    Ok(())
}
