//! tracing subscriber setup for the binary.
//!
//! `RUST_LOG` wins when set; otherwise the level is `info`, or `debug`
//! with `--verbose`. Logs go to stderr so CLI output on stdout stays clean.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub fn init(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}
