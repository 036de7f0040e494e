//! Playdeck - headless media playback with per-file resume.
//!
//! A single worker thread owns the playback engine; the CLI drives it through
//! fire-and-forget commands and prints the notifications it sends back.

pub mod cli;
pub mod config;
pub mod error;
pub mod player;
pub mod resume;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr so they don't interleave with the time display
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("playdeck=info")))
        .init();

    cli::run_command(&args)
}
