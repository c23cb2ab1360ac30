//! Verticut
//!
//! Cuts short vertical (9:16) clips out of a long source video. Each clip is
//! encoded at the best capability tier the machine offers (hardware H.264 to
//! MP4, then VP9/VP8 to WebM, then a lossless key-frame-aligned copy), falling
//! back one tier at a time when a backend fails.
//!
//! # Usage
//!
//! ```bash
//! verticut clip --input talk.mp4 --clip "00:00,00:15,Intro" --clip "01:10,01:40,Demo" --out-dir clips
//! verticut probe --input talk.mp4
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use verticut::cli::{commands, Cli};
use verticut::utils::logging::init_logging;

/// Main entry point for the Verticut CLI application
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = commands::resolve_config(&cli).context("Invalid configuration")?;
    init_logging(&config.logging)?;
    info!("Starting Verticut");

    commands::run(cli, config).await?;

    info!("Verticut completed successfully");
    Ok(())
}
