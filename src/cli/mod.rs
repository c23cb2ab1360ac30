//! CLI module for Verticut
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

pub use args::{Backend, ClipArgs, ProbeArgs};

/// Verticut
///
/// Cuts a long video into short vertical (9:16) clips, using the best encoder
/// the machine offers and falling back to lower tiers when one fails.
#[derive(Parser, Debug)]
#[command(name = "verticut")]
#[command(about = "Vertical short-clip cutter with tiered encoder fallback")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Configuration file (defaults to ./verticut.toml when present)
    #[arg(long, global = true, env = "VERTICUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Media backend
    #[arg(long, global = true, value_enum, default_value_t = Backend::Auto, env = "VERTICUT_BACKEND")]
    pub backend: Backend,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cut one or more clips out of a source video
    Clip(ClipArgs),
    /// Show the detected capability tier and source media information
    Probe(ProbeArgs),
}
