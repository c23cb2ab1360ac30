//! Command-line argument definitions

use std::path::PathBuf;

use clap::{Args, ValueEnum};

/// Media runtime the commands run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// libav when compiled in
    Auto,
    /// FFmpeg libraries (requires the `libav` feature)
    Libav,
    /// Built-in test pattern runtime reading IVF files
    Synthetic,
}

/// Arguments for the clip command
#[derive(Args, Debug)]
pub struct ClipArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Clip as START,END,LABEL (MM:SS or HH:MM:SS); repeatable
    #[arg(short, long = "clip", value_name = "START,END,LABEL", required = true)]
    pub clips: Vec<String>,

    /// Directory the clips are written to
    #[arg(short, long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Output preset (whatsapp, tiktok, instagram, default)
    #[arg(long)]
    pub preset: Option<String>,

    /// Highest capability tier to use (hardware-frame-encoder, canvas-recorder, remux-only)
    #[arg(long)]
    pub max_tier: Option<String>,

    /// Stop starting new clips after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Arguments for the probe command
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,
}
