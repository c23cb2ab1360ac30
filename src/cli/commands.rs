//! Command implementations

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adapters::SyntheticRuntime;
use crate::app::{ClipOrchestrator, JobOptions, JobReport, JobStatus};
use crate::cli::{Backend, ClipArgs, Cli, Commands, ProbeArgs};
use crate::config::{EngineConfig, OutputPreset};
use crate::domain::model::{CapabilityTier, ClipRequest, MediaInfo, SourceMedia};
use crate::engine::{progress_fn, CapabilityDetector, ProgressUpdate};
use crate::error::ClipResult;
use crate::ports::MediaRuntime;
use crate::utils::format_file_size;

/// Configuration with command-line overrides applied on top of file and
/// environment
pub fn resolve_config(cli: &Cli) -> ClipResult<EngineConfig> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.parse()?;
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.parse()?;
    }
    if let Commands::Clip(args) = &cli.command {
        if let Some(preset) = &args.preset {
            config.preset = preset.clone();
        }
        if let Some(tier) = &args.max_tier {
            config.max_tier = Some(tier.parse()?);
        }
    }
    config.validate()?;
    Ok(config)
}

/// Media runtime for the selected backend
pub fn open_runtime(backend: Backend) -> Result<Arc<dyn MediaRuntime>> {
    match backend {
        Backend::Synthetic => Ok(Arc::new(SyntheticRuntime::builder().build())),
        Backend::Auto | Backend::Libav => open_libav(),
    }
}

#[cfg(feature = "libav")]
fn open_libav() -> Result<Arc<dyn MediaRuntime>> {
    let runtime = crate::adapters::LibavRuntime::new().context("Failed to initialize libav")?;
    Ok(Arc::new(runtime))
}

#[cfg(not(feature = "libav"))]
fn open_libav() -> Result<Arc<dyn MediaRuntime>> {
    anyhow::bail!(
        "verticut was built without the `libav` feature; rebuild with `--features libav` \
         to process real media, or pass `--backend synthetic` for IVF test patterns"
    )
}

/// Dispatch a parsed command line
pub async fn run(cli: Cli, config: EngineConfig) -> Result<()> {
    let runtime = open_runtime(cli.backend)?;
    info!(backend = runtime.name(), "Media runtime ready");
    match cli.command {
        Commands::Clip(args) => clip(args, &config, runtime).await,
        Commands::Probe(args) => probe(args, &config, runtime).await,
    }
}

#[derive(Serialize)]
struct ClipCommandOutput<'a> {
    report: &'a JobReport,
    files: Vec<PathBuf>,
}

/// Execute the clip command
pub async fn clip(args: ClipArgs, config: &EngineConfig, runtime: Arc<dyn MediaRuntime>) -> Result<()> {
    let requests = args
        .clips
        .iter()
        .map(|value| {
            value.parse::<ClipRequest>()
                .with_context(|| format!("Invalid --clip '{}'", value))
        })
        .collect::<Result<Vec<_>>>()?;

    let source = SourceMedia::from_file(&args.input)
        .await
        .with_context(|| format!("Failed to read input file {}", args.input.display()))?;
    info!(
        input = %args.input.display(),
        size = %format_file_size(source.len() as u64),
        clips = requests.len(),
        "Source loaded"
    );

    let orchestrator = ClipOrchestrator::new(runtime, config)?;
    info!(preset = %orchestrator.preset(), "Output preset");

    let mut options = JobOptions::default().with_progress(Arc::new(progress_fn(|update: ProgressUpdate| {
        debug!(
            phase = ?update.phase,
            percent = update.progress_percent,
            "{}",
            update.message
        );
    })));
    if let Some(secs) = args.timeout {
        options = options.with_deadline(tokio::time::Instant::now() + Duration::from_secs(secs));
    }

    let report = orchestrator.run_job_with(&source, &requests, options).await?;
    let files = write_clips(&report, &args.out_dir).await?;

    let output = ClipCommandOutput {
        report: &report,
        files,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    for failure in &report.failures {
        warn!(index = failure.index, label = %failure.label, reason = %failure.reason, "{}", failure.message);
    }
    match report.status {
        JobStatus::Failed => anyhow::bail!("No clip could be produced"),
        JobStatus::Cancelled => anyhow::bail!("Job stopped before every clip was attempted"),
        JobStatus::Completed => Ok(()),
    }
}

async fn write_clips(report: &JobReport, out_dir: &Path) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let mut used = HashSet::new();
    let mut files = Vec::with_capacity(report.clips.len());
    for clip in &report.clips {
        let path = unique_path(out_dir, &clip.suggested_filename(), &mut used);
        tokio::fs::write(&path, &clip.bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), size = %format_file_size(clip.len() as u64), "Clip written");
        files.push(path);
    }
    Ok(files)
}

/// `name` inside `dir`, suffixed with a counter if an earlier clip took it
fn unique_path(dir: &Path, name: &str, used: &mut HashSet<String>) -> PathBuf {
    let mut candidate = name.to_string();
    let mut counter = 2;
    while !used.insert(candidate.clone()) {
        candidate = match name.rsplit_once('.') {
            Some((stem, ext)) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", name, counter),
        };
        counter += 1;
    }
    dir.join(candidate)
}

#[derive(Serialize)]
struct ProbeOutput<'a> {
    runtime: &'a str,
    tier: CapabilityTier,
    preset: OutputPreset,
    media: MediaInfo,
}

/// Execute the probe command
pub async fn probe(args: ProbeArgs, config: &EngineConfig, runtime: Arc<dyn MediaRuntime>) -> Result<()> {
    let source = SourceMedia::from_file(&args.input)
        .await
        .with_context(|| format!("Failed to read input file {}", args.input.display()))?;
    let media = runtime
        .probe_media(&source)
        .await
        .context("Failed to probe input file")?;
    let tier = CapabilityDetector::new(Arc::clone(&runtime))
        .with_max_tier(config.max_tier)
        .detect()
        .await;
    runtime.release(source.id()).await;

    let output = ProbeOutput {
        runtime: runtime.name(),
        tier,
        preset: config.output_preset()?,
        media,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_path_suffixes_duplicates() {
        let mut used = HashSet::new();
        let dir = Path::new("out");
        assert_eq!(unique_path(dir, "Intro.mp4", &mut used), dir.join("Intro.mp4"));
        assert_eq!(unique_path(dir, "Intro.mp4", &mut used), dir.join("Intro_2.mp4"));
        assert_eq!(unique_path(dir, "Intro.mp4", &mut used), dir.join("Intro_3.mp4"));
    }

    #[test]
    fn test_cli_overrides_win() {
        use clap::Parser;

        let cli = Cli::parse_from([
            "verticut",
            "--log-level",
            "debug",
            "clip",
            "--input",
            "in.mp4",
            "--clip",
            "00:00,00:10,A",
            "--preset",
            "whatsapp",
            "--max-tier",
            "canvas-recorder",
        ]);
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.preset, "whatsapp");
        assert_eq!(config.max_tier, Some(CapabilityTier::CanvasRecorder));
        assert_eq!(config.logging.level.as_str(), "debug");
    }
}
