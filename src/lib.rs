//! Verticut Library
//!
//! Segments a long-form source video into short vertically cropped (9:16)
//! clips. The engine detects the best encode capability of a [`MediaRuntime`]
//! once, runs one request at a time through the encoder pipeline and steps
//! down a tier whenever a backend cannot handle a clip, ending with a direct
//! key-frame-aligned bitstream copy.
//!
//! ```no_run
//! use std::sync::Arc;
//! use verticut::adapters::{SyntheticRuntime, SyntheticSource};
//! use verticut::{ClipOrchestrator, ClipRequest, EngineConfig};
//!
//! # async fn demo() -> verticut::ClipResult<()> {
//! let runtime = Arc::new(SyntheticRuntime::builder().build());
//! let orchestrator = ClipOrchestrator::new(runtime, &EngineConfig::default())?;
//! let source = SyntheticSource::new(320, 180, 30, 20).into_media();
//! let requests: Vec<ClipRequest> = vec!["00:00,00:05,Intro".parse()?];
//! let report = orchestrator.run_job(&source, &requests).await?;
//! println!("{} clips", report.clips.len());
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod planner;
pub mod ports;
pub mod utils;

// Re-export commonly used types
pub use app::{CancelHandle, ClipOrchestrator, JobOptions, JobReport, JobStatus};
pub use config::{EngineConfig, OutputPreset};
pub use domain::errors::FailureReason;
pub use domain::model::{
    CapabilityTier, ClipRequest, ContainerFormat, EncodedClip, MediaInfo, SourceMedia, TimeRange,
};
pub use error::{ClipError, ClipResult};
pub use ports::MediaRuntime;
