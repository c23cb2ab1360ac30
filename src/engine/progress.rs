//! Progress reporting for clip jobs
//!
//! The pipeline reports its own percentage for the clip in flight; a
//! [`JobProgress`] folds that into a single job-wide stream that never goes
//! backwards, and forwards it to a caller supplied [`ProgressSink`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

/// Phase of work a progress update refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    /// Probing the source and detecting capability
    Preparing,
    /// Selecting parameters and opening the encoder
    Configuring,
    /// Encoding composited frames
    Encoding,
    /// Draining the encoder and finishing the container
    Flushing,
    /// Copying compressed packets
    Remuxing,
    /// All requests attempted
    Complete,
    /// Job stopped at a request boundary
    Cancelled,
}

impl ProgressPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressPhase::Preparing => "preparing",
            ProgressPhase::Configuring => "configuring",
            ProgressPhase::Encoding => "encoding",
            ProgressPhase::Flushing => "flushing",
            ProgressPhase::Remuxing => "remuxing",
            ProgressPhase::Complete => "complete",
            ProgressPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub phase: ProgressPhase,
    /// 0.0 - 100.0
    pub progress_percent: f32,
    /// Human readable detail, e.g. the clip label
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(phase: ProgressPhase, progress_percent: f32, message: impl Into<String>) -> Self {
        Self {
            phase,
            progress_percent: progress_percent.clamp(0.0, 100.0),
            message: message.into(),
        }
    }
}

/// Consumer of progress updates
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Closure sink, built with [`progress_fn`]
pub struct FnProgress<F>(F);

/// Wrap a closure as a [`ProgressSink`]
pub fn progress_fn<F>(f: F) -> FnProgress<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    FnProgress(f)
}

impl<F> ProgressSink for FnProgress<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.0)(update)
    }
}

impl ProgressSink for mpsc::UnboundedSender<ProgressUpdate> {
    fn report(&self, update: ProgressUpdate) {
        // a dropped receiver just means nobody is watching
        let _ = self.send(update);
    }
}

impl ProgressSink for watch::Sender<ProgressUpdate> {
    fn report(&self, update: ProgressUpdate) {
        self.send_replace(update);
    }
}

/// Sink that drops every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Job-wide aggregation of per-clip progress.
///
/// Overall percent is `(index + clip_percent / 100) / total * 100`, clamped so
/// the emitted value never decreases.
pub struct JobProgress {
    sink: Arc<dyn ProgressSink>,
    total: usize,
    index: usize,
    label: String,
    last_percent: f32,
}

impl JobProgress {
    pub fn new(sink: Arc<dyn ProgressSink>, total: usize) -> Self {
        Self {
            sink,
            total,
            index: 0,
            label: String::new(),
            last_percent: 0.0,
        }
    }

    /// Move to request `index`, announcing it at its starting percentage
    pub fn begin_request(&mut self, index: usize, label: &str) {
        self.index = index;
        self.label = label.to_string();
        self.clip(ProgressPhase::Preparing, 0.0);
    }

    /// Progress of the clip in flight, 0 - 100
    pub fn clip(&mut self, phase: ProgressPhase, clip_percent: f32) {
        let overall = self.overall(clip_percent);
        self.emit(phase, overall);
    }

    /// Emit a job-level phase without moving the percentage
    pub fn phase(&mut self, phase: ProgressPhase) {
        let percent = self.last_percent;
        self.emit(phase, percent);
    }

    /// Final update for a job that attempted every request
    pub fn complete(&mut self) {
        self.emit(ProgressPhase::Complete, 100.0);
    }

    pub fn last_percent(&self) -> f32 {
        self.last_percent
    }

    fn overall(&self, clip_percent: f32) -> f32 {
        if self.total == 0 {
            return 100.0;
        }
        let fraction = clip_percent.clamp(0.0, 100.0) / 100.0;
        (self.index as f32 + fraction) / self.total as f32 * 100.0
    }

    fn emit(&mut self, phase: ProgressPhase, percent: f32) {
        let percent = percent.clamp(0.0, 100.0).max(self.last_percent);
        self.last_percent = percent;
        self.sink
            .report(ProgressUpdate::new(phase, percent, self.label.clone()));
    }
}

/// Adapter handed to a single pipeline run; reports clip-relative progress
pub struct ClipProgress<'a> {
    job: Option<&'a mut JobProgress>,
}

impl<'a> ClipProgress<'a> {
    pub fn new(job: &'a mut JobProgress) -> Self {
        Self { job: Some(job) }
    }

    /// Progress that goes nowhere, for standalone pipeline runs
    pub fn detached() -> Self {
        Self { job: None }
    }

    pub fn report(&mut self, phase: ProgressPhase, clip_percent: f32) {
        if let Some(job) = self.job.as_deref_mut() {
            job.clip(phase, clip_percent);
        }
    }
}
