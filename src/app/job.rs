// Clip job - Lifecycle, cancellation and the per-job report

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::errors::FailureReason;
use crate::domain::model::{ClipRequest, EncodedClip, SourceId};
use crate::engine::progress::{NullProgress, ProgressSink};
use crate::error::ClipError;

/// Lifecycle of one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Final outcome of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Every request was attempted and at least one clip came out
    Completed,
    /// Requests existed but none produced a clip
    Failed,
    /// Stopped at a request boundary
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One request that did not produce a clip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipFailure {
    pub index: usize,
    pub label: String,
    pub reason: FailureReason,
    /// Display form of the underlying error
    pub message: String,
}

impl ClipFailure {
    pub fn new(index: usize, request: &ClipRequest, error: &ClipError) -> Self {
        Self {
            index,
            label: request.label.clone(),
            reason: error.reason(),
            message: error.to_string(),
        }
    }
}

/// Result of a job: clips and failures in request order
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub source_id: SourceId,
    pub status: JobStatus,
    pub clips: Vec<EncodedClip>,
    pub failures: Vec<ClipFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    /// Failure recorded for request `index`, if any
    pub fn failure(&self, index: usize) -> Option<&ClipFailure> {
        self.failures.iter().find(|f| f.index == index)
    }

    /// Clip produced for request `index`, if any
    pub fn clip(&self, index: usize) -> Option<&EncodedClip> {
        self.clips.iter().find(|c| c.index == index)
    }
}

/// One run over a source. Mutated only by the orchestrator.
#[derive(Debug)]
pub struct ClipJob {
    id: Uuid,
    source_id: SourceId,
    state: JobState,
    started_at: DateTime<Utc>,
    clips: Vec<EncodedClip>,
    failures: Vec<ClipFailure>,
}

impl ClipJob {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            state: JobState::Created,
            started_at: Utc::now(),
            clips: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn start(&mut self) {
        self.state = JobState::Running;
        self.started_at = Utc::now();
    }

    pub fn record_clip(&mut self, clip: EncodedClip) {
        self.clips.push(clip);
    }

    pub fn record_failure(&mut self, failure: ClipFailure) {
        self.failures.push(failure);
    }

    /// Leave `Running` and produce the report
    pub fn finish(mut self, cancelled: bool, requested: usize) -> JobReport {
        let status = if cancelled {
            JobStatus::Cancelled
        } else if self.clips.is_empty() && requested > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        self.state = match status {
            JobStatus::Completed => JobState::Completed,
            JobStatus::Failed => JobState::Failed,
            JobStatus::Cancelled => JobState::Cancelled,
        };
        self.clips.sort_by_key(|c| c.index);
        self.failures.sort_by_key(|f| f.index);

        JobReport {
            job_id: self.id,
            source_id: self.source_id,
            status,
            clips: self.clips,
            failures: self.failures,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Cooperative cancellation flag, checked between requests
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-call options for a job
#[derive(Clone)]
pub struct JobOptions {
    pub progress: Arc<dyn ProgressSink>,
    pub cancel: CancelHandle,
    /// Stop at the first request boundary after this instant
    pub deadline: Option<Instant>,
}

impl JobOptions {
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Whether the job must stop at this boundary
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            progress: Arc::new(NullProgress),
            cancel: CancelHandle::new(),
            deadline: None,
        }
    }
}

impl fmt::Debug for JobOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobOptions")
            .field("cancel", &self.cancel)
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{SourceMedia, TimeRange};
    use std::time::Duration;

    fn request(label: &str) -> ClipRequest {
        ClipRequest::new(TimeRange::new(Duration::ZERO, Duration::from_secs(1)), label)
    }

    #[test]
    fn test_status_without_clips_is_failed() {
        let source = SourceMedia::new(Vec::new(), "video/mp4");
        let mut job = ClipJob::new(source.id());
        job.start();
        assert_eq!(job.state(), JobState::Running);
        job.record_failure(ClipFailure::new(0, &request("a"), &ClipError::decode("bad")));

        let report = job.finish(false, 1);
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.failure(0).unwrap().reason, FailureReason::DecodeError);
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn test_empty_job_completes() {
        let source = SourceMedia::new(Vec::new(), "video/mp4");
        let report = ClipJob::new(source.id()).finish(false, 0);
        assert_eq!(report.status, JobStatus::Completed);
    }

    #[test]
    fn test_failures_sorted_by_index() {
        let source = SourceMedia::new(Vec::new(), "video/mp4");
        let mut job = ClipJob::new(source.id());
        job.record_failure(ClipFailure::new(2, &request("c"), &ClipError::Cancelled));
        job.record_failure(ClipFailure::new(0, &request("a"), &ClipError::Cancelled));
        let report = job.finish(true, 3);
        assert_eq!(report.status, JobStatus::Cancelled);
        assert_eq!(report.failures[0].index, 0);
        assert_eq!(report.failures[1].label, "c");
    }

    #[test]
    fn test_cancel_handle_is_shared() {
        let handle = CancelHandle::new();
        let options = JobOptions::default().with_cancel(handle.clone());
        assert!(!options.should_stop());
        handle.cancel();
        assert!(options.should_stop());
    }

    #[tokio::test]
    async fn test_deadline_in_past_stops() {
        let options = JobOptions::default().with_deadline(Instant::now());
        assert!(options.should_stop());
    }

    #[test]
    fn test_failure_serializes_reason() {
        let failure = ClipFailure::new(
            1,
            &request("Bad"),
            &ClipError::invalid_range(Duration::from_secs(180), Duration::from_secs(190), "past end"),
        );
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["reason"], "invalid_range");
        assert_eq!(json["label"], "Bad");
    }
}
