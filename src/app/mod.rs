// Application layer - Clip jobs and their orchestration

pub mod job;
pub mod orchestrator;

// Re-export job types
pub use job::{CancelHandle, ClipFailure, ClipJob, JobOptions, JobReport, JobState, JobStatus};
pub use orchestrator::ClipOrchestrator;
