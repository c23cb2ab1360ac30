// Clip job orchestrator - Runs every request of a job against one source

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::app::job::{ClipFailure, ClipJob, JobOptions, JobReport};
use crate::config::{EngineConfig, OutputPreset};
use crate::domain::model::*;
use crate::engine::capability::CapabilityDetector;
use crate::engine::pipeline::{EncoderPipeline, PipelineOptions};
use crate::engine::progress::{ClipProgress, JobProgress, ProgressPhase};
use crate::engine::remux::DirectRemux;
use crate::error::{ClipError, ClipResult};
use crate::planner::ClipPlan;
use crate::ports::MediaRuntime;

/// Sources with a running job
type ActiveSources = Arc<Mutex<HashSet<SourceId>>>;

/// Registration of a running job; removed again on drop
struct ActiveJob {
    registry: ActiveSources,
    source_id: SourceId,
}

impl ActiveJob {
    fn register(registry: &ActiveSources, source_id: SourceId) -> ClipResult<Self> {
        let mut active = registry.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(source_id) {
            return Err(ClipError::JobAlreadyRunning { source_id });
        }
        Ok(Self {
            registry: Arc::clone(registry),
            source_id,
        })
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        let mut active = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.source_id);
    }
}

/// Runs clip jobs: validates ranges, walks the tier fallback for each request
/// in order, and collects clips and failures into a [`JobReport`].
pub struct ClipOrchestrator {
    runtime: Arc<dyn MediaRuntime>,
    detector: CapabilityDetector,
    preset: OutputPreset,
    options: PipelineOptions,
    active: ActiveSources,
}

impl ClipOrchestrator {
    /// Build from a validated configuration
    pub fn new(runtime: Arc<dyn MediaRuntime>, config: &EngineConfig) -> ClipResult<Self> {
        config.validate()?;
        let preset = config.output_preset()?;
        let detector = CapabilityDetector::new(Arc::clone(&runtime)).with_max_tier(config.max_tier);
        Ok(Self {
            runtime,
            detector,
            preset,
            options: PipelineOptions {
                keyframe_interval_secs: config.keyframe_interval_secs,
                progress_interval_frames: config.progress_interval_frames,
            },
            active: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn preset(&self) -> &OutputPreset {
        &self.preset
    }

    /// Capability tier jobs start at
    pub async fn detect_tier(&self) -> CapabilityTier {
        self.detector.detect().await
    }

    /// Whether a job is currently running against `source`
    pub fn is_running(&self, source: SourceId) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(&source))
            .unwrap_or(false)
    }

    /// Run a job with default options
    pub async fn run_job(&self, source: &SourceMedia, requests: &[ClipRequest]) -> ClipResult<JobReport> {
        self.run_job_with(source, requests, JobOptions::default()).await
    }

    /// Run a job. Fails as a whole only with `JobAlreadyRunning`; everything
    /// else is recorded per request.
    pub async fn run_job_with(
        &self,
        source: &SourceMedia,
        requests: &[ClipRequest],
        options: JobOptions,
    ) -> ClipResult<JobReport> {
        // registered before the first suspension point
        let _active = ActiveJob::register(&self.active, source.id())?;
        let mut job = ClipJob::new(source.id());
        let span = info_span!("clip_job", job_id = %job.id(), source = %source.id());

        async move {
            job.start();
            info!(requests = requests.len(), "Clip job started");
            let mut progress = JobProgress::new(Arc::clone(&options.progress), requests.len());
            progress.phase(ProgressPhase::Preparing);

            let cancelled = self.process(&mut job, source, requests, &options, &mut progress).await;

            if cancelled {
                progress.phase(ProgressPhase::Cancelled);
            } else {
                progress.complete();
            }
            self.runtime.release(source.id()).await;

            let report = job.finish(cancelled, requests.len());
            info!(
                status = %report.status,
                clips = report.clips.len(),
                failures = report.failures.len(),
                "Clip job finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Returns whether the job was cancelled
    async fn process(
        &self,
        job: &mut ClipJob,
        source: &SourceMedia,
        requests: &[ClipRequest],
        options: &JobOptions,
        progress: &mut JobProgress,
    ) -> bool {
        let media = match self.runtime.probe_media(source).await {
            Ok(media) => media,
            Err(e) => {
                error!("Source could not be probed: {}", e);
                let e = match e {
                    e @ ClipError::DecodeError { .. } => e,
                    other => ClipError::decode(other.to_string()),
                };
                for (index, request) in requests.iter().enumerate() {
                    job.record_failure(ClipFailure::new(index, request, &e));
                }
                return false;
            }
        };
        debug!(duration = ?media.duration, video = ?media.video, "Source probed");

        let tier = self.detector.detect().await;

        let mut pending = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            match request.range.validate_against(media.duration) {
                Ok(()) => pending.push(index),
                Err(e) => {
                    warn!(index, label = %request.label, "Rejected request: {}", e);
                    job.record_failure(ClipFailure::new(index, request, &e));
                }
            }
        }

        for (position, &index) in pending.iter().enumerate() {
            if options.should_stop() {
                info!(remaining = pending.len() - position, "Job cancelled at request boundary");
                for &skipped in &pending[position..] {
                    job.record_failure(ClipFailure::new(skipped, &requests[skipped], &ClipError::Cancelled));
                }
                return true;
            }

            let request = &requests[index];
            progress.begin_request(index, &request.label);
            let plan = ClipPlan::new(index, request, tier);
            match self.process_request(&plan, source, &media, request, progress).await {
                Ok(clip) => {
                    info!(index, label = %request.label, tier = %clip.tier, bytes = clip.len(), "Clip ready");
                    job.record_clip(clip);
                }
                Err(e) => {
                    error!(index, label = %request.label, reason = %e.reason(), "Clip failed: {}", e);
                    job.record_failure(ClipFailure::new(index, request, &e));
                }
            }
        }
        false
    }

    async fn process_request(
        &self,
        plan: &ClipPlan,
        source: &SourceMedia,
        media: &MediaInfo,
        request: &ClipRequest,
        progress: &mut JobProgress,
    ) -> ClipResult<EncodedClip> {
        let mut fallback = plan.fallback();
        let mut last_error = None;

        while let Some(tier) = fallback.next_tier() {
            debug!(index = plan.index, tier = %tier, "Attempting clip");
            let result = if tier.is_encode_tier() {
                self.encode(tier, source, media, request, plan.index, progress).await
            } else {
                self.remux(source, media, request, plan.index, progress).await
            };

            match result {
                Ok(clip) => return Ok(clip),
                Err(e) => {
                    if fallback.record_failure(tier, &e) {
                        warn!(index = plan.index, tier = %tier, "Stepping down one tier after: {}", e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClipError::backend("no tier was attempted")))
    }

    async fn encode(
        &self,
        tier: CapabilityTier,
        source: &SourceMedia,
        media: &MediaInfo,
        request: &ClipRequest,
        index: usize,
        progress: &mut JobProgress,
    ) -> ClipResult<EncodedClip> {
        let mut pipeline = EncoderPipeline::new(self.runtime.as_ref(), &self.preset, self.options);
        let output = pipeline
            .run(tier, source, media, request.range, &mut ClipProgress::new(progress))
            .await?;
        Ok(EncodedClip {
            index,
            label: request.label.clone(),
            bytes: output.bytes.into(),
            container: output.settings.container,
            tier,
            width: output.settings.width,
            height: output.settings.height,
            duration: output.duration,
        })
    }

    async fn remux(
        &self,
        source: &SourceMedia,
        media: &MediaInfo,
        request: &ClipRequest,
        index: usize,
        progress: &mut JobProgress,
    ) -> ClipResult<EncodedClip> {
        let output = DirectRemux::new(self.runtime.as_ref())
            .remux(source, request.range, &mut ClipProgress::new(progress))
            .await?;
        Ok(EncodedClip {
            index,
            label: request.label.clone(),
            bytes: output.bytes.into(),
            container: output.container,
            tier: CapabilityTier::RemuxOnly,
            width: media.video.width,
            height: media.video.height,
            duration: request.range.end.saturating_sub(output.anchor),
        })
    }
}
