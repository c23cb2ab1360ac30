//! Encoder pipeline
//!
//! Drives one encode backend for one clip:
//! `Idle -> Configuring -> Encoding -> Flushing -> Done`, or `Failed` from any
//! state after `Idle`. Frames are pulled, composited and submitted one at a
//! time, so the next frame is not decoded until the backend accepted the
//! current one.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::OutputPreset;
use crate::domain::model::{CapabilityTier, MediaInfo, SourceId, SourceMedia, TimeRange};
use crate::domain::rules::{effective_frame_rate, keyframe_interval_frames};
use crate::engine::compositor::Compositor;
use crate::engine::frame_source::FrameSource;
use crate::engine::progress::{ClipProgress, ProgressPhase};
use crate::error::{ClipError, ClipResult};
use crate::ports::{AudioCodec, AudioTrack, EncoderBackend, EncoderSettings, MediaRuntime, VideoCodec};

/// Frames between progress reports unless configured otherwise
pub const DEFAULT_PROGRESS_INTERVAL: u32 = 15;

/// Lifecycle of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Configuring,
    Encoding,
    Flushing,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Configuring => "configuring",
            PipelineState::Encoding => "encoding",
            PipelineState::Flushing => "flushing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tunables shared by every run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub keyframe_interval_secs: u32,
    pub progress_interval_frames: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            keyframe_interval_secs: 2,
            progress_interval_frames: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Finished container plus what went into it
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub bytes: Vec<u8>,
    pub settings: EncoderSettings,
    pub frames: u64,
    pub duration: Duration,
}

/// Encoder parameters a tier uses for `preset` on a source running at
/// `source_fps`
pub fn settings_for_tier(
    tier: CapabilityTier,
    preset: &OutputPreset,
    source_fps: f64,
    keyframe_interval_secs: u32,
) -> ClipResult<EncoderSettings> {
    let (codec, container) = match (tier, tier.output_container()) {
        (CapabilityTier::HardwareFrameEncoder, Some(container)) => (VideoCodec::H264, container),
        (CapabilityTier::CanvasRecorder, Some(container)) => (VideoCodec::Vp9, container),
        _ => {
            return Err(ClipError::UnsupportedConfiguration {
                tier,
                reason: "tier has no frame encoder".to_string(),
            })
        }
    };
    let fps = effective_frame_rate(preset.fps, source_fps);
    Ok(EncoderSettings {
        tier,
        codec,
        container,
        width: preset.width,
        height: preset.height,
        fps,
        bitrate: preset.video_bitrate,
        keyframe_interval: keyframe_interval_frames(fps, keyframe_interval_secs),
        audio: None,
    })
}

/// Source audio carried into a clip of `range`, in the codec the container
/// takes
pub fn audio_track_for(
    source: SourceId,
    media: &MediaInfo,
    range: TimeRange,
    settings: &EncoderSettings,
    preset: &OutputPreset,
) -> Option<AudioTrack> {
    let stream = media.audio.clone()?;
    Some(AudioTrack {
        source,
        stream,
        range,
        codec: AudioCodec::for_container(settings.container),
        bitrate: preset.audio_bitrate,
    })
}

/// Single-clip encoder driver
pub struct EncoderPipeline<'a> {
    runtime: &'a dyn MediaRuntime,
    preset: &'a OutputPreset,
    options: PipelineOptions,
    state: PipelineState,
}

impl<'a> EncoderPipeline<'a> {
    pub fn new(runtime: &'a dyn MediaRuntime, preset: &'a OutputPreset, options: PipelineOptions) -> Self {
        Self {
            runtime,
            preset,
            options,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Encode `range` of `source` at `tier`
    pub async fn run(
        &mut self,
        tier: CapabilityTier,
        source: &SourceMedia,
        media: &MediaInfo,
        range: TimeRange,
        progress: &mut ClipProgress<'_>,
    ) -> ClipResult<PipelineOutput> {
        if self.state != PipelineState::Idle {
            return Err(ClipError::backend(format!(
                "Pipeline already used (state: {})",
                self.state
            )));
        }

        let result = self.execute(tier, source, media, range, progress).await;
        match &result {
            Ok(output) => {
                self.state = PipelineState::Done;
                info!(
                    tier = %tier,
                    frames = output.frames,
                    bytes = output.bytes.len(),
                    "Clip encoded"
                );
            }
            Err(e) => {
                warn!(tier = %tier, from = %self.state, "Pipeline failed: {}", e);
                self.state = PipelineState::Failed;
            }
        }
        result
    }

    async fn execute(
        &mut self,
        tier: CapabilityTier,
        source: &SourceMedia,
        media: &MediaInfo,
        range: TimeRange,
        progress: &mut ClipProgress<'_>,
    ) -> ClipResult<PipelineOutput> {
        self.state = PipelineState::Configuring;
        progress.report(ProgressPhase::Configuring, 0.0);

        let mut settings = settings_for_tier(
            tier,
            self.preset,
            media.video.frame_rate,
            self.options.keyframe_interval_secs,
        )?;
        settings.audio = audio_track_for(source.id(), media, range, &settings, self.preset);
        self.runtime
            .encoder_limits(tier)
            .check(&settings)
            .map_err(|reason| ClipError::UnsupportedConfiguration { tier, reason })?;
        debug!(?settings, "Encoder configured");

        let encoder = match self.runtime.open_encoder(&settings).await {
            Ok(encoder) => encoder,
            Err(e @ ClipError::UnsupportedConfiguration { .. }) => return Err(e),
            Err(e) => return Err(ClipError::encoding(format!("failed to open encoder: {}", e))),
        };
        // the backend may have settled on a fallback codec or dropped audio
        let settings = encoder.settings().clone();
        if settings.audio.is_none() && media.audio.is_some() {
            warn!(tier = %tier, "Encoder carries no audio, clip will be silent");
        }

        let decoder = match self.runtime.open_decoder(source).await {
            Ok(decoder) => decoder,
            Err(e) => {
                encoder.abort().await;
                return Err(as_decode_error(e));
            }
        };
        let frames = match FrameSource::new(decoder, range, settings.fps) {
            Ok(frames) => frames,
            Err(e) => {
                encoder.abort().await;
                return Err(e);
            }
        };

        self.state = PipelineState::Encoding;
        let (encoder, frames, encoded) = self
            .encode_frames(encoder, frames, &settings, range, progress)
            .await?;

        self.state = PipelineState::Flushing;
        progress.report(ProgressPhase::Flushing, 99.0);
        frames.close().await;
        let bytes = encoder
            .finish()
            .await
            .map_err(|e| ClipError::encoding(format!("flush failed: {}", e)))?;
        progress.report(ProgressPhase::Flushing, 100.0);

        Ok(PipelineOutput {
            bytes,
            duration: Duration::from_secs_f64(encoded as f64 / settings.fps),
            settings,
            frames: encoded,
        })
    }

    async fn encode_frames(
        &mut self,
        mut encoder: Box<dyn EncoderBackend>,
        mut frames: FrameSource,
        settings: &EncoderSettings,
        range: TimeRange,
        progress: &mut ClipProgress<'_>,
    ) -> ClipResult<(Box<dyn EncoderBackend>, FrameSource, u64)> {
        let compositor = Compositor::new(settings.width, settings.height);
        let target = range.duration().as_secs_f64();
        let interval = self.options.progress_interval_frames.max(1) as u64;
        let mut index = 0u64;

        loop {
            let frame = match frames.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    encoder.abort().await;
                    frames.close().await;
                    return Err(e);
                }
            };

            let canvas = compositor.composite(&frame.image);
            let pts = frames.output_time(index);
            let keyframe = index % settings.keyframe_interval == 0;
            if let Err(e) = encoder.submit(&canvas, pts, keyframe).await {
                encoder.abort().await;
                frames.close().await;
                return Err(ClipError::encoding(format!("frame {}: {}", index, e)));
            }
            index += 1;

            if index % interval == 0 {
                let elapsed = index as f64 / settings.fps;
                let percent = (elapsed / target * 100.0).min(99.0) as f32;
                progress.report(ProgressPhase::Encoding, percent);
            }
        }

        if index == 0 {
            encoder.abort().await;
            frames.close().await;
            return Err(ClipError::decode(format!("no frames decoded in {}", range)));
        }
        Ok((encoder, frames, index))
    }
}

fn as_decode_error(error: ClipError) -> ClipError {
    match error {
        e @ ClipError::DecodeError { .. } => e,
        other => ClipError::decode(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::synthetic::{SyntheticRuntime, SyntheticSource};
    use crate::ports::EncoderLimits;

    fn small_preset() -> OutputPreset {
        OutputPreset::custom(54, 96, 10, 500_000)
    }

    #[test]
    fn test_settings_per_tier() {
        let preset = OutputPreset::vertical_default();
        let hw = settings_for_tier(CapabilityTier::HardwareFrameEncoder, &preset, 60.0, 2).unwrap();
        assert_eq!(hw.codec, VideoCodec::H264);
        assert_eq!(hw.fps, 30.0);
        assert_eq!(hw.keyframe_interval, 60);
        assert_eq!(hw.bitrate, 4_000_000);

        let canvas = settings_for_tier(CapabilityTier::CanvasRecorder, &preset, 24.0, 2).unwrap();
        assert_eq!(canvas.codec, VideoCodec::Vp9);
        assert_eq!(canvas.fps, 24.0);
        assert_eq!(canvas.recorder_fallback().codec, VideoCodec::Vp8);
        assert_eq!(canvas.recorder_fallback().bitrate, 3_000_000);

        assert!(matches!(
            settings_for_tier(CapabilityTier::RemuxOnly, &preset, 30.0, 2),
            Err(ClipError::UnsupportedConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_encodes_range_to_done() {
        let runtime = SyntheticRuntime::builder().build();
        let source = SyntheticSource::new(64, 36, 10, 6).into_media();
        let media = runtime.probe(&source).unwrap();
        let preset = small_preset();
        let range = TimeRange::new(Duration::from_secs(1), Duration::from_secs(3));

        let mut pipeline = EncoderPipeline::new(&runtime, &preset, PipelineOptions::default());
        let output = pipeline
            .run(
                CapabilityTier::HardwareFrameEncoder,
                &source,
                &media,
                range,
                &mut ClipProgress::detached(),
            )
            .await
            .unwrap();

        assert_eq!(pipeline.state(), PipelineState::Done);
        assert_eq!(output.frames, 20);
        assert_eq!(output.duration, Duration::from_secs(2));
        let summary = SyntheticRuntime::inspect(&output.bytes).unwrap();
        assert_eq!(summary.frames, 20);
        assert_eq!((summary.width, summary.height), (54, 96));
        assert_eq!(summary.keyframes, 1);
    }

    #[tokio::test]
    async fn test_limits_raise_unsupported_configuration() {
        let runtime = SyntheticRuntime::builder()
            .limits(
                CapabilityTier::HardwareFrameEncoder,
                EncoderLimits {
                    max_width: 32,
                    ..EncoderLimits::unbounded()
                },
            )
            .build();
        let source = SyntheticSource::new(64, 36, 10, 2).into_media();
        let media = runtime.probe(&source).unwrap();
        let preset = small_preset();

        let mut pipeline = EncoderPipeline::new(&runtime, &preset, PipelineOptions::default());
        let result = pipeline
            .run(
                CapabilityTier::HardwareFrameEncoder,
                &source,
                &media,
                TimeRange::new(Duration::ZERO, Duration::from_secs(1)),
                &mut ClipProgress::detached(),
            )
            .await;

        assert!(matches!(result, Err(ClipError::UnsupportedConfiguration { .. })));
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces_encoding_failed_and_releases() {
        let runtime = SyntheticRuntime::builder()
            .fail_encoder_after(CapabilityTier::CanvasRecorder, 3)
            .build();
        let source = SyntheticSource::new(64, 36, 10, 2).into_media();
        let media = runtime.probe(&source).unwrap();
        let preset = small_preset();

        let mut pipeline = EncoderPipeline::new(&runtime, &preset, PipelineOptions::default());
        let result = pipeline
            .run(
                CapabilityTier::CanvasRecorder,
                &source,
                &media,
                TimeRange::new(Duration::ZERO, Duration::from_secs(1)),
                &mut ClipProgress::detached(),
            )
            .await;

        assert!(matches!(result, Err(ClipError::EncodingFailed { .. })));
        assert_eq!(runtime.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_is_single_use() {
        let runtime = SyntheticRuntime::builder().build();
        let source = SyntheticSource::new(64, 36, 10, 2).into_media();
        let media = runtime.probe(&source).unwrap();
        let preset = small_preset();
        let range = TimeRange::new(Duration::ZERO, Duration::from_secs(1));

        let mut pipeline = EncoderPipeline::new(&runtime, &preset, PipelineOptions::default());
        let mut progress = ClipProgress::detached();
        pipeline
            .run(CapabilityTier::HardwareFrameEncoder, &source, &media, range, &mut progress)
            .await
            .unwrap();
        assert!(pipeline
            .run(CapabilityTier::HardwareFrameEncoder, &source, &media, range, &mut progress)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_source_audio_follows_the_container() {
        let runtime = SyntheticRuntime::builder().build();
        let source = SyntheticSource::new(64, 36, 10, 3).with_audio(48_000).into_media();
        let media = runtime.probe(&source).unwrap();
        let preset = small_preset();
        let range = TimeRange::new(Duration::ZERO, Duration::from_secs(1));

        for (tier, codec) in [
            (CapabilityTier::HardwareFrameEncoder, AudioCodec::Aac),
            (CapabilityTier::CanvasRecorder, AudioCodec::Opus),
        ] {
            let mut pipeline = EncoderPipeline::new(&runtime, &preset, PipelineOptions::default());
            let output = pipeline
                .run(tier, &source, &media, range, &mut ClipProgress::detached())
                .await
                .unwrap();

            let track = output.settings.audio.as_ref().unwrap();
            assert_eq!(track.codec, codec, "{tier}");
            assert_eq!(track.bitrate, preset.audio_bitrate);
            assert_eq!(track.range, range);
            let summary = SyntheticRuntime::inspect(&output.bytes).unwrap();
            assert_eq!(summary.audio_sample_rate, Some(48_000));
        }
    }

    #[tokio::test]
    async fn test_silent_source_gives_silent_clip() {
        let runtime = SyntheticRuntime::builder().build();
        let source = SyntheticSource::new(64, 36, 10, 2).into_media();
        let media = runtime.probe(&source).unwrap();
        let preset = small_preset();

        let mut pipeline = EncoderPipeline::new(&runtime, &preset, PipelineOptions::default());
        let output = pipeline
            .run(
                CapabilityTier::HardwareFrameEncoder,
                &source,
                &media,
                TimeRange::new(Duration::ZERO, Duration::from_secs(1)),
                &mut ClipProgress::detached(),
            )
            .await
            .unwrap();
        assert_eq!(output.settings.audio, None);
        assert_eq!(SyntheticRuntime::inspect(&output.bytes).unwrap().audio_sample_rate, None);
    }
}
