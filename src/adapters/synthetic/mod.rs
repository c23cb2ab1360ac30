//! In-process media runtime over IVF framed test patterns
//!
//! Sources are generated with [`SyntheticSource`] and carry one fake video
//! stream. Encoders write IVF with a tiny per-frame payload so tests can
//! inspect frame counts, geometry and key frame placement of a finished clip.
//! Capabilities, limits and failures are configured through
//! [`SyntheticRuntimeBuilder`].

pub mod codec;
pub mod ivf;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::domain::model::*;
use crate::error::{ClipError, ClipResult};
use crate::ports::*;

pub use codec::{render_pattern, SyntheticSource};
use codec::{
    stream_frame_rate, SessionGuard, SyntheticDecoder, SyntheticEncoder, SyntheticPacketReader,
};
use ivf::IvfFile;

/// Builder for [`SyntheticRuntime`]
#[derive(Debug, Clone)]
pub struct SyntheticRuntimeBuilder {
    hardware_encoder: bool,
    recorder: bool,
    vp9: bool,
    failing_probes: bool,
    limits: HashMap<CapabilityTier, EncoderLimits>,
    fail_after: HashMap<CapabilityTier, u64>,
}

impl Default for SyntheticRuntimeBuilder {
    fn default() -> Self {
        Self {
            hardware_encoder: true,
            recorder: true,
            vp9: true,
            failing_probes: false,
            limits: HashMap::new(),
            fail_after: HashMap::new(),
        }
    }
}

impl SyntheticRuntimeBuilder {
    pub fn hardware_encoder(mut self, available: bool) -> Self {
        self.hardware_encoder = available;
        self
    }

    pub fn recorder(mut self, available: bool) -> Self {
        self.recorder = available;
        self
    }

    /// Without VP9 the recorder settles on VP8 at a capped bitrate
    pub fn vp9(mut self, available: bool) -> Self {
        self.vp9 = available;
        self
    }

    /// Capability probes return errors instead of answers
    pub fn failing_probes(mut self) -> Self {
        self.failing_probes = true;
        self
    }

    pub fn limits(mut self, tier: CapabilityTier, limits: EncoderLimits) -> Self {
        self.limits.insert(tier, limits);
        self
    }

    /// Encoders of `tier` reject every frame after the first `frames`
    pub fn fail_encoder_after(mut self, tier: CapabilityTier, frames: u64) -> Self {
        self.fail_after.insert(tier, frames);
        self
    }

    pub fn build(self) -> SyntheticRuntime {
        SyntheticRuntime {
            options: self,
            probes: AtomicUsize::new(0),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Layout of an IVF stream, as produced by synthetic encoders and muxers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub fourcc: String,
    pub width: u32,
    pub height: u32,
    pub timebase: Timebase,
    pub frames: usize,
    pub keyframes: usize,
    pub first_pts: Option<i64>,
    pub last_pts: Option<i64>,
    /// Sample rate of the muxed audio track, if any
    pub audio_sample_rate: Option<u32>,
}

/// Deterministic [`MediaRuntime`] used by tests, benches and the CLI demo mode
#[derive(Debug)]
pub struct SyntheticRuntime {
    options: SyntheticRuntimeBuilder,
    probes: AtomicUsize,
    sessions: Arc<AtomicUsize>,
}

impl SyntheticRuntime {
    pub fn builder() -> SyntheticRuntimeBuilder {
        SyntheticRuntimeBuilder::default()
    }

    /// Number of hardware encoder probes run so far
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Decoders, encoders and packet readers still open
    pub fn open_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Synchronous form of [`MediaRuntime::probe_media`]
    pub fn probe(&self, source: &SourceMedia) -> ClipResult<MediaInfo> {
        let file = IvfFile::parse(source.bytes())?;
        media_info(&file, source.container_hint())
    }

    /// Summarize IVF bytes produced by this runtime
    pub fn inspect(bytes: &[u8]) -> ClipResult<StreamSummary> {
        let file = IvfFile::parse(bytes)?;
        Ok(StreamSummary {
            fourcc: String::from_utf8_lossy(&file.header.fourcc).into_owned(),
            width: file.header.width as u32,
            height: file.header.height as u32,
            timebase: file.header.timebase,
            frames: file.frames.len(),
            keyframes: file
                .frames
                .iter()
                .filter(|f| f.payload.first() == Some(&0))
                .count(),
            first_pts: file.frames.first().map(|f| f.pts),
            last_pts: file.frames.last().map(|f| f.pts),
            audio_sample_rate: (file.header.audio_rate > 0).then_some(file.header.audio_rate),
        })
    }

    fn parse(&self, source: &SourceMedia) -> ClipResult<(IvfFile, MediaInfo)> {
        let file = IvfFile::parse(source.bytes())?;
        let info = media_info(&file, source.container_hint())?;
        Ok((file, info))
    }
}

fn media_info(file: &IvfFile, container: Option<ContainerFormat>) -> ClipResult<MediaInfo> {
    if file.frames.is_empty() {
        return Err(ClipError::decode("source has no frames"));
    }
    let header = &file.header;
    let frame_rate = stream_frame_rate(file);
    let video = VideoStreamInfo::new(
        0,
        String::from_utf8_lossy(&header.fourcc).to_lowercase(),
        header.width as u32,
        header.height as u32,
        frame_rate,
        header.timebase,
    )
    .map_err(|e| ClipError::decode(e.to_string()))?;

    let last_pts = file.frames.iter().map(|f| f.pts).max().unwrap_or(0);
    // the last frame lasts one frame interval
    let duration = if header.timebase.num == 1 && header.timebase.den as f64 == frame_rate {
        header.timebase.ticks_to_duration(last_pts + 1)
    } else {
        header.timebase.ticks_to_duration(last_pts) + video.frame_duration()
    };
    Ok(MediaInfo {
        duration,
        container,
        format_name: "ivf".to_string(),
        video,
        audio: synthetic_audio(header.audio_rate),
    })
}

/// Synthetic sources describe their audio with a sample rate only
fn synthetic_audio(sample_rate: u32) -> Option<AudioStreamInfo> {
    (sample_rate > 0).then(|| AudioStreamInfo {
        index: 1,
        codec: "pcm_s16le".to_string(),
        sample_rate,
        channels: 2,
    })
}

#[async_trait]
impl MediaRuntime for SyntheticRuntime {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn probe_frame_encoder(&self) -> ClipResult<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.options.failing_probes {
            return Err(ClipError::backend("frame encoder probe failed"));
        }
        Ok(self.options.hardware_encoder)
    }

    async fn probe_recorder(&self) -> ClipResult<bool> {
        if self.options.failing_probes {
            return Err(ClipError::backend("recorder probe failed"));
        }
        Ok(self.options.recorder)
    }

    async fn probe_media(&self, source: &SourceMedia) -> ClipResult<MediaInfo> {
        self.probe(source)
    }

    fn encoder_limits(&self, tier: CapabilityTier) -> EncoderLimits {
        self.options.limits.get(&tier).copied().unwrap_or_default()
    }

    async fn open_decoder(&self, source: &SourceMedia) -> ClipResult<Box<dyn VideoDecoder>> {
        let (file, info) = self.parse(source)?;
        let session = SessionGuard::open(&self.sessions);
        Ok(Box::new(SyntheticDecoder::new(file, info.video, session)))
    }

    async fn open_encoder(&self, settings: &EncoderSettings) -> ClipResult<Box<dyn EncoderBackend>> {
        let available = match settings.tier {
            CapabilityTier::HardwareFrameEncoder => self.options.hardware_encoder,
            CapabilityTier::CanvasRecorder => self.options.recorder,
            CapabilityTier::RemuxOnly => false,
        };
        if !available {
            return Err(ClipError::UnsupportedConfiguration {
                tier: settings.tier,
                reason: "no encoder for this tier".to_string(),
            });
        }

        if let Some(track) = &settings.audio {
            if track.codec != AudioCodec::for_container(settings.container) {
                return Err(ClipError::UnsupportedConfiguration {
                    tier: settings.tier,
                    reason: format!("{} audio cannot be muxed into {}", track.codec, settings.container),
                });
            }
        }

        let settings = if settings.codec == VideoCodec::Vp9 && !self.options.vp9 {
            debug!("VP9 unavailable, recorder falls back to VP8");
            settings.recorder_fallback()
        } else {
            settings.clone()
        };
        let fail_after = self.options.fail_after.get(&settings.tier).copied();
        let session = SessionGuard::open(&self.sessions);
        Ok(Box::new(SyntheticEncoder::new(settings, fail_after, session)))
    }

    async fn open_packet_reader(&self, source: &SourceMedia) -> ClipResult<Box<dyn PacketReader>> {
        let file = IvfFile::parse(source.bytes())?;
        let container = source.container_hint().unwrap_or(ContainerFormat::Mp4);
        let session = SessionGuard::open(&self.sessions);
        Ok(Box::new(SyntheticPacketReader::new(file, container, session)))
    }
}
