// LibAV media runtime - Hardware/VP9 encoders, decoding and packet copy via ffmpeg-next

mod audio;
mod decoder;
mod encoder;
mod remux;

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::domain::model::*;
use crate::domain::rules::snap_frame_rate;
use crate::error::{ClipError, ClipResult};
use crate::ports::*;

pub use decoder::LibavDecoder;
pub use encoder::LibavEncoder;
pub use remux::{LibavPacketReader, LibavPacketWriter};

/// Hardware H.264 encoders in probe order
pub const HARDWARE_ENCODERS: [&str; 4] = ["h264_nvenc", "h264_qsv", "h264_videotoolbox", "h264_amf"];

/// Recorder codecs in preference order
pub const RECORDER_ENCODERS: [(&str, VideoCodec); 2] =
    [("libvpx-vp9", VideoCodec::Vp9), ("libvpx", VideoCodec::Vp8)];

static FFMPEG_INIT: OnceLock<Result<(), String>> = OnceLock::new();
static HARDWARE_ENCODER: OnceLock<Option<&'static str>> = OnceLock::new();

fn init_ffmpeg() -> ClipResult<()> {
    FFMPEG_INIT
        .get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| ClipError::backend(format!("failed to initialize FFmpeg: {}", e)))
}

/// First hardware encoder that opens on this machine; probed once per process
pub fn hardware_encoder() -> Option<&'static str> {
    *HARDWARE_ENCODER.get_or_init(|| {
        HARDWARE_ENCODERS.into_iter().find(|name| {
            let usable = encoder::probe_encoder(name);
            debug!(encoder = name, usable, "Probed hardware encoder");
            usable
        })
    })
}

/// Recorder encoder to use, preferring VP9
pub fn recorder_encoder() -> Option<(&'static str, VideoCodec)> {
    RECORDER_ENCODERS
        .into_iter()
        .find(|(name, _)| ffmpeg::codec::encoder::find_by_name(name).is_some())
}

pub(crate) fn timebase_of(rational: ffmpeg::Rational) -> ClipResult<Timebase> {
    Timebase::new(rational.numerator(), rational.denominator())
}

/// Run libav work on the blocking pool so it never stalls the async workers
pub(crate) async fn blocking<T, F>(work: F) -> ClipResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ClipResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ClipError::backend(format!("blocking task failed: {}", e)))?
}

pub(crate) fn av_time(d: Duration) -> i64 {
    (d.as_micros() as i64).saturating_mul(ffmpeg::ffi::AV_TIME_BASE as i64) / 1_000_000
}

fn container_of(format_name: &str) -> Option<ContainerFormat> {
    if format_name.contains("mp4") || format_name.contains("mov") {
        Some(ContainerFormat::Mp4)
    } else if format_name.contains("webm") || format_name.contains("matroska") {
        Some(ContainerFormat::WebM)
    } else {
        None
    }
}

/// Media runtime backed by libav. Source bytes are staged to a temporary file
/// per source until [`MediaRuntime::release`].
#[derive(Default)]
pub struct LibavRuntime {
    staged: Mutex<HashMap<SourceId, Arc<NamedTempFile>>>,
}

impl LibavRuntime {
    pub fn new() -> ClipResult<Self> {
        init_ffmpeg()?;
        Ok(Self::default())
    }

    /// Staged copy of a source, if one exists
    fn staged(&self, source: SourceId) -> Option<Arc<NamedTempFile>> {
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&source)
            .cloned()
    }

    /// Path of the staged copy of `source`, writing it on first use. The
    /// write happens off the async workers and outside the registry lock;
    /// when two callers race, the first registered copy wins.
    async fn stage(&self, source: &SourceMedia) -> ClipResult<Arc<NamedTempFile>> {
        if let Some(file) = self.staged(source.id()) {
            return Ok(file);
        }

        let suffix = source
            .container_hint()
            .map(|c| format!(".{}", c.extension()))
            .unwrap_or_else(|| ".bin".to_string());
        let bytes = source.shared_bytes();
        let file = blocking(move || {
            let mut file = tempfile::Builder::new()
                .prefix("verticut-src-")
                .suffix(&suffix)
                .tempfile()?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await?;
        debug!(source = %source.id(), path = %file.path().display(), "Staged source");

        let mut staged = self.staged.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(staged.entry(source.id()).or_insert_with(|| Arc::new(file))))
    }

    async fn open_input(
        &self,
        source: &SourceMedia,
    ) -> ClipResult<(Arc<NamedTempFile>, ffmpeg::format::context::Input)> {
        let staged = self.stage(source).await?;
        let path = Arc::clone(&staged);
        let input = blocking(move || {
            ffmpeg::format::input(&path.path())
                .map_err(|e| ClipError::decode(format!("failed to open source: {}", e)))
        })
        .await?;
        Ok((staged, input))
    }
}

/// Audio stream description read from codec parameters
fn audio_stream_info(stream: &ffmpeg::format::stream::Stream) -> AudioStreamInfo {
    let parameters = stream.parameters();
    // SAFETY: the parameters stay valid while the stream is borrowed
    let (sample_rate, channels) = unsafe {
        let raw = &*parameters.as_ptr();
        (raw.sample_rate.max(0) as u32, raw.ch_layout.nb_channels.max(0) as u16)
    };
    AudioStreamInfo {
        index: stream.index(),
        codec: parameters.id().name().to_string(),
        sample_rate,
        channels,
    }
}

fn probe_input(input: &ffmpeg::format::context::Input) -> ClipResult<MediaInfo> {
    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| ClipError::decode("source has no video stream"))?;
    let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| ClipError::decode(e.to_string()))?;
    let video = context.decoder().video().map_err(|e| ClipError::decode(e.to_string()))?;

    let declared = f64::from(stream.avg_frame_rate());
    let frame_rate = if declared.is_finite() && declared > 0.0 && declared <= 240.0 {
        declared
    } else {
        snap_frame_rate(f64::from(stream.rate())) as f64
    };
    let info = VideoStreamInfo::new(
        stream.index(),
        stream.parameters().id().name(),
        video.width(),
        video.height(),
        frame_rate,
        timebase_of(stream.time_base())?,
    )
    .map_err(|e| ClipError::decode(e.to_string()))?;

    let duration = if input.duration() > 0 {
        Duration::from_micros(input.duration() as u64 * 1_000_000 / ffmpeg::ffi::AV_TIME_BASE as u64)
    } else {
        info.timebase.ticks_to_duration(stream.duration())
    };
    let format_name = input.format().name().to_string();

    Ok(MediaInfo {
        duration,
        container: container_of(&format_name),
        format_name,
        video: info,
        audio: input
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .map(|stream| audio_stream_info(&stream)),
    })
}

#[async_trait]
impl MediaRuntime for LibavRuntime {
    fn name(&self) -> &str {
        "libav"
    }

    async fn probe_frame_encoder(&self) -> ClipResult<bool> {
        let found = tokio::task::spawn_blocking(hardware_encoder)
            .await
            .map_err(|e| ClipError::backend(e.to_string()))?;
        if let Some(name) = found {
            info!(encoder = name, "Hardware frame encoder available");
        }
        Ok(found.is_some())
    }

    async fn probe_recorder(&self) -> ClipResult<bool> {
        Ok(recorder_encoder().is_some())
    }

    async fn probe_media(&self, source: &SourceMedia) -> ClipResult<MediaInfo> {
        let (_staged, input) = self.open_input(source).await?;
        blocking(move || probe_input(&input)).await
    }

    fn encoder_limits(&self, tier: CapabilityTier) -> EncoderLimits {
        match tier {
            // common ceiling across nvenc/qsv/amf H.264 level 5.1
            CapabilityTier::HardwareFrameEncoder => EncoderLimits {
                max_width: 4096,
                max_height: 4096,
                max_bitrate: 50_000_000,
                max_fps: 120.0,
            },
            CapabilityTier::CanvasRecorder => EncoderLimits {
                max_width: 4096,
                max_height: 4096,
                max_bitrate: 20_000_000,
                max_fps: 60.0,
            },
            CapabilityTier::RemuxOnly => EncoderLimits::unbounded(),
        }
    }

    async fn open_decoder(&self, source: &SourceMedia) -> ClipResult<Box<dyn VideoDecoder>> {
        let (staged, input) = self.open_input(source).await?;
        let decoder = blocking(move || {
            let info = probe_input(&input)?;
            LibavDecoder::open(staged, input, info.video)
        })
        .await?;
        Ok(Box::new(decoder))
    }

    async fn open_encoder(&self, settings: &EncoderSettings) -> ClipResult<Box<dyn EncoderBackend>> {
        let (name, settings) = match settings.tier {
            CapabilityTier::HardwareFrameEncoder => {
                let name = hardware_encoder().ok_or_else(|| ClipError::UnsupportedConfiguration {
                    tier: settings.tier,
                    reason: "no hardware H.264 encoder".to_string(),
                })?;
                (name, settings.clone())
            }
            CapabilityTier::CanvasRecorder => match recorder_encoder() {
                Some((name, VideoCodec::Vp9)) => (name, settings.clone()),
                Some((name, _)) => {
                    warn!("VP9 encoder unavailable, recording VP8");
                    (name, settings.recorder_fallback())
                }
                None => {
                    return Err(ClipError::UnsupportedConfiguration {
                        tier: settings.tier,
                        reason: "no VP9/VP8 encoder".to_string(),
                    })
                }
            },
            CapabilityTier::RemuxOnly => {
                return Err(ClipError::UnsupportedConfiguration {
                    tier: settings.tier,
                    reason: "remux has no encoder".to_string(),
                })
            }
        };
        let audio_source = settings
            .audio
            .as_ref()
            .and_then(|track| self.staged(track.source));
        let encoder = blocking(move || LibavEncoder::open(name, settings, audio_source)).await?;
        Ok(Box::new(encoder))
    }

    async fn open_packet_reader(&self, source: &SourceMedia) -> ClipResult<Box<dyn PacketReader>> {
        let (staged, input) = self.open_input(source).await?;
        let container = container_of(input.format().name())
            .or_else(|| source.container_hint())
            .unwrap_or(ContainerFormat::Mp4);
        Ok(Box::new(LibavPacketReader::open(staged, input, container)?))
    }

    async fn release(&self, source: SourceId) {
        let removed = self
            .staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&source);
        if removed.is_some() {
            debug!(source = %source, "Released staged source");
        }
    }
}

/// Read a finished output file back into memory
pub(crate) async fn read_output(path: &Path) -> ClipResult<Vec<u8>> {
    Ok(tokio::fs::read(path).await?)
}
