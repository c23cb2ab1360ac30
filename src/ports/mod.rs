// Ports - Interface definitions (contracts) between the engine and a media runtime

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::domain::model::*;
use crate::error::ClipResult;

/// Bitrate used when the recorder has to fall back from VP9
pub const RECORDER_FALLBACK_BITRATE: u64 = 3_000_000;

/// A media runtime: capability probes plus factories for decode, encode and
/// packet copy sessions
#[async_trait]
pub trait MediaRuntime: Send + Sync {
    /// Short runtime name for logs
    fn name(&self) -> &str;

    /// Whether an explicit hardware frame encoder and matching decoder exist
    async fn probe_frame_encoder(&self) -> ClipResult<bool>;

    /// Whether a general purpose software recorder exists
    async fn probe_recorder(&self) -> ClipResult<bool>;

    /// Discover duration and primary video stream of a source
    async fn probe_media(&self, source: &SourceMedia) -> ClipResult<MediaInfo>;

    /// Largest configuration an encode tier accepts
    fn encoder_limits(&self, tier: CapabilityTier) -> EncoderLimits;

    /// Open a seekable decoder on the primary video stream
    async fn open_decoder(&self, source: &SourceMedia) -> ClipResult<Box<dyn VideoDecoder>>;

    /// Open an encoder backend configured by `settings`
    async fn open_encoder(&self, settings: &EncoderSettings) -> ClipResult<Box<dyn EncoderBackend>>;

    /// Open a compressed packet reader for bitstream copy
    async fn open_packet_reader(&self, source: &SourceMedia) -> ClipResult<Box<dyn PacketReader>>;

    /// Drop anything the runtime holds for a source once its job ends
    async fn release(&self, _source: SourceId) {}
}

/// Decoded video frame in RGBA
#[derive(Clone)]
pub struct DecodedFrame {
    /// Presentation time relative to the start of the source
    pub pts: Duration,
    pub image: RgbaImage,
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("pts", &self.pts)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

/// Seekable decoder over the primary video stream of a source
#[async_trait]
pub trait VideoDecoder: Send {
    /// Stream the decoder is attached to
    fn stream_info(&self) -> &VideoStreamInfo;

    /// Seek as needed and return the first frame whose timestamp is at or after
    /// `at` minus half a frame interval. `None` once past the end of the stream.
    async fn frame_at(&mut self, at: Duration) -> ClipResult<Option<DecodedFrame>>;

    /// Release decoder resources
    async fn close(self: Box<Self>);
}

/// Video codecs an encoder backend may be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264 constrained baseline (`avc1.42E01E`)
    H264,
    Vp9,
    Vp8,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Vp8 => "vp8",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio codecs muxed next to the video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Opus,
}

impl AudioCodec {
    /// Audio codec paired with a container: AAC in MP4, Opus in WebM
    pub fn for_container(container: ContainerFormat) -> Self {
        match container {
            ContainerFormat::Mp4 => AudioCodec::Aac,
            ContainerFormat::WebM => AudioCodec::Opus,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "opus",
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source audio the encoder transcodes into the clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub source: SourceId,
    pub stream: AudioStreamInfo,
    /// Span of the source to carry; output audio starts at zero
    pub range: TimeRange,
    pub codec: AudioCodec,
    /// Bits per second
    pub bitrate: u64,
}

/// Parameters chosen while configuring an encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub tier: CapabilityTier,
    pub codec: VideoCodec,
    pub container: ContainerFormat,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Bits per second
    pub bitrate: u64,
    /// Frames between forced key frames
    pub keyframe_interval: u64,
    /// Audio to mux alongside the video, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioTrack>,
}

impl EncoderSettings {
    /// Settings a recorder uses when VP9 is unavailable
    pub fn recorder_fallback(&self) -> Self {
        Self {
            codec: VideoCodec::Vp8,
            bitrate: self.bitrate.min(RECORDER_FALLBACK_BITRATE),
            ..self.clone()
        }
    }
}

/// Upper bounds an encode tier accepts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_bitrate: u64,
    pub max_fps: f64,
}

impl EncoderLimits {
    pub fn unbounded() -> Self {
        Self {
            max_width: u32::MAX,
            max_height: u32::MAX,
            max_bitrate: u64::MAX,
            max_fps: f64::MAX,
        }
    }

    /// Describe the first limit `settings` exceeds
    pub fn check(&self, settings: &EncoderSettings) -> Result<(), String> {
        if settings.width > self.max_width || settings.height > self.max_height {
            return Err(format!(
                "{}x{} exceeds maximum {}x{}",
                settings.width, settings.height, self.max_width, self.max_height
            ));
        }
        if settings.bitrate > self.max_bitrate {
            return Err(format!(
                "bitrate {} exceeds maximum {}",
                settings.bitrate, self.max_bitrate
            ));
        }
        if settings.fps > self.max_fps {
            return Err(format!(
                "{:.2} fps exceeds maximum {:.2}",
                settings.fps, self.max_fps
            ));
        }
        Ok(())
    }
}

impl Default for EncoderLimits {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Frame encoder plus muxer for one output clip
#[async_trait]
pub trait EncoderBackend: Send {
    fn settings(&self) -> &EncoderSettings;

    /// Submit one composited frame. Returns once the backend accepted it.
    async fn submit(&mut self, frame: &RgbaImage, pts: Duration, keyframe: bool) -> ClipResult<()>;

    /// Signal end of stream and return the finished container bytes
    async fn finish(self: Box<Self>) -> ClipResult<Vec<u8>>;

    /// Tear down after a failure, discarding partial output
    async fn abort(self: Box<Self>);
}

/// Kind of an elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

/// Elementary stream as seen by the packet reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: StreamKind,
    pub codec: String,
    pub timebase: Timebase,
    /// Stream start time in its own ticks; clip times are relative to it
    #[serde(default)]
    pub start_ticks: i64,
}

/// Compressed packet with timestamps in its stream's timebase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPacket {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub key: bool,
    pub data: Vec<u8>,
}

impl CompressedPacket {
    /// Best available timestamp
    pub fn timestamp(&self) -> Option<i64> {
        self.pts.or(self.dts)
    }

    /// Shift both timestamps back by `offset` ticks
    pub fn rebase(&mut self, offset: i64) {
        self.pts = self.pts.map(|ts| ts - offset);
        self.dts = self.dts.map(|ts| ts - offset);
    }
}

/// Container-level demuxer used by the remux path
#[async_trait]
pub trait PacketReader: Send {
    fn streams(&self) -> &[StreamDescriptor];

    /// Container the copied streams are muxed into
    fn container(&self) -> ContainerFormat;

    /// Position the reader at or before the key frame preceding `at`.
    /// Readers that cannot seek start from the beginning.
    async fn seek(&mut self, _at: Duration) -> ClipResult<()> {
        Ok(())
    }

    /// Next packet in file order, `None` at end of stream
    async fn read_packet(&mut self) -> ClipResult<Option<CompressedPacket>>;

    /// Open a muxer carrying the given subset of this reader's streams
    fn open_writer(&self, streams: &[StreamDescriptor]) -> ClipResult<Box<dyn PacketWriter>>;
}

/// Muxer receiving copied packets
#[async_trait]
pub trait PacketWriter: Send {
    /// Write one packet; `stream_index` refers to the source stream
    async fn write_packet(&mut self, packet: CompressedPacket) -> ClipResult<()>;

    /// Finalize the container and return its bytes
    async fn finish(self: Box<Self>) -> ClipResult<Vec<u8>>;
}
