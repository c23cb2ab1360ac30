// Domain models - Core types and data structures

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::rules::sanitize_label;
use crate::error::{ClipError, ClipResult};
use crate::utils::time::{format_timecode, parse_timecode};

/// Identity of a source media handle, used to serialize jobs per source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(Uuid);

impl SourceId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable handle to the uploaded source file.
///
/// Cloning is cheap and keeps the same [`SourceId`], so a clone still counts as
/// the same source for the one-job-per-source rule.
#[derive(Clone)]
pub struct SourceMedia {
    id: SourceId,
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl SourceMedia {
    /// Wrap source bytes with their declared MIME type
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            id: SourceId::new(),
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Read a file from disk, inferring the MIME type from its extension
    pub async fn from_file(path: impl AsRef<Path>) -> ClipResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let mime = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(mime_for_extension)
            .unwrap_or("application/octet-stream");
        Ok(Self::new(bytes, mime))
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the bytes, for work moved off the async executor
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Container implied by the declared MIME type, if it is one we emit
    pub fn container_hint(&self) -> Option<ContainerFormat> {
        ContainerFormat::from_mime(&self.mime_type)
    }
}

impl fmt::Debug for SourceMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceMedia")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "ivf" => "video/x-ivf",
        _ => "application/octet-stream",
    }
}

/// Half-open time span `[start, end)` within the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Duration,
    pub end: Duration,
}

impl TimeRange {
    /// Create a range without validation; ranges are checked once the source
    /// duration is known
    pub fn new(start: Duration, end: Duration) -> Self {
        Self { start, end }
    }

    /// Parse `MM:SS` / `HH:MM:SS` boundaries
    pub fn parse(start: &str, end: &str) -> ClipResult<Self> {
        Ok(Self::new(parse_timecode(start)?, parse_timecode(end)?))
    }

    /// Length of the range, zero when reversed
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    /// Check the range against the discovered source duration
    pub fn validate_against(&self, source_duration: Duration) -> ClipResult<()> {
        if self.end <= self.start {
            return Err(ClipError::invalid_range(
                self.start,
                self.end,
                "end must be after start",
            ));
        }
        if self.end > source_duration {
            return Err(ClipError::invalid_range(
                self.start,
                self.end,
                format!("source is only {} long", format_timecode(source_duration)),
            ));
        }
        Ok(())
    }

    pub fn contains(&self, t: Duration) -> bool {
        t >= self.start && t < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_timecode(self.start), format_timecode(self.end))
    }
}

/// One requested output clip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRequest {
    pub range: TimeRange,
    /// Human title used only for naming the output
    pub label: String,
}

impl ClipRequest {
    pub fn new(range: TimeRange, label: impl Into<String>) -> Self {
        Self {
            range,
            label: label.into(),
        }
    }

    /// Build a request from its text form
    pub fn parse(start: &str, end: &str, label: impl Into<String>) -> ClipResult<Self> {
        Ok(Self::new(TimeRange::parse(start, end)?, label))
    }
}

impl FromStr for ClipRequest {
    type Err = ClipError;

    /// Parse `START,END,LABEL`; the label may itself contain commas
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ',');
        let start = parts.next().unwrap_or_default();
        let end = parts.next().ok_or_else(|| ClipError::MalformedTimecode {
            input: s.to_string(),
            reason: "expected START,END,LABEL".to_string(),
        })?;
        let label = parts.next().unwrap_or_default().trim();
        Self::parse(start, end, label)
    }
}

/// Output container of a produced clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    WebM,
}

impl ContainerFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::WebM => "video/webm",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::WebM => "webm",
        }
    }

    /// Map a declared MIME type (parameters ignored) to a container
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "video/mp4" | "video/quicktime" | "video/x-m4v" => Some(ContainerFormat::Mp4),
            "video/webm" | "video/x-matroska" => Some(ContainerFormat::WebM),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Ranked encode capability of the runtime, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityTier {
    /// Bitstream copy only, no frame access
    RemuxOnly,
    /// Software frame capture fed to a general-purpose recorder
    CanvasRecorder,
    /// Explicit (hardware accelerated) frame encoder and decoder
    HardwareFrameEncoder,
}

impl CapabilityTier {
    pub const ALL: [CapabilityTier; 3] = [
        CapabilityTier::HardwareFrameEncoder,
        CapabilityTier::CanvasRecorder,
        CapabilityTier::RemuxOnly,
    ];

    /// The tier immediately below this one
    pub fn step_down(&self) -> Option<CapabilityTier> {
        match self {
            CapabilityTier::HardwareFrameEncoder => Some(CapabilityTier::CanvasRecorder),
            CapabilityTier::CanvasRecorder => Some(CapabilityTier::RemuxOnly),
            CapabilityTier::RemuxOnly => None,
        }
    }

    /// Tiers that decode and re-encode frames (and can therefore crop)
    pub fn is_encode_tier(&self) -> bool {
        !matches!(self, CapabilityTier::RemuxOnly)
    }

    /// Container an encode tier produces; remux keeps the source container
    pub fn output_container(&self) -> Option<ContainerFormat> {
        match self {
            CapabilityTier::HardwareFrameEncoder => Some(ContainerFormat::Mp4),
            CapabilityTier::CanvasRecorder => Some(ContainerFormat::WebM),
            CapabilityTier::RemuxOnly => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityTier::RemuxOnly => "remux-only",
            CapabilityTier::CanvasRecorder => "canvas-recorder",
            CapabilityTier::HardwareFrameEncoder => "hardware-frame-encoder",
        }
    }
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityTier {
    type Err = ClipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remux-only" | "remux" => Ok(CapabilityTier::RemuxOnly),
            "canvas-recorder" | "recorder" | "canvas" => Ok(CapabilityTier::CanvasRecorder),
            "hardware-frame-encoder" | "hardware" | "hw" => Ok(CapabilityTier::HardwareFrameEncoder),
            other => Err(ClipError::config(format!(
                "Invalid tier: {}. Valid tiers: remux-only, canvas-recorder, hardware-frame-encoder",
                other
            ))),
        }
    }
}

/// Terminal artifact for one successful request
#[derive(Clone, Serialize)]
pub struct EncodedClip {
    /// Position of the originating request in the job
    pub index: usize,
    pub label: String,
    #[serde(skip)]
    pub bytes: Arc<[u8]>,
    pub container: ContainerFormat,
    /// Path that produced the bytes
    pub tier: CapabilityTier,
    pub width: u32,
    pub height: u32,
    /// Nominal duration of the output
    pub duration: Duration,
}

impl EncodedClip {
    pub fn mime_type(&self) -> &'static str {
        self.container.mime_type()
    }

    /// Download name derived from the label
    pub fn suggested_filename(&self) -> String {
        format!("{}.{}", sanitize_label(&self.label), self.container.extension())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for EncodedClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedClip")
            .field("index", &self.index)
            .field("label", &self.label)
            .field("len", &self.bytes.len())
            .field("container", &self.container)
            .field("tier", &self.tier)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("duration", &self.duration)
            .finish()
    }
}

/// Timebase for timestamp calculations - rational seconds per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebase {
    pub num: i32,
    pub den: i32,
}

impl Timebase {
    /// Create a new timebase
    pub fn new(num: i32, den: i32) -> ClipResult<Self> {
        if den <= 0 || num <= 0 {
            return Err(ClipError::backend(format!(
                "Invalid timebase {}/{}",
                num, den
            )));
        }
        Ok(Self { num, den })
    }

    /// Microsecond ticks
    pub fn micros() -> Self {
        Self { num: 1, den: 1_000_000 }
    }

    /// Convert floating point seconds per tick
    pub fn to_seconds(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Ticks to wall duration; negative ticks clamp to zero
    pub fn ticks_to_duration(&self, ticks: i64) -> Duration {
        if ticks <= 0 {
            return Duration::ZERO;
        }
        let nanos = ticks as i128 * self.num as i128 * 1_000_000_000 / self.den as i128;
        Duration::from_nanos(nanos.min(u64::MAX as i128) as u64)
    }

    /// Duration to ticks, rounded to nearest
    pub fn duration_to_ticks(&self, d: Duration) -> i64 {
        let nanos = d.as_nanos() as i128;
        let denom = self.num as i128 * 1_000_000_000;
        ((nanos * self.den as i128 + denom / 2) / denom) as i64
    }

    /// Rescale ticks from this timebase to target timebase
    pub fn rescale(&self, ticks: i64, target: &Timebase) -> i64 {
        if self == target {
            return ticks;
        }
        let num = ticks as i128 * self.num as i128 * target.den as i128;
        let den = self.den as i128 * target.num as i128;
        (num / den) as i64
    }
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Primary video stream description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub index: usize,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub timebase: Timebase,
}

impl VideoStreamInfo {
    /// Create new video stream info with validation
    pub fn new(
        index: usize,
        codec: impl Into<String>,
        width: u32,
        height: u32,
        frame_rate: f64,
        timebase: Timebase,
    ) -> ClipResult<Self> {
        if width == 0 || height == 0 {
            return Err(ClipError::backend("Video dimensions cannot be zero"));
        }
        if !(frame_rate > 0.0) {
            return Err(ClipError::backend("Frame rate must be positive"));
        }
        Ok(Self {
            index,
            codec: codec.into(),
            width,
            height,
            frame_rate,
            timebase,
        })
    }

    /// Get aspect ratio
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Get frame duration
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }
}

/// Primary audio stream description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub index: usize,
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// What a runtime learned about a source once it started decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: Duration,
    pub container: Option<ContainerFormat>,
    pub format_name: String,
    pub video: VideoStreamInfo,
    /// Audio carried into encoded clips, if the source has any
    #[serde(default)]
    pub audio: Option<AudioStreamInfo>,
}

#[cfg(test)]
mod tests;
