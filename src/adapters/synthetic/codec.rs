//! Test pattern source, decoder, encoder and packet copy sessions

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use tracing::trace;

use super::ivf::{IvfFile, IvfWriter};
use crate::domain::model::*;
use crate::error::{ClipError, ClipResult};
use crate::ports::*;

/// FourCC of raw test pattern frames
pub const SOURCE_FOURCC: [u8; 4] = *b"SYNT";

const KEY: u8 = 0;
const DELTA: u8 = 1;

/// Parameters of a generated test pattern source
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    pub width: u16,
    pub height: u16,
    pub fps: u32,
    pub seconds: u32,
    /// Frames per GOP
    pub gop: u32,
    leading_delta_frames: u32,
    repeated_timestamps: bool,
    audio_rate: u32,
    mime_type: String,
}

impl SyntheticSource {
    /// `seconds` of `width` x `height` video at `fps`, one key frame per second
    pub fn new(width: u16, height: u16, fps: u32, seconds: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            seconds,
            gop: fps.max(1),
            leading_delta_frames: 0,
            repeated_timestamps: false,
            audio_rate: 0,
            mime_type: "video/mp4".to_string(),
        }
    }

    pub fn with_gop(mut self, frames: u32) -> Self {
        self.gop = frames.max(1);
        self
    }

    /// Start the stream with `frames` delta frames that have no key frame
    pub fn with_leading_delta_frames(mut self, frames: u32) -> Self {
        self.leading_delta_frames = frames;
        self
    }

    /// Give every pair of frames the same timestamp
    pub fn with_repeated_timestamps(mut self) -> Self {
        self.repeated_timestamps = true;
        self
    }

    /// Declare an accompanying audio track sampled at `rate` Hz
    pub fn with_audio(mut self, rate: u32) -> Self {
        self.audio_rate = rate;
        self
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = mime.into();
        self
    }

    pub fn frame_count(&self) -> u32 {
        self.fps * self.seconds
    }

    /// Whether frame `index` is a key frame
    pub fn is_key(&self, index: u32) -> bool {
        index >= self.leading_delta_frames && (index - self.leading_delta_frames) % self.gop == 0
    }

    /// Serialized IVF bytes
    pub fn encode(&self) -> Vec<u8> {
        // the timebase is 1/fps so pts counts frames
        let timebase = Timebase {
            num: 1,
            den: self.fps as i32,
        };
        let mut writer = IvfWriter::new(SOURCE_FOURCC, self.width, self.height, timebase)
            .with_audio_rate(self.audio_rate);
        for index in 0..self.frame_count() {
            let pts = if self.repeated_timestamps {
                (index / 2 * 2) as i64
            } else {
                index as i64
            };
            let kind = if self.is_key(index) { KEY } else { DELTA };
            let mut payload = vec![kind];
            payload.extend_from_slice(&index.to_le_bytes());
            payload.extend_from_slice(&[0x5A; 11]);
            writer.write_frame(pts, &payload);
        }
        writer.finish()
    }

    pub fn into_media(self) -> SourceMedia {
        let bytes = self.encode();
        SourceMedia::new(bytes, self.mime_type)
    }
}

/// Deterministic RGBA pattern for frame `seed`
pub fn render_pattern(width: u32, height: u32, seed: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x.wrapping_add(seed) & 0xFF) as u8,
            (y.wrapping_mul(2) & 0xFF) as u8,
            (seed.wrapping_mul(7) & 0xFF) as u8,
            255,
        ])
    })
}

/// Counts live sessions so tests can check resources were released
#[derive(Debug)]
pub(crate) struct SessionGuard {
    counter: Arc<AtomicUsize>,
}

impl SessionGuard {
    pub(crate) fn open(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Frame rate of a parsed source; measured and snapped when the timebase does
/// not count frames
pub(crate) fn stream_frame_rate(file: &IvfFile) -> f64 {
    let tb = file.header.timebase;
    if tb.num == 1 && tb.den <= 240 {
        return tb.den as f64;
    }
    let mut deltas: Vec<i64> = file
        .frames
        .windows(2)
        .map(|w| w[1].pts - w[0].pts)
        .filter(|d| *d > 0)
        .collect();
    if deltas.is_empty() {
        return crate::domain::rules::snap_frame_rate(0.0) as f64;
    }
    deltas.sort_unstable();
    let median = deltas[deltas.len() / 2] as f64 * tb.to_seconds();
    crate::domain::rules::snap_frame_rate(1.0 / median) as f64
}

/// Decoder over a parsed test pattern source
pub struct SyntheticDecoder {
    file: IvfFile,
    info: VideoStreamInfo,
    /// Index of the next frame in decode order
    cursor: usize,
    last_pts: Option<Duration>,
    _session: SessionGuard,
}

impl SyntheticDecoder {
    pub(crate) fn new(file: IvfFile, info: VideoStreamInfo, session: SessionGuard) -> Self {
        Self {
            file,
            info,
            cursor: 0,
            last_pts: None,
            _session: session,
        }
    }

    fn pts_of(&self, index: usize) -> Duration {
        self.info.timebase.ticks_to_duration(self.file.frames[index].pts)
    }

    fn is_key(&self, index: usize) -> bool {
        self.file.frames[index].payload.first() == Some(&KEY)
    }

    fn seed_of(&self, index: usize) -> u32 {
        let payload = &self.file.frames[index].payload;
        if payload.len() >= 5 {
            u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]])
        } else {
            index as u32
        }
    }

    /// Move the target forward to a frame reachable from a key frame
    fn decodable_from(&self, target: usize) -> Option<usize> {
        if (0..=target).any(|i| self.is_key(i)) {
            return Some(target);
        }
        (target..self.file.frames.len()).find(|&i| self.is_key(i))
    }
}

#[async_trait]
impl VideoDecoder for SyntheticDecoder {
    fn stream_info(&self) -> &VideoStreamInfo {
        &self.info
    }

    async fn frame_at(&mut self, at: Duration) -> ClipResult<Option<DecodedFrame>> {
        let half_interval = self.info.frame_duration() / 2;
        let threshold = at.saturating_sub(half_interval);

        // continue forward from the cursor, otherwise seek from the start
        let scan_from = match self.last_pts {
            Some(last) if last < threshold => self.cursor,
            _ => 0,
        };
        let Some(found) = (scan_from..self.file.frames.len()).find(|&i| self.pts_of(i) >= threshold) else {
            return Ok(None);
        };
        let Some(index) = self.decodable_from(found) else {
            return Ok(None);
        };

        // frame ready signal
        tokio::task::yield_now().await;

        let pts = self.pts_of(index);
        trace!(index, pts = ?pts, "Synthetic frame decoded");
        self.cursor = index + 1;
        self.last_pts = Some(pts);
        Ok(Some(DecodedFrame {
            pts,
            image: render_pattern(self.info.width, self.info.height, self.seed_of(index)),
        }))
    }

    async fn close(self: Box<Self>) {}
}

/// Encoder producing IVF with one small packet per frame
pub struct SyntheticEncoder {
    settings: EncoderSettings,
    writer: IvfWriter,
    submitted: u64,
    fail_after: Option<u64>,
    last_pts: Option<Duration>,
    _session: SessionGuard,
}

impl SyntheticEncoder {
    pub(crate) fn new(settings: EncoderSettings, fail_after: Option<u64>, session: SessionGuard) -> Self {
        let fourcc = match settings.codec {
            VideoCodec::H264 => *b"AVC1",
            VideoCodec::Vp9 => *b"VP90",
            VideoCodec::Vp8 => *b"VP80",
        };
        let writer = IvfWriter::new(
            fourcc,
            settings.width.min(u16::MAX as u32) as u16,
            settings.height.min(u16::MAX as u32) as u16,
            Timebase::micros(),
        )
        .with_audio_rate(settings.audio.as_ref().map_or(0, |track| track.stream.sample_rate));
        Self {
            settings,
            writer,
            submitted: 0,
            fail_after,
            last_pts: None,
            _session: session,
        }
    }
}

#[async_trait]
impl EncoderBackend for SyntheticEncoder {
    fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    async fn submit(&mut self, frame: &RgbaImage, pts: Duration, keyframe: bool) -> ClipResult<()> {
        if self.fail_after.is_some_and(|n| self.submitted >= n) {
            return Err(ClipError::encoding(format!(
                "{} encoder stopped after {} frames",
                self.settings.codec, self.submitted
            )));
        }
        if frame.dimensions() != (self.settings.width, self.settings.height) {
            return Err(ClipError::encoding(format!(
                "frame is {}x{}, encoder configured for {}x{}",
                frame.width(),
                frame.height(),
                self.settings.width,
                self.settings.height
            )));
        }
        if self.last_pts.is_some_and(|last| pts <= last) {
            return Err(ClipError::encoding(format!("non-monotonic pts {:?}", pts)));
        }

        tokio::task::yield_now().await;

        let pixels = (frame.width() as u64 * frame.height() as u64).max(1);
        let mut sums = [0u64; 3];
        for pixel in frame.pixels() {
            for (sum, channel) in sums.iter_mut().zip(pixel.0.iter()) {
                *sum += *channel as u64;
            }
        }
        let payload = [
            if keyframe { KEY } else { DELTA },
            (sums[0] / pixels) as u8,
            (sums[1] / pixels) as u8,
            (sums[2] / pixels) as u8,
        ];
        let ticks = Timebase::micros().duration_to_ticks(pts);
        self.writer.write_frame(ticks, &payload);
        self.submitted += 1;
        self.last_pts = Some(pts);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> ClipResult<Vec<u8>> {
        tokio::task::yield_now().await;
        Ok(self.writer.finish())
    }

    async fn abort(self: Box<Self>) {}
}

/// Packet reader over a test pattern source
pub struct SyntheticPacketReader {
    file: IvfFile,
    streams: Vec<StreamDescriptor>,
    container: ContainerFormat,
    next: usize,
    _session: SessionGuard,
}

impl SyntheticPacketReader {
    pub(crate) fn new(file: IvfFile, container: ContainerFormat, session: SessionGuard) -> Self {
        let streams = vec![StreamDescriptor {
            index: 0,
            kind: StreamKind::Video,
            codec: String::from_utf8_lossy(&file.header.fourcc).to_lowercase(),
            timebase: file.header.timebase,
            start_ticks: 0,
        }];
        Self {
            file,
            streams,
            container,
            next: 0,
            _session: session,
        }
    }
}

#[async_trait]
impl PacketReader for SyntheticPacketReader {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn container(&self) -> ContainerFormat {
        self.container
    }

    async fn read_packet(&mut self) -> ClipResult<Option<CompressedPacket>> {
        let Some(frame) = self.file.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        Ok(Some(CompressedPacket {
            stream_index: 0,
            pts: Some(frame.pts),
            dts: Some(frame.pts),
            duration: 1,
            key: frame.payload.first() == Some(&KEY),
            data: frame.payload.clone(),
        }))
    }

    fn open_writer(&self, streams: &[StreamDescriptor]) -> ClipResult<Box<dyn PacketWriter>> {
        let video = match streams {
            [only] if only.kind == StreamKind::Video => only,
            _ => {
                return Err(ClipError::backend(
                    "synthetic muxer carries exactly one video stream",
                ))
            }
        };
        Ok(Box::new(SyntheticPacketWriter {
            stream_index: video.index,
            writer: IvfWriter::new(
                self.file.header.fourcc,
                self.file.header.width,
                self.file.header.height,
                video.timebase,
            ),
        }))
    }
}

/// IVF muxer for copied packets
pub struct SyntheticPacketWriter {
    stream_index: usize,
    writer: IvfWriter,
}

#[async_trait]
impl PacketWriter for SyntheticPacketWriter {
    async fn write_packet(&mut self, packet: CompressedPacket) -> ClipResult<()> {
        if packet.stream_index != self.stream_index {
            return Err(ClipError::backend(format!(
                "unexpected stream {}",
                packet.stream_index
            )));
        }
        let pts = packet
            .timestamp()
            .ok_or_else(|| ClipError::backend("packet without timestamp"))?;
        self.writer.write_frame(pts, &packet.data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> ClipResult<Vec<u8>> {
        Ok(self.writer.finish())
    }
}
