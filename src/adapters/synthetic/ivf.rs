//! Minimal IVF framing
//!
//! 32 byte file header (`DKIF`, version, header size, fourcc, width, height,
//! timebase denominator, timebase numerator, frame count, audio sample rate)
//! followed by frames of `u32` payload size, `u64` pts and the payload, all
//! little endian. The last header word is reserved in real IVF files; here a
//! non-zero value marks a test-pattern audio track at that rate.

use crate::domain::model::Timebase;
use crate::error::{ClipError, ClipResult};

pub const SIGNATURE: &[u8; 4] = b"DKIF";
pub const HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;

/// File level parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub timebase: Timebase,
    pub frame_count: u32,
    /// Sample rate of the accompanying audio track, 0 when there is none
    pub audio_rate: u32,
}

/// One stored frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfFrame {
    pub pts: i64,
    pub payload: Vec<u8>,
}

/// Parsed IVF file
#[derive(Debug, Clone)]
pub struct IvfFile {
    pub header: IvfHeader,
    pub frames: Vec<IvfFrame>,
}

impl IvfFile {
    pub fn parse(bytes: &[u8]) -> ClipResult<Self> {
        if bytes.len() < HEADER_LEN || &bytes[0..4] != SIGNATURE {
            return Err(ClipError::decode("not an IVF stream"));
        }
        let header_len = read_u16(bytes, 6) as usize;
        if header_len < HEADER_LEN || header_len > bytes.len() {
            return Err(ClipError::decode(format!("bad IVF header length {}", header_len)));
        }
        let mut fourcc = [0u8; 4];
        fourcc.copy_from_slice(&bytes[8..12]);
        let den = read_u32(bytes, 16);
        let num = read_u32(bytes, 20);
        let timebase = Timebase::new(num as i32, den as i32)
            .map_err(|_| ClipError::decode(format!("bad IVF timebase {}/{}", num, den)))?;
        let header = IvfHeader {
            fourcc,
            width: read_u16(bytes, 12),
            height: read_u16(bytes, 14),
            timebase,
            frame_count: read_u32(bytes, 24),
            audio_rate: read_u32(bytes, 28),
        };

        let mut frames = Vec::with_capacity(header.frame_count as usize);
        let mut offset = header_len;
        while offset < bytes.len() {
            if offset + FRAME_HEADER_LEN > bytes.len() {
                return Err(ClipError::decode(format!("truncated frame header at byte {}", offset)));
            }
            let size = read_u32(bytes, offset) as usize;
            let pts = read_u64(bytes, offset + 4) as i64;
            let start = offset + FRAME_HEADER_LEN;
            let end = start
                .checked_add(size)
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| ClipError::decode(format!("truncated frame at byte {}", offset)))?;
            frames.push(IvfFrame {
                pts,
                payload: bytes[start..end].to_vec(),
            });
            offset = end;
        }

        Ok(Self { header, frames })
    }
}

/// Incremental IVF writer
#[derive(Debug)]
pub struct IvfWriter {
    header: IvfHeader,
    body: Vec<u8>,
    frames: u32,
}

impl IvfWriter {
    pub fn new(fourcc: [u8; 4], width: u16, height: u16, timebase: Timebase) -> Self {
        Self {
            header: IvfHeader {
                fourcc,
                width,
                height,
                timebase,
                frame_count: 0,
                audio_rate: 0,
            },
            body: Vec::new(),
            frames: 0,
        }
    }

    /// Mark the stream as carrying audio at `rate` Hz
    pub fn with_audio_rate(mut self, rate: u32) -> Self {
        self.header.audio_rate = rate;
        self
    }

    pub fn write_frame(&mut self, pts: i64, payload: &[u8]) {
        self.body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.body.extend_from_slice(&(pts as u64).to_le_bytes());
        self.body.extend_from_slice(payload);
        self.frames += 1;
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.header.frame_count = self.frames;
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(HEADER_LEN as u16).to_le_bytes());
        out.extend_from_slice(&self.header.fourcc);
        out.extend_from_slice(&self.header.width.to_le_bytes());
        out.extend_from_slice(&self.header.height.to_le_bytes());
        out.extend_from_slice(&(self.header.timebase.den as u32).to_le_bytes());
        out.extend_from_slice(&(self.header.timebase.num as u32).to_le_bytes());
        out.extend_from_slice(&self.header.frame_count.to_le_bytes());
        out.extend_from_slice(&self.header.audio_rate.to_le_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}
