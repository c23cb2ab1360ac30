// LibAV decoder - Seekable RGBA frame access for the frame source

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{self, Flags};
use image::RgbaImage;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use super::{av_time, blocking};
use crate::domain::model::VideoStreamInfo;
use crate::error::{ClipError, ClipResult};
use crate::ports::{DecodedFrame, VideoDecoder};

/// Owns a scaling context on the task that drives the decoder
pub(crate) struct SendScaler(pub(crate) scaling::Context);

// SAFETY: the context is only ever used through `&mut self` of its owner and
// never shared between threads.
unsafe impl Send for SendScaler {}

/// Decoder side owned by libav; moved onto a blocking thread for each read
struct DecoderState {
    _staged: Arc<NamedTempFile>,
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: SendScaler,
    info: VideoStreamInfo,
    /// Stream start time in stream ticks
    start_ticks: i64,
    last: Option<Duration>,
    eof: bool,
}

pub struct LibavDecoder {
    info: VideoStreamInfo,
    state: Option<DecoderState>,
}

impl LibavDecoder {
    pub(crate) fn open(
        staged: Arc<NamedTempFile>,
        input: ffmpeg::format::context::Input,
        info: VideoStreamInfo,
    ) -> ClipResult<Self> {
        let stream = input
            .stream(info.index)
            .ok_or_else(|| ClipError::decode(format!("video stream {} not found", info.index)))?;
        let start_ticks = stream.start_time().max(0);
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| ClipError::decode(format!("failed to open decoder: {}", e)))?;
        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGBA,
            info.width,
            info.height,
            Flags::BILINEAR,
        )
        .map_err(|e| ClipError::decode(format!("failed to create scaler: {}", e)))?;

        debug!(codec = %info.codec, width = info.width, height = info.height, "Decoder opened");
        Ok(Self {
            info: info.clone(),
            state: Some(DecoderState {
                _staged: staged,
                input,
                decoder,
                scaler: SendScaler(scaler),
                info,
                start_ticks,
                last: None,
                eof: false,
            }),
        })
    }
}

impl DecoderState {
    fn frame_at(&mut self, at: Duration) -> ClipResult<Option<DecodedFrame>> {
        let threshold = at.saturating_sub(self.info.frame_duration() / 2);
        let backwards = match self.last {
            Some(last) => last >= threshold,
            None => threshold > Duration::ZERO,
        };
        if backwards {
            self.seek(threshold)?;
        }

        let found = loop {
            match self.next_decoded()? {
                Some(frame) if frame.pts >= threshold => break Some(frame),
                Some(_) => continue,
                None => break None,
            }
        };
        if let Some(frame) = &found {
            self.last = Some(frame.pts);
        }
        Ok(found)
    }

    fn seek(&mut self, at: Duration) -> ClipResult<()> {
        let offset = self.info.timebase.ticks_to_duration(self.start_ticks);
        let target = av_time(at + offset);
        self.input
            .seek(target, ..target)
            .map_err(|e| ClipError::decode(format!("seek to {:?} failed: {}", at, e)))?;
        self.decoder.flush();
        self.last = None;
        self.eof = false;
        trace!(at = ?at, "Decoder seeked");
        Ok(())
    }

    fn next_decoded(&mut self) -> ClipResult<Option<DecodedFrame>> {
        loop {
            let mut frame = ffmpeg::frame::Video::empty();
            if self.decoder.receive_frame(&mut frame).is_ok() {
                return self.convert(&frame).map(Some);
            }
            if self.eof {
                return Ok(None);
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() == self.info.index {
                        self.decoder
                            .send_packet(&packet)
                            .map_err(|e| ClipError::decode(e.to_string()))?;
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.eof = true;
                    // draining an already drained decoder is harmless
                    let _ = self.decoder.send_eof();
                }
                Err(e) => return Err(ClipError::decode(e.to_string())),
            }
        }
    }

    fn convert(&mut self, frame: &ffmpeg::frame::Video) -> ClipResult<DecodedFrame> {
        let ticks = frame
            .timestamp()
            .or_else(|| frame.pts())
            .ok_or_else(|| ClipError::decode("decoded frame without timestamp"))?;
        let pts = self.info.timebase.ticks_to_duration(ticks - self.start_ticks);

        let mut rgba = ffmpeg::frame::Video::empty();
        self.scaler
            .0
            .run(frame, &mut rgba)
            .map_err(|e| ClipError::decode(format!("pixel conversion failed: {}", e)))?;

        let (width, height) = (self.info.width as usize, self.info.height as usize);
        let stride = rgba.stride(0);
        let data = rgba.data(0);
        let mut pixels = Vec::with_capacity(width * height * 4);
        for row in 0..height {
            let offset = row * stride;
            pixels.extend_from_slice(&data[offset..offset + width * 4]);
        }
        let image = RgbaImage::from_raw(self.info.width, self.info.height, pixels)
            .ok_or_else(|| ClipError::decode("decoded frame has the wrong size"))?;
        Ok(DecodedFrame { pts, image })
    }
}

#[async_trait]
impl VideoDecoder for LibavDecoder {
    fn stream_info(&self) -> &VideoStreamInfo {
        &self.info
    }

    async fn frame_at(&mut self, at: Duration) -> ClipResult<Option<DecodedFrame>> {
        let mut state = self
            .state
            .take()
            .ok_or_else(|| ClipError::decode("decoder lost after an earlier failure"))?;
        let (state, found) = blocking(move || {
            let found = state.frame_at(at);
            Ok((state, found))
        })
        .await?;
        self.state = Some(state);
        found
    }

    async fn close(self: Box<Self>) {
        debug!("Decoder closed");
    }
}
