// LibAV encoder - RGBA frames to H.264/MP4 or VP9/VP8/WebM, with optional AAC/Opus audio

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{self, Flags};
use ffmpeg::{codec, Dictionary, Rational};
use image::RgbaImage;
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

use super::audio::AudioTranscoder;
use super::decoder::SendScaler;
use super::{blocking, read_output};
use crate::domain::model::Timebase;
use crate::error::{ClipError, ClipResult};
use crate::ports::{EncoderBackend, EncoderSettings, VideoCodec};

const ENCODER_TIMEBASE: i32 = 90_000;

fn encoder_error(context: &str, error: ffmpeg::Error) -> ClipError {
    ClipError::encoding(format!("{}: {}", context, error))
}

/// Whether encoder `name` exists and opens with a small test configuration
pub(crate) fn probe_encoder(name: &str) -> bool {
    let Some(codec) = ffmpeg::encoder::find_by_name(name) else {
        return false;
    };
    let Ok(mut video) = codec::context::Context::new_with_codec(codec).encoder().video() else {
        return false;
    };
    video.set_width(256);
    video.set_height(256);
    video.set_format(Pixel::YUV420P);
    video.set_time_base(Rational(1, 30));
    video.open_as(codec).is_ok()
}

/// Private encoder options per codec. H.264 key frame requests must produce
/// IDR frames so every forced key frame is a clean cut point.
pub(crate) fn codec_option_pairs(codec: VideoCodec) -> &'static [(&'static str, &'static str)] {
    match codec {
        VideoCodec::H264 => &[("profile", "baseline"), ("forced-idr", "1")],
        VideoCodec::Vp9 | VideoCodec::Vp8 => &[("deadline", "realtime"), ("cpu-used", "8")],
    }
}

fn codec_options(codec: VideoCodec) -> Dictionary<'static> {
    let mut options = Dictionary::new();
    for (key, value) in codec_option_pairs(codec) {
        options.set(key, value);
    }
    options
}

/// Everything libav owns for one output; moved onto blocking threads for
/// each call
struct EncoderState {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: SendScaler,
    stream_index: usize,
    stream_timebase: Rational,
    audio: Option<AudioTranscoder>,
    width: u32,
    height: u32,
}

pub struct LibavEncoder {
    settings: EncoderSettings,
    state: Option<EncoderState>,
    file: NamedTempFile,
    frames: u64,
}

impl LibavEncoder {
    /// Open encoder `name`. With `audio_source` the settings' audio track is
    /// transcoded next to the video; without it, or without an encoder for the
    /// track's codec, the clip is silent and the returned settings say so.
    pub(crate) fn open(
        name: &str,
        mut settings: EncoderSettings,
        audio_source: Option<Arc<NamedTempFile>>,
    ) -> ClipResult<Self> {
        let codec = ffmpeg::encoder::find_by_name(name)
            .ok_or_else(|| ClipError::encoding(format!("encoder {} not found", name)))?;
        let file = tempfile::Builder::new()
            .prefix("verticut-clip-")
            .suffix(&format!(".{}", settings.container.extension()))
            .tempfile()?;
        let mut output = ffmpeg::format::output(&file.path())
            .map_err(|e| encoder_error("failed to create output", e))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| encoder_error("failed to create encoder", e))?;
        video.set_width(settings.width);
        video.set_height(settings.height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(Rational(1, ENCODER_TIMEBASE));
        video.set_frame_rate(Some(Rational((settings.fps * 1000.0).round() as i32, 1000)));
        video.set_bit_rate(settings.bitrate as usize);
        video.set_max_bit_rate(settings.bitrate as usize);
        video.set_gop(settings.keyframe_interval as u32);
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = video
            .open_as_with(codec, codec_options(settings.codec))
            .map_err(|e| encoder_error(&format!("failed to open {}", name), e))?;

        let stream_index = {
            let mut stream = output
                .add_stream(codec)
                .map_err(|e| encoder_error("failed to add stream", e))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(Rational(1, ENCODER_TIMEBASE));
            stream.index()
        };

        let mut audio = match (settings.audio.as_ref(), audio_source) {
            (Some(track), Some(staged)) => {
                match AudioTranscoder::open(staged, track, &mut output, global_header) {
                    Ok(transcoder) => Some(transcoder),
                    Err(e) => {
                        warn!(codec = %track.codec, "Dropping audio: {}", e);
                        None
                    }
                }
            }
            (Some(_), None) => {
                warn!("Source is not staged, dropping audio");
                None
            }
            (None, _) => None,
        };
        if audio.is_none() {
            settings.audio = None;
        }

        output
            .write_header()
            .map_err(|e| encoder_error("failed to write header", e))?;
        let stream_timebase = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(Rational(1, ENCODER_TIMEBASE));
        if let Some(audio) = audio.as_mut() {
            audio.header_written(&output);
        }

        let scaler = scaling::Context::get(
            Pixel::RGBA,
            settings.width,
            settings.height,
            Pixel::YUV420P,
            settings.width,
            settings.height,
            Flags::BILINEAR,
        )
        .map_err(|e| encoder_error("failed to create scaler", e))?;

        debug!(
            encoder = name,
            codec = %settings.codec,
            container = %settings.container,
            audio = settings.audio.is_some(),
            "Encoder opened"
        );
        Ok(Self {
            state: Some(EncoderState {
                output,
                encoder,
                scaler: SendScaler(scaler),
                stream_index,
                stream_timebase,
                audio,
                width: settings.width,
                height: settings.height,
            }),
            settings,
            file,
            frames: 0,
        })
    }

    fn take_state(&mut self) -> ClipResult<EncoderState> {
        self.state
            .take()
            .ok_or_else(|| ClipError::encoding("encoder lost after an earlier failure"))
    }
}

impl EncoderState {
    fn drain(&mut self) -> ClipResult<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(Rational(1, ENCODER_TIMEBASE), self.stream_timebase);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| encoder_error("failed to write packet", e))?;
        }
        Ok(())
    }

    fn encode_frame(&mut self, frame: &RgbaImage, pts: Duration, keyframe: bool) -> ClipResult<()> {
        let (width, height) = (self.width, self.height);
        let mut rgba = ffmpeg::frame::Video::new(Pixel::RGBA, width, height);
        let stride = rgba.stride(0);
        let row_len = width as usize * 4;
        let data = rgba.data_mut(0);
        for (row, pixels) in frame.as_raw().chunks_exact(row_len).enumerate() {
            data[row * stride..row * stride + row_len].copy_from_slice(pixels);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .0
            .run(&rgba, &mut yuv)
            .map_err(|e| encoder_error("pixel conversion failed", e))?;
        let timebase = Timebase {
            num: 1,
            den: ENCODER_TIMEBASE,
        };
        yuv.set_pts(Some(timebase.duration_to_ticks(pts)));
        if keyframe {
            yuv.set_kind(ffmpeg::picture::Type::I);
        }

        self.encoder
            .send_frame(&yuv)
            .map_err(|e| encoder_error("encoder rejected frame", e))?;
        self.drain()
    }

    /// Flush video, transcode audio and write the trailer
    fn finish(mut self) -> ClipResult<()> {
        self.encoder
            .send_eof()
            .map_err(|e| encoder_error("failed to flush encoder", e))?;
        self.drain()?;
        if let Some(mut audio) = self.audio.take() {
            audio.transcode(&mut self.output)?;
        }
        self.output
            .write_trailer()
            .map_err(|e| encoder_error("failed to write trailer", e))
    }
}

#[async_trait]
impl EncoderBackend for LibavEncoder {
    fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    async fn submit(&mut self, frame: &RgbaImage, pts: Duration, keyframe: bool) -> ClipResult<()> {
        let (width, height) = (self.settings.width, self.settings.height);
        if frame.dimensions() != (width, height) {
            return Err(ClipError::encoding(format!(
                "frame is {}x{}, encoder configured for {}x{}",
                frame.width(),
                frame.height(),
                width,
                height
            )));
        }

        let mut state = self.take_state()?;
        let frame = frame.clone();
        let (state, result) = blocking(move || {
            let result = state.encode_frame(&frame, pts, keyframe);
            Ok((state, result))
        })
        .await?;
        self.state = Some(state);
        result?;
        self.frames += 1;
        trace!(frame = self.frames, pts = ?pts, keyframe, "Frame submitted");
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> ClipResult<Vec<u8>> {
        let state = self.take_state()?;
        blocking(move || state.finish()).await?;
        read_output(self.file.path()).await
    }

    async fn abort(self: Box<Self>) {
        debug!(frames = self.frames, "Encoder aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h264_forces_idr_key_frames() {
        let options = codec_option_pairs(VideoCodec::H264);
        assert!(options.contains(&("forced-idr", "1")));
        assert!(options.contains(&("profile", "baseline")));
    }

    #[test]
    fn test_vpx_options_favour_realtime() {
        for codec in [VideoCodec::Vp9, VideoCodec::Vp8] {
            let options = codec_option_pairs(codec);
            assert!(options.contains(&("deadline", "realtime")), "{codec}");
            assert!(!options.iter().any(|(key, _)| *key == "forced-idr"));
        }
    }
}
