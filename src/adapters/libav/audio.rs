// LibAV audio - Trim, resample and re-encode the source audio track of a clip

use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::sample::{Sample, Type};
use ffmpeg::{codec, filter, Rational};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use super::{av_time, timebase_of};
use crate::domain::model::TimeRange;
use crate::error::{ClipError, ClipResult};
use crate::ports::{AudioCodec, AudioTrack};

const OPUS_SAMPLE_RATE: u32 = 48_000;

fn audio_error(context: &str, error: ffmpeg::Error) -> ClipError {
    ClipError::encoding(format!("audio {}: {}", context, error))
}

/// Encoder names tried for `codec`, best first
pub(crate) fn encoder_names(codec: AudioCodec) -> &'static [&'static str] {
    match codec {
        AudioCodec::Aac => &["aac", "libfdk_aac"],
        AudioCodec::Opus => &["libopus"],
    }
}

/// First encoder for `codec` present in this build of libav
pub(crate) fn find_encoder(codec: AudioCodec) -> Option<ffmpeg::Codec> {
    encoder_names(codec)
        .iter()
        .find_map(|name| ffmpeg::encoder::find_by_name(name))
}

/// Output sample rate; Opus only runs at 48 kHz
pub(crate) fn output_rate(codec: AudioCodec, source_rate: u32) -> u32 {
    match codec {
        AudioCodec::Opus => OPUS_SAMPLE_RATE,
        AudioCodec::Aac if source_rate > 0 => source_rate,
        AudioCodec::Aac => OPUS_SAMPLE_RATE,
    }
}

fn sample_format(codec: AudioCodec) -> Sample {
    match codec {
        AudioCodec::Aac => Sample::F32(Type::Planar),
        AudioCodec::Opus => Sample::F32(Type::Packed),
    }
}

/// Filter chain that trims `range` out of a stream starting at `offset` and
/// hands stereo samples at `rate` to the encoder
pub(crate) fn filter_spec(range: TimeRange, offset: Duration, rate: u32, format: &str) -> String {
    format!(
        "atrim=start={:.6}:end={:.6},asetpts=PTS-STARTPTS,aresample={},aformat=sample_fmts={}:channel_layouts=stereo",
        (range.start + offset).as_secs_f64(),
        (range.end + offset).as_secs_f64(),
        rate,
        format
    )
}

fn layout_name(frame: &ffmpeg::frame::Audio) -> String {
    let mut buffer = [0 as c_char; 64];
    // SAFETY: the frame owns a valid channel layout and the buffer length is
    // passed along, so libav never writes past it.
    let written = unsafe {
        ffmpeg::ffi::av_channel_layout_describe(
            &(*frame.as_ptr()).ch_layout,
            buffer.as_mut_ptr(),
            buffer.len(),
        )
    };
    if written <= 0 {
        return "stereo".to_string();
    }
    // SAFETY: av_channel_layout_describe always NUL terminates
    unsafe { CStr::from_ptr(buffer.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Audio half of an encode: decodes the source track, trims it to the clip
/// range and muxes the re-encoded packets into the clip's output.
pub(crate) struct AudioTranscoder {
    _staged: Arc<NamedTempFile>,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    input_timebase: Rational,
    offset: Duration,
    range: TimeRange,
    codec: AudioCodec,
    rate: u32,
    decoder: ffmpeg::decoder::Audio,
    encoder: ffmpeg::encoder::Audio,
    graph: Option<filter::Graph>,
    output_index: usize,
    output_timebase: Rational,
    next_pts: i64,
}

impl AudioTranscoder {
    /// Open the source track and add the encoded audio stream to `output`.
    /// Must run before the output header is written.
    pub(crate) fn open(
        staged: Arc<NamedTempFile>,
        track: &AudioTrack,
        output: &mut ffmpeg::format::context::Output,
        global_header: bool,
    ) -> ClipResult<Self> {
        let input = ffmpeg::format::input(&staged.path())
            .map_err(|e| ClipError::decode(format!("failed to open source audio: {}", e)))?;
        let (input_timebase, start_ticks, decoder) = {
            let stream = input
                .stream(track.stream.index)
                .ok_or_else(|| ClipError::decode(format!("audio stream {} not found", track.stream.index)))?;
            let decoder = codec::context::Context::from_parameters(stream.parameters())
                .and_then(|context| context.decoder().audio())
                .map_err(|e| ClipError::decode(format!("failed to open audio decoder: {}", e)))?;
            (stream.time_base(), stream.start_time().max(0), decoder)
        };
        let offset = timebase_of(input_timebase)?.ticks_to_duration(start_ticks);

        let codec = find_encoder(track.codec)
            .ok_or_else(|| ClipError::encoding(format!("no {} encoder", track.codec)))?;
        let rate = output_rate(track.codec, track.stream.sample_rate);
        let mut context = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|e| audio_error("failed to create encoder", e))?;
        context.set_rate(rate as i32);
        context.set_format(sample_format(track.codec));
        context.set_bit_rate(track.bitrate as usize);
        context.set_time_base(Rational(1, rate as i32));
        // SAFETY: the context is not opened yet, so its layout may be replaced
        unsafe {
            ffmpeg::ffi::av_channel_layout_default(&mut (*context.as_mut_ptr()).ch_layout, 2);
        }
        if global_header {
            context.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = context
            .open_as(codec)
            .map_err(|e| audio_error("failed to open encoder", e))?;

        let output_index = {
            let mut stream = output
                .add_stream(codec)
                .map_err(|e| audio_error("failed to add stream", e))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(Rational(1, rate as i32));
            stream.index()
        };

        debug!(codec = %track.codec, rate, bitrate = track.bitrate, "Audio encoder opened");
        Ok(Self {
            _staged: staged,
            input,
            stream_index: track.stream.index,
            input_timebase,
            offset,
            range: track.range,
            codec: track.codec,
            rate,
            decoder,
            encoder,
            graph: None,
            output_index,
            output_timebase: Rational(1, rate as i32),
            next_pts: 0,
        })
    }

    /// Pick up the timebase the muxer settled on once the header is written
    pub(crate) fn header_written(&mut self, output: &ffmpeg::format::context::Output) {
        if let Some(stream) = output.stream(self.output_index) {
            self.output_timebase = stream.time_base();
        }
    }

    /// Decode, trim and encode the whole range. Returns the samples written.
    pub(crate) fn transcode(&mut self, output: &mut ffmpeg::format::context::Output) -> ClipResult<i64> {
        let target = av_time(self.range.start + self.offset);
        self.input
            .seek(target, ..target)
            .map_err(|e| ClipError::decode(format!("audio seek failed: {}", e)))?;
        let timebase = timebase_of(self.input_timebase)?;
        let stop = self.range.end + self.offset;

        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    if let Some(pts) = packet.pts() {
                        if timebase.ticks_to_duration(pts.max(0)) >= stop {
                            break;
                        }
                    }
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|e| ClipError::decode(format!("audio decode failed: {}", e)))?;
                    self.receive_decoded(output)?;
                }
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(ClipError::decode(format!("failed to read audio: {}", e))),
            }
        }

        // draining an already drained decoder is harmless
        let _ = self.decoder.send_eof();
        self.receive_decoded(output)?;
        if let Some(graph) = self.graph.as_mut() {
            if let Some(mut source) = graph.get("in") {
                source
                    .source()
                    .flush()
                    .map_err(|e| audio_error("failed to flush filter", e))?;
            }
        }
        self.receive_filtered(output)?;
        self.encoder
            .send_eof()
            .map_err(|e| audio_error("failed to flush encoder", e))?;
        self.write_encoded(output)?;

        debug!(samples = self.next_pts, rate = self.rate, "Audio transcoded");
        Ok(self.next_pts)
    }

    fn receive_decoded(&mut self, output: &mut ffmpeg::format::context::Output) -> ClipResult<()> {
        let mut frame = ffmpeg::frame::Audio::empty();
        while self.decoder.receive_frame(&mut frame).is_ok() {
            let timestamp = frame.timestamp().or_else(|| frame.pts());
            frame.set_pts(timestamp);
            if self.graph.is_none() {
                self.graph = Some(self.build_graph(&frame)?);
            }
            if let Some(mut source) = self.graph.as_mut().and_then(|g| g.get("in")) {
                source
                    .source()
                    .add(&frame)
                    .map_err(|e| audio_error("filter rejected frame", e))?;
            }
            self.receive_filtered(output)?;
        }
        Ok(())
    }

    fn receive_filtered(&mut self, output: &mut ffmpeg::format::context::Output) -> ClipResult<()> {
        let Some(graph) = self.graph.as_mut() else {
            return Ok(());
        };
        let Some(mut sink) = graph.get("out") else {
            return Ok(());
        };
        let mut filtered = ffmpeg::frame::Audio::empty();
        while sink.sink().frame(&mut filtered).is_ok() {
            filtered.set_pts(Some(self.next_pts));
            self.next_pts += filtered.samples() as i64;
            self.encoder
                .send_frame(&filtered)
                .map_err(|e| audio_error("encoder rejected frame", e))?;
            let mut packet = ffmpeg::Packet::empty();
            while self.encoder.receive_packet(&mut packet).is_ok() {
                Self::write_packet(&mut packet, self.output_index, self.rate, self.output_timebase, output)?;
            }
        }
        Ok(())
    }

    fn write_encoded(&mut self, output: &mut ffmpeg::format::context::Output) -> ClipResult<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            Self::write_packet(&mut packet, self.output_index, self.rate, self.output_timebase, output)?;
        }
        Ok(())
    }

    fn write_packet(
        packet: &mut ffmpeg::Packet,
        index: usize,
        rate: u32,
        timebase: Rational,
        output: &mut ffmpeg::format::context::Output,
    ) -> ClipResult<()> {
        packet.set_stream(index);
        packet.rescale_ts(Rational(1, rate as i32), timebase);
        trace!(pts = ?packet.pts(), "Audio packet");
        packet
            .write_interleaved(output)
            .map_err(|e| audio_error("failed to write packet", e))
    }

    fn build_graph(&self, first: &ffmpeg::frame::Audio) -> ClipResult<filter::Graph> {
        let mut graph = filter::Graph::new();
        let args = format!(
            "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout={}",
            self.input_timebase.numerator(),
            self.input_timebase.denominator(),
            first.rate(),
            first.format().name(),
            layout_name(first)
        );
        let abuffer = filter::find("abuffer").ok_or_else(|| ClipError::backend("abuffer filter missing"))?;
        let abuffersink =
            filter::find("abuffersink").ok_or_else(|| ClipError::backend("abuffersink filter missing"))?;
        graph
            .add(&abuffer, "in", &args)
            .map_err(|e| audio_error("failed to add filter source", e))?;
        graph
            .add(&abuffersink, "out", "")
            .map_err(|e| audio_error("failed to add filter sink", e))?;

        let spec = filter_spec(self.range, self.offset, self.rate, sample_format(self.codec).name());
        graph
            .output("in", 0)
            .and_then(|parser| parser.input("out", 0))
            .and_then(|parser| parser.parse(&spec))
            .map_err(|e| audio_error("failed to parse filter", e))?;
        graph
            .validate()
            .map_err(|e| audio_error("invalid filter graph", e))?;
        if let Some(mut sink) = graph.get("out") {
            sink.sink().set_frame_size(self.encoder.frame_size());
        }
        trace!(filter = %spec, "Audio filter built");
        Ok(graph)
    }
}
