// LibAV packet copy - Demux source packets and mux them unchanged

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use ffmpeg::Rational;
use tempfile::NamedTempFile;
use tracing::debug;

use super::{av_time, read_output, timebase_of};
use crate::domain::model::ContainerFormat;
use crate::error::{ClipError, ClipResult};
use crate::ports::*;

pub struct LibavPacketReader {
    _staged: Arc<NamedTempFile>,
    input: ffmpeg::format::context::Input,
    streams: Vec<StreamDescriptor>,
    container: ContainerFormat,
    /// Start time of the video stream, added to seek targets
    start_offset: Duration,
}

impl LibavPacketReader {
    pub(crate) fn open(
        staged: Arc<NamedTempFile>,
        input: ffmpeg::format::context::Input,
        container: ContainerFormat,
    ) -> ClipResult<Self> {
        let streams = input
            .streams()
            .map(|stream| {
                let parameters = stream.parameters();
                let kind = match parameters.medium() {
                    ffmpeg::media::Type::Video => StreamKind::Video,
                    ffmpeg::media::Type::Audio => StreamKind::Audio,
                    _ => StreamKind::Other,
                };
                Ok(StreamDescriptor {
                    index: stream.index(),
                    kind,
                    codec: parameters.id().name().to_string(),
                    timebase: timebase_of(stream.time_base())?,
                    // AV_NOPTS_VALUE clamps to zero
                    start_ticks: stream.start_time().max(0),
                })
            })
            .collect::<ClipResult<Vec<_>>>()?;
        let start_offset = streams
            .iter()
            .find(|s| s.kind == StreamKind::Video)
            .map(|s| s.timebase.ticks_to_duration(s.start_ticks))
            .unwrap_or_default();
        Ok(Self {
            _staged: staged,
            input,
            streams,
            container,
            start_offset,
        })
    }
}

#[async_trait]
impl PacketReader for LibavPacketReader {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn container(&self) -> ContainerFormat {
        self.container
    }

    async fn seek(&mut self, at: Duration) -> ClipResult<()> {
        let target = av_time(at + self.start_offset);
        self.input
            .seek(target, ..target)
            .map_err(|e| ClipError::backend(format!("seek failed: {}", e)))
    }

    async fn read_packet(&mut self) -> ClipResult<Option<CompressedPacket>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Ok(Some(CompressedPacket {
                stream_index: packet.stream(),
                pts: packet.pts(),
                dts: packet.dts(),
                duration: packet.duration(),
                key: packet.is_key(),
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            })),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(ClipError::decode(format!("failed to read packet: {}", e))),
        }
    }

    fn open_writer(&self, streams: &[StreamDescriptor]) -> ClipResult<Box<dyn PacketWriter>> {
        let file = tempfile::Builder::new()
            .prefix("verticut-remux-")
            .suffix(&format!(".{}", self.container.extension()))
            .tempfile()?;
        let mut output = ffmpeg::format::output(&file.path())?;

        let mut mapping = HashMap::new();
        for (position, descriptor) in streams.iter().enumerate() {
            let input_stream = self
                .input
                .stream(descriptor.index)
                .ok_or_else(|| ClipError::backend(format!("stream {} not found", descriptor.index)))?;
            let mut stream = output.add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))?;
            stream.set_parameters(input_stream.parameters());
            // SAFETY: the parameters belong to the stream just added and the
            // muxer picks its own tag when this is cleared.
            unsafe {
                (*stream.parameters().as_mut_ptr()).codec_tag = 0;
            }
            mapping.insert(descriptor.index, (position, input_stream.time_base()));
        }
        output.write_header()?;

        let mapping = mapping
            .into_iter()
            .map(|(input_index, (position, input_timebase))| {
                let output_timebase = output
                    .stream(position)
                    .map(|s| s.time_base())
                    .unwrap_or(input_timebase);
                (input_index, (position, input_timebase, output_timebase))
            })
            .collect();
        debug!(streams = streams.len(), container = %self.container, "Remux writer opened");

        Ok(Box::new(LibavPacketWriter {
            output,
            file,
            mapping,
        }))
    }
}

pub struct LibavPacketWriter {
    output: ffmpeg::format::context::Output,
    file: NamedTempFile,
    /// input stream index to (output index, input timebase, output timebase)
    mapping: HashMap<usize, (usize, Rational, Rational)>,
}

#[async_trait]
impl PacketWriter for LibavPacketWriter {
    async fn write_packet(&mut self, packet: CompressedPacket) -> ClipResult<()> {
        let &(index, input_timebase, output_timebase) = self
            .mapping
            .get(&packet.stream_index)
            .ok_or_else(|| ClipError::backend(format!("unexpected stream {}", packet.stream_index)))?;

        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_pts(packet.pts);
        av_packet.set_dts(packet.dts);
        av_packet.set_duration(packet.duration);
        if packet.key {
            av_packet.set_flags(ffmpeg::packet::Flags::KEY);
        }
        av_packet.set_stream(index);
        av_packet.set_position(-1);
        av_packet.rescale_ts(input_timebase, output_timebase);
        av_packet
            .write_interleaved(&mut self.output)
            .map_err(|e| ClipError::backend(format!("failed to write packet: {}", e)))
    }

    async fn finish(mut self: Box<Self>) -> ClipResult<Vec<u8>> {
        self.output.write_trailer()?;
        let Self { output, file, .. } = *self;
        drop(output);
        read_output(file.path()).await
    }
}
