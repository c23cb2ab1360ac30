//! GOP (Group of Pictures) anchoring for bitstream copy
//!
//! Packets arrive in decode order. [`GopWindow`] keeps the packets of the GOP
//! that contains the range start, picks the key frame at or before the start
//! as the anchor, and then passes through everything up to the range end with
//! timestamps rebased so the anchor lands at zero.
//!
//! Sources with B-frames decode reference frames before the frames that
//! display ahead of them, so a video packet displayed at or past the end is
//! held back and only written if a later packet still displays before the end.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace};

use crate::domain::model::{TimeRange, Timebase};
use crate::error::{ClipError, ClipResult};
use crate::ports::{CompressedPacket, StreamDescriptor, StreamKind};

/// Where the window is in the packet stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GopPhase {
    /// Looking for the last key frame at or before the start
    Seeking,
    /// Anchor fixed, copying packets until the end
    Copying,
    /// No later packet can display before the end
    Finished,
}

/// Result of feeding one packet
#[derive(Debug, Default)]
pub struct GopOutput {
    /// Packets ready for the muxer, already rebased
    pub ready: Vec<CompressedPacket>,
}

/// Timebase and start offset of a copied stream
#[derive(Debug, Clone, Copy)]
struct StreamClock {
    timebase: Timebase,
    start_ticks: i64,
}

impl StreamClock {
    fn time_of(&self, ticks: i64) -> Duration {
        self.timebase.ticks_to_duration(ticks.saturating_sub(self.start_ticks))
    }
}

/// Keyframe anchored copy window over one time range
pub struct GopWindow {
    video_index: usize,
    clocks: HashMap<usize, StreamClock>,
    start: Duration,
    end: Duration,
    phase: GopPhase,
    /// Packets from the current candidate key frame onwards
    pending: Vec<CompressedPacket>,
    /// Video packets displayed at or past the end, kept in case a later
    /// packet references them
    held: Vec<CompressedPacket>,
    anchor: Option<Duration>,
    /// Time of the last video packet seen
    position: Duration,
    max_pts: Option<i64>,
    /// Display order differs from decode order
    reordered: bool,
    /// The stream carries decode timestamps distinct from presentation
    decode_timestamps: bool,
    copied: u64,
}

impl GopWindow {
    /// Window over `range`, anchored on the first video stream in `streams`
    pub fn new(streams: &[StreamDescriptor], range: TimeRange) -> ClipResult<Self> {
        let video = streams
            .iter()
            .find(|s| s.kind == StreamKind::Video)
            .ok_or_else(|| ClipError::backend("Source has no video stream to copy"))?;
        let clocks = streams
            .iter()
            .filter(|s| s.kind != StreamKind::Other)
            .map(|s| {
                let clock = StreamClock {
                    timebase: s.timebase,
                    start_ticks: s.start_ticks,
                };
                (s.index, clock)
            })
            .collect();

        Ok(Self {
            video_index: video.index,
            clocks,
            start: range.start,
            end: range.end,
            phase: GopPhase::Seeking,
            pending: Vec::new(),
            held: Vec::new(),
            anchor: None,
            position: Duration::ZERO,
            max_pts: None,
            reordered: false,
            decode_timestamps: false,
            copied: 0,
        })
    }

    pub fn phase(&self) -> GopPhase {
        self.phase
    }

    /// Anchor key frame time, once fixed
    pub fn anchor(&self) -> Option<Duration> {
        self.anchor
    }

    /// Time of the last video packet fed in
    pub fn position(&self) -> Duration {
        self.position
    }

    /// Packets emitted so far
    pub fn copied(&self) -> u64 {
        self.copied
    }

    pub fn is_finished(&self) -> bool {
        self.phase == GopPhase::Finished
    }

    /// Whether a packet of `stream_index` belongs in the output
    pub fn carries(&self, stream_index: usize) -> bool {
        self.clocks.contains_key(&stream_index)
    }

    /// Feed the next packet in decode order
    pub fn push(&mut self, packet: CompressedPacket) -> ClipResult<GopOutput> {
        let mut output = GopOutput::default();
        if self.phase == GopPhase::Finished || !self.carries(packet.stream_index) {
            return Ok(output);
        }
        let Some(time) = self.packet_time(&packet) else {
            trace!(stream = packet.stream_index, "Skipping packet without timestamp");
            return Ok(output);
        };
        let is_video = packet.stream_index == self.video_index;
        if is_video {
            self.position = self.position.max(time);
            self.observe_order(&packet);
        }

        if self.phase == GopPhase::Seeking {
            if is_video && time > self.start {
                // first video packet past the start fixes the anchor
                self.fix_anchor()?;
                output.ready.append(&mut self.drain_pending());
            } else {
                if is_video && packet.key {
                    debug!(at = ?time, "Candidate key frame");
                    self.pending.clear();
                    self.anchor = Some(time);
                }
                if self.anchor.is_some() {
                    self.pending.push(packet);
                }
                return Ok(output);
            }
        }

        if !is_video {
            if time < self.end {
                output.ready.extend(self.rebase(packet, time));
            }
        } else if time < self.end {
            output.ready.append(&mut self.release_held());
            output.ready.extend(self.rebase(packet, time));
        } else if self.closes_window(&packet) {
            debug!(
                copied = self.copied + output.ready.len() as u64,
                dropped = self.held.len(),
                "Reached range end"
            );
            self.held.clear();
            self.phase = GopPhase::Finished;
        } else {
            self.held.push(packet);
        }
        self.copied += output.ready.len() as u64;
        Ok(output)
    }

    /// End of input. Returns whatever is still buffered.
    pub fn finish(&mut self) -> ClipResult<Vec<CompressedPacket>> {
        self.held.clear();
        if self.phase == GopPhase::Seeking {
            self.fix_anchor()?;
            let ready = self.drain_pending();
            self.copied += ready.len() as u64;
            self.phase = GopPhase::Finished;
            return Ok(ready);
        }
        self.phase = GopPhase::Finished;
        Ok(Vec::new())
    }

    fn observe_order(&mut self, packet: &CompressedPacket) {
        if let (Some(pts), Some(dts)) = (packet.pts, packet.dts) {
            if dts < pts {
                self.decode_timestamps = true;
                self.reordered = true;
            }
        }
        if let Some(pts) = packet.pts {
            if self.max_pts.is_some_and(|max| pts < max) {
                self.reordered = true;
            }
            self.max_pts = Some(self.max_pts.map_or(pts, |max| max.max(pts)));
        }
    }

    /// Whether no packet after this video packet, which displays at or past
    /// the end, can display before the end
    fn closes_window(&self, packet: &CompressedPacket) -> bool {
        if self.decode_timestamps {
            if let (Some(dts), Some(clock)) = (packet.dts, self.clocks.get(&packet.stream_index)) {
                // dts <= pts, so every frame shown before the end decodes before it
                return clock.time_of(dts) >= self.end;
            }
        }
        packet.key || (!self.reordered && !self.held.is_empty())
    }

    fn fix_anchor(&mut self) -> ClipResult<()> {
        match self.anchor {
            Some(anchor) => {
                debug!(anchor = ?anchor, start = ?self.start, "Anchored on key frame");
                self.phase = GopPhase::Copying;
                Ok(())
            }
            None => Err(ClipError::NoKeyframeFound { start: self.start }),
        }
    }

    fn drain_pending(&mut self) -> Vec<CompressedPacket> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .filter_map(|packet| {
                let time = self.packet_time(&packet)?;
                if time >= self.end {
                    return None;
                }
                self.rebase(packet, time)
            })
            .collect()
    }

    fn release_held(&mut self) -> Vec<CompressedPacket> {
        let held = std::mem::take(&mut self.held);
        held.into_iter()
            .filter_map(|packet| {
                let time = self.packet_time(&packet)?;
                self.rebase(packet, time)
            })
            .collect()
    }

    /// Shift a packet so the anchor is at zero; drops packets that would land
    /// before zero
    fn rebase(&self, mut packet: CompressedPacket, time: Duration) -> Option<CompressedPacket> {
        let anchor = self.anchor?;
        if time < anchor {
            return None;
        }
        let clock = self.clocks.get(&packet.stream_index)?;
        let offset = clock.start_ticks + clock.timebase.duration_to_ticks(anchor);
        packet.rebase(offset);
        Some(packet)
    }

    fn packet_time(&self, packet: &CompressedPacket) -> Option<Duration> {
        let clock = self.clocks.get(&packet.stream_index)?;
        let ts = packet.timestamp()?;
        Some(clock.time_of(ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streams() -> Vec<StreamDescriptor> {
        vec![
            StreamDescriptor {
                index: 0,
                kind: StreamKind::Video,
                codec: "synt".into(),
                timebase: Timebase::new(1, 10).unwrap(),
                start_ticks: 0,
            },
            StreamDescriptor {
                index: 1,
                kind: StreamKind::Audio,
                codec: "pcm".into(),
                timebase: Timebase::new(1, 1000).unwrap(),
                start_ticks: 0,
            },
        ]
    }

    fn video(pts: i64, key: bool) -> CompressedPacket {
        CompressedPacket {
            stream_index: 0,
            pts: Some(pts),
            dts: Some(pts),
            duration: 1,
            key,
            data: vec![pts as u8],
        }
    }

    /// Packet in decode order with distinct presentation and decode times
    fn reordered(pts: i64, dts: Option<i64>, key: bool) -> CompressedPacket {
        CompressedPacket {
            stream_index: 0,
            pts: Some(pts),
            dts,
            duration: 1,
            key,
            data: vec![pts as u8],
        }
    }

    /// I0 P3 B1 B2 P6 B4 B5 P9 B7 B8 I10 P13 B11 B12 ... in decode order, with
    /// decode timestamps shifted one tick back as muxers write them
    fn b_frame_stream(with_dts: bool) -> Vec<CompressedPacket> {
        let mut display = Vec::new();
        for gop in 0..3 {
            let base = gop * 10;
            display.push(base);
            for step in 0..3 {
                let reference = base + 3 * step + 3;
                display.extend([reference, reference - 2, reference - 1]);
            }
        }
        display
            .into_iter()
            .enumerate()
            .map(|(decode, pts)| {
                let dts = with_dts.then_some(decode as i64 - 1);
                reordered(pts, dts, pts % 10 == 0)
            })
            .collect()
    }

    fn displayed_before(out: &[CompressedPacket], end: i64) -> Vec<i64> {
        let mut shown: Vec<i64> = out
            .iter()
            .filter_map(|p| p.pts)
            .filter(|&pts| pts < end)
            .collect();
        shown.sort_unstable();
        shown
    }

    fn audio(ms: i64) -> CompressedPacket {
        CompressedPacket {
            stream_index: 1,
            pts: Some(ms),
            dts: Some(ms),
            duration: 100,
            key: true,
            data: vec![0xA0],
        }
    }

    fn range(start_ms: u64, end_ms: u64) -> TimeRange {
        TimeRange::new(Duration::from_millis(start_ms), Duration::from_millis(end_ms))
    }

    fn run(window: &mut GopWindow, packets: Vec<CompressedPacket>) -> ClipResult<Vec<CompressedPacket>> {
        let mut out = Vec::new();
        for packet in packets {
            out.extend(window.push(packet)?.ready);
            if window.is_finished() {
                break;
            }
        }
        out.extend(window.finish()?);
        Ok(out)
    }

    #[test]
    fn test_anchors_on_preceding_keyframe() {
        // key frames every 5 frames at 10 fps
        let packets = (0..30).map(|i| video(i, i % 5 == 0)).collect();
        let mut window = GopWindow::new(&streams(), range(1200, 2000)).unwrap();
        let out = run(&mut window, packets).unwrap();

        assert_eq!(window.anchor(), Some(Duration::from_secs(1)));
        // frames 10..20 copied, rebased to 0..10
        assert_eq!(out.len(), 10);
        assert_eq!(out[0].data, vec![10]);
        assert_eq!(out[0].pts, Some(0));
        assert!(out[0].key);
        assert_eq!(out.last().unwrap().pts, Some(9));
    }

    #[test]
    fn test_keyframe_exactly_at_start() {
        let packets = (0..30).map(|i| video(i, i % 5 == 0)).collect();
        let mut window = GopWindow::new(&streams(), range(1000, 1500)).unwrap();
        let out = run(&mut window, packets).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].data, vec![10]);
    }

    #[test]
    fn test_no_keyframe_before_start() {
        // stream starts with delta frames, first key at frame 5
        let packets = (0..30).map(|i| video(i, i == 5)).collect();
        let mut window = GopWindow::new(&streams(), range(200, 1000)).unwrap();
        let result = run(&mut window, packets);
        assert!(matches!(result, Err(ClipError::NoKeyframeFound { .. })));
    }

    #[test]
    fn test_audio_before_anchor_is_dropped_and_rebased() {
        let packets = vec![
            video(0, true),
            audio(0),
            video(5, true),
            audio(450),
            audio(500),
            video(6, false),
            audio(600),
            video(8, false),
            video(10, true),
            audio(1000),
        ];
        let mut window = GopWindow::new(&streams(), range(550, 1000)).unwrap();
        let out = run(&mut window, packets).unwrap();

        let audio_pts: Vec<i64> = out
            .iter()
            .filter(|p| p.stream_index == 1)
            .map(|p| p.pts.unwrap())
            .collect();
        assert_eq!(audio_pts, vec![0, 100]);
        let video_pts: Vec<i64> = out
            .iter()
            .filter(|p| p.stream_index == 0)
            .map(|p| p.pts.unwrap())
            .collect();
        assert_eq!(video_pts, vec![0, 1, 3]);
    }

    #[test]
    fn test_range_inside_final_gop_flushes_on_finish() {
        let packets = (0..10).map(|i| video(i, i == 0)).collect();
        let mut window = GopWindow::new(&streams(), range(900, 1000)).unwrap();
        let out = run(&mut window, packets).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(out.last().unwrap().pts, Some(9));
    }

    #[test]
    fn test_requires_video_stream() {
        let audio_only = vec![streams().remove(1)];
        assert!(GopWindow::new(&audio_only, range(0, 1000)).is_err());
    }

    #[test]
    fn test_decode_order_keeps_frames_shown_before_end() {
        let mut window = GopWindow::new(&streams(), range(0, 500)).unwrap();
        let out = run(&mut window, b_frame_stream(true)).unwrap();

        assert_eq!(displayed_before(&out, 5), vec![0, 1, 2, 3, 4]);
        // P6 is the reference B4 decodes against
        let order: Vec<i64> = out.iter().map(|p| p.pts.unwrap()).collect();
        assert_eq!(order, vec![0, 3, 1, 2, 6, 4]);
        assert!(window.is_finished());
    }

    #[test]
    fn test_decode_order_without_decode_timestamps() {
        let mut window = GopWindow::new(&streams(), range(0, 500)).unwrap();
        let out = run(&mut window, b_frame_stream(false)).unwrap();

        assert_eq!(displayed_before(&out, 5), vec![0, 1, 2, 3, 4]);
        assert!(out.iter().any(|p| p.pts == Some(6)));
        // P9 and its B-frames all display after the end
        assert!(out.iter().all(|p| p.pts.unwrap() < 7));
    }

    #[test]
    fn test_decode_order_mid_stream_range() {
        let mut window = GopWindow::new(&streams(), range(1200, 1800)).unwrap();
        let out = run(&mut window, b_frame_stream(true)).unwrap();

        assert_eq!(window.anchor(), Some(Duration::from_secs(1)));
        // rebased to the I10 anchor, frames 10..18 shown
        assert_eq!(displayed_before(&out, 8), (0..8).collect::<Vec<_>>());
        assert_eq!(out[0].pts, Some(0));
        assert_eq!(out[0].dts, Some(-1));
    }

    #[test]
    fn test_start_offset_is_subtracted() {
        // stream starts at 2 s; its first packet carries pts 20
        let mut offset = streams();
        offset[0].start_ticks = 20;
        offset[1].start_ticks = 2000;
        let mut packets: Vec<CompressedPacket> = (20..50).map(|i| video(i, i % 5 == 0)).collect();
        packets.insert(11, audio(3050));
        let mut window = GopWindow::new(&offset, range(1000, 1500)).unwrap();
        let out = run(&mut window, packets).unwrap();

        assert_eq!(window.anchor(), Some(Duration::from_secs(1)));
        let video_pts: Vec<i64> = out
            .iter()
            .filter(|p| p.stream_index == 0)
            .map(|p| p.pts.unwrap())
            .collect();
        assert_eq!(video_pts, vec![0, 1, 2, 3, 4]);
        assert_eq!(out[0].data, vec![30]);
        let audio_pts: Vec<i64> = out
            .iter()
            .filter(|p| p.stream_index == 1)
            .map(|p| p.pts.unwrap())
            .collect();
        assert_eq!(audio_pts, vec![50]);
    }
}
