//! Direct remux path: copy compressed packets for a range without decoding
//!
//! Output keeps the source resolution, aspect ratio and quality. The first
//! packet is the key frame at or before the range start; timestamps are
//! rebased so the output starts at zero.

use std::time::Duration;

use tracing::{debug, info};

use crate::domain::model::{ContainerFormat, SourceMedia, TimeRange};
use crate::engine::progress::{ClipProgress, ProgressPhase};
use crate::error::{ClipError, ClipResult};
use crate::planner::GopWindow;
use crate::ports::{MediaRuntime, StreamKind};

/// Packets between progress reports while copying
const PROGRESS_PACKETS: u64 = 64;

/// Copied clip
#[derive(Debug, Clone)]
pub struct RemuxOutput {
    pub bytes: Vec<u8>,
    pub container: ContainerFormat,
    pub packets: u64,
    /// Time of the anchor key frame in the source
    pub anchor: Duration,
}

/// Bitstream copy driver
pub struct DirectRemux<'a> {
    runtime: &'a dyn MediaRuntime,
}

impl<'a> DirectRemux<'a> {
    pub fn new(runtime: &'a dyn MediaRuntime) -> Self {
        Self { runtime }
    }

    /// Copy `range` of `source` into a new container
    pub async fn remux(
        &self,
        source: &SourceMedia,
        range: TimeRange,
        progress: &mut ClipProgress<'_>,
    ) -> ClipResult<RemuxOutput> {
        progress.report(ProgressPhase::Remuxing, 0.0);
        let mut reader = self.runtime.open_packet_reader(source).await?;
        let copied_streams: Vec<_> = reader
            .streams()
            .iter()
            .filter(|s| s.kind != StreamKind::Other)
            .cloned()
            .collect();
        let mut window = GopWindow::new(&copied_streams, range)?;
        let mut writer = reader.open_writer(&copied_streams)?;
        let container = reader.container();

        reader.seek(range.start).await?;

        let span = range.duration().as_secs_f64();
        let mut read = 0u64;
        while let Some(packet) = reader.read_packet().await? {
            read += 1;
            for ready in window.push(packet)?.ready {
                writer.write_packet(ready).await?;
            }
            if window.is_finished() {
                break;
            }
            if read % PROGRESS_PACKETS == 0 && span > 0.0 {
                let done = window.position().saturating_sub(range.start).as_secs_f64();
                let percent = (done / span * 100.0).min(99.0);
                progress.report(ProgressPhase::Remuxing, percent as f32);
            }
        }
        for ready in window.finish()? {
            writer.write_packet(ready).await?;
        }

        let anchor = window
            .anchor()
            .ok_or(ClipError::NoKeyframeFound { start: range.start })?;
        if window.copied() == 0 {
            return Err(ClipError::backend(format!("no packets in {}", range)));
        }

        let bytes = writer.finish().await?;
        progress.report(ProgressPhase::Remuxing, 100.0);
        debug!(read, copied = window.copied(), "Remux complete");
        info!(
            range = %range,
            anchor = ?anchor,
            bytes = bytes.len(),
            "Clip remuxed without re-encoding"
        );

        Ok(RemuxOutput {
            bytes,
            container,
            packets: window.copied(),
            anchor,
        })
    }
}
