//! Pull-based frame sequence over a time range
//!
//! A [`FrameSource`] owns its decoder for its whole life, so no two sources can
//! share a decode cursor. Frames are produced at nominal times
//! `start + i / fps` and must come back from the decoder in strictly increasing
//! timestamp order.

use std::time::Duration;

use tracing::{debug, trace};

use crate::domain::model::TimeRange;
use crate::domain::rules::frame_count;
use crate::error::{ClipError, ClipResult};
use crate::ports::{DecodedFrame, VideoDecoder};

/// Lazy, finite, non-restartable sequence of decoded frames
pub struct FrameSource {
    decoder: Option<Box<dyn VideoDecoder>>,
    range: TimeRange,
    fps: f64,
    next_index: u64,
    total: u64,
    last_pts: Option<Duration>,
}

impl FrameSource {
    /// Attach to `decoder` for `range` sampled at `fps`
    pub fn new(decoder: Box<dyn VideoDecoder>, range: TimeRange, fps: f64) -> ClipResult<Self> {
        if !(fps > 0.0) || !fps.is_finite() {
            return Err(ClipError::decode(format!("Invalid target frame rate {}", fps)));
        }
        let total = frame_count(range.duration().as_secs_f64(), fps);
        debug!(range = %range, fps, frames = total, "Frame source attached");
        Ok(Self {
            decoder: Some(decoder),
            range,
            fps,
            next_index: 0,
            total,
            last_pts: None,
        })
    }

    /// Frames the range calls for; fewer are produced if the media ends early
    pub fn expected_frames(&self) -> u64 {
        self.total
    }

    /// Frames pulled so far
    pub fn position(&self) -> u64 {
        self.next_index
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Nominal source time of frame `index`
    pub fn nominal_time(&self, index: u64) -> Duration {
        self.range.start + Duration::from_secs_f64(index as f64 / self.fps)
    }

    /// Output time of frame `index`, relative to the start of the clip
    pub fn output_time(&self, index: u64) -> Duration {
        Duration::from_secs_f64(index as f64 / self.fps)
    }

    /// Pull the next frame, suspending until the decoder has it ready
    pub async fn next_frame(&mut self) -> ClipResult<Option<DecodedFrame>> {
        if self.next_index >= self.total {
            self.release().await;
            return Ok(None);
        }
        let at = self.nominal_time(self.next_index);
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };

        let frame = match decoder.frame_at(at).await? {
            Some(frame) => frame,
            None => {
                debug!(at = ?at, "Media ended before range end");
                self.release().await;
                return Ok(None);
            }
        };

        if let Some(last) = self.last_pts {
            if frame.pts <= last {
                return Err(ClipError::decode(format!(
                    "Frame timestamp {:?} not after previous {:?}",
                    frame.pts, last
                )));
            }
        }
        trace!(index = self.next_index, pts = ?frame.pts, "Frame ready");
        self.last_pts = Some(frame.pts);
        self.next_index += 1;
        Ok(Some(frame))
    }

    /// Release the decoder; further pulls yield `None`
    pub async fn close(mut self) {
        self.release().await;
    }

    async fn release(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            decoder.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::synthetic::{SyntheticRuntime, SyntheticSource};
    use crate::ports::MediaRuntime;

    async fn open(source_secs: u32, fps: u32) -> (SyntheticRuntime, Box<dyn VideoDecoder>) {
        let runtime = SyntheticRuntime::builder().build();
        let source = SyntheticSource::new(64, 36, fps, source_secs).into_media();
        let decoder = runtime.open_decoder(&source).await.unwrap();
        (runtime, decoder)
    }

    #[tokio::test]
    async fn test_yields_frames_at_target_rate() {
        let (_rt, decoder) = open(4, 30).await;
        let range = TimeRange::new(Duration::from_secs(1), Duration::from_secs(2));
        let mut frames = FrameSource::new(decoder, range, 10.0).unwrap();
        assert_eq!(frames.expected_frames(), 10);

        let mut pts = Vec::new();
        while let Some(frame) = frames.next_frame().await.unwrap() {
            pts.push(frame.pts);
        }
        assert_eq!(pts.len(), 10);
        assert_eq!(pts[0], Duration::from_secs(1));
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        assert!(frames.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ends_early_past_media_end() {
        let (_rt, decoder) = open(2, 10).await;
        let range = TimeRange::new(Duration::from_millis(1500), Duration::from_secs(5));
        let mut frames = FrameSource::new(decoder, range, 10.0).unwrap();

        let mut count = 0;
        while frames.next_frame().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_duplicate_timestamps_are_decode_errors() {
        let runtime = SyntheticRuntime::builder().build();
        let source = SyntheticSource::new(64, 36, 10, 2)
            .with_repeated_timestamps()
            .into_media();
        let decoder = runtime.open_decoder(&source).await.unwrap();
        let range = TimeRange::new(Duration::ZERO, Duration::from_secs(2));
        let mut frames = FrameSource::new(decoder, range, 10.0).unwrap();

        let mut result = Ok(None);
        for _ in 0..20 {
            result = frames.next_frame().await;
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(ClipError::DecodeError { .. })));
    }

    #[tokio::test]
    async fn test_rejects_zero_fps() {
        let (_rt, decoder) = open(1, 10).await;
        let range = TimeRange::new(Duration::ZERO, Duration::from_secs(1));
        assert!(FrameSource::new(decoder, range, 0.0).is_err());
    }
}
