//! Core clip engine: capability detection, frame sourcing, compositing,
//! encoding and bitstream copy

pub mod capability;
pub mod compositor;
pub mod frame_source;
pub mod pipeline;
pub mod progress;
pub mod remux;

pub use capability::CapabilityDetector;
pub use compositor::{compute_crop, composite, Compositor, CropRect, PixelBuffer};
pub use frame_source::FrameSource;
pub use pipeline::{
    audio_track_for, settings_for_tier, EncoderPipeline, PipelineOptions, PipelineOutput, PipelineState,
};
pub use progress::{
    progress_fn, ClipProgress, JobProgress, NullProgress, ProgressPhase, ProgressSink, ProgressUpdate,
};
pub use remux::{DirectRemux, RemuxOutput};
