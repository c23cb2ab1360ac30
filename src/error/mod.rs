//! Error handling module for Verticut

use std::time::Duration;

use thiserror::Error;

use crate::domain::errors::FailureReason;
use crate::domain::model::{CapabilityTier, SourceId};
use crate::utils::time::format_timecode;

/// Main error type for Verticut operations
#[derive(Error, Debug)]
pub enum ClipError {
    /// Time code text could not be parsed
    #[error("Malformed timecode '{input}': {reason}. Expected MM:SS or HH:MM:SS")]
    MalformedTimecode { input: String, reason: String },

    /// Requested range is empty, reversed or past the end of the source
    #[error("Invalid range {}-{}: {reason}", format_timecode(*start), format_timecode(*end))]
    InvalidRange {
        start: Duration,
        end: Duration,
        reason: String,
    },

    /// The tier cannot satisfy the requested resolution/bitrate/frame rate
    #[error("Unsupported configuration for {tier}: {reason}")]
    UnsupportedConfiguration { tier: CapabilityTier, reason: String },

    /// Decoder failed or produced frames out of order
    #[error("Decode error: {message}")]
    DecodeError { message: String },

    /// Encoder backend failed while encoding or flushing
    #[error("Encoding failed: {cause}")]
    EncodingFailed { cause: String },

    /// Remux range starts before the first key frame of the stream
    #[error("No key frame found at or before {}", format_timecode(*start))]
    NoKeyframeFound { start: Duration },

    /// Another job is already running against the same source
    #[error("A clip job is already running for source {source_id}")]
    JobAlreadyRunning { source_id: SourceId },

    /// Job was cancelled or its deadline passed
    #[error("Job cancelled")]
    Cancelled,

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Media runtime failure outside of encode/decode (open, probe, mux)
    #[error("Media backend error: {message}")]
    Backend { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// FFmpeg error
    #[cfg(feature = "libav")]
    #[error("FFmpeg error: {0}")]
    FFmpeg(#[from] ffmpeg_next::Error),
}

impl ClipError {
    pub fn invalid_range(start: Duration, end: Duration, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            start,
            end,
            reason: reason.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::DecodeError {
            message: message.into(),
        }
    }

    pub fn encoding(cause: impl Into<String>) -> Self {
        Self::EncodingFailed {
            cause: cause.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Typed, serializable reason recorded against a failed request
    pub fn reason(&self) -> FailureReason {
        match self {
            ClipError::MalformedTimecode { .. } => FailureReason::MalformedTimecode,
            ClipError::InvalidRange { .. } => FailureReason::InvalidRange,
            ClipError::UnsupportedConfiguration { .. } => FailureReason::UnsupportedConfiguration,
            ClipError::DecodeError { .. } => FailureReason::DecodeError,
            ClipError::EncodingFailed { .. } => FailureReason::EncodingFailed,
            ClipError::NoKeyframeFound { .. } => FailureReason::NoKeyframeFound,
            ClipError::JobAlreadyRunning { .. } => FailureReason::JobAlreadyRunning,
            ClipError::Cancelled => FailureReason::Cancelled,
            _ => FailureReason::Backend,
        }
    }

    /// Whether the orchestrator may step down one tier after this error
    pub fn permits_downgrade(&self) -> bool {
        matches!(
            self,
            ClipError::UnsupportedConfiguration { .. } | ClipError::EncodingFailed { .. }
        )
    }
}

/// Result type alias for Verticut operations
pub type ClipResult<T> = std::result::Result<T, ClipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_mapping() {
        let err = ClipError::invalid_range(Duration::from_secs(10), Duration::from_secs(5), "reversed");
        assert_eq!(err.reason(), FailureReason::InvalidRange);
        assert_eq!(ClipError::encoding("boom").reason(), FailureReason::EncodingFailed);
        assert_eq!(
            ClipError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")).reason(),
            FailureReason::Backend
        );
    }

    #[test]
    fn test_invalid_range_display_uses_timecodes() {
        let err = ClipError::invalid_range(Duration::from_secs(180), Duration::from_secs(190), "past end");
        assert_eq!(err.to_string(), "Invalid range 03:00-03:10: past end");
    }

    #[test]
    fn test_downgrade_only_for_encoder_failures() {
        assert!(ClipError::encoding("x").permits_downgrade());
        assert!(ClipError::UnsupportedConfiguration {
            tier: CapabilityTier::HardwareFrameEncoder,
            reason: "too wide".into()
        }
        .permits_downgrade());
        assert!(!ClipError::decode("x").permits_downgrade());
        assert!(!ClipError::NoKeyframeFound { start: Duration::ZERO }.permits_downgrade());
    }
}
