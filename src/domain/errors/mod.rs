// Domain errors - Typed failure reasons recorded per clip request

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reason a single clip request failed, as reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Time code text could not be parsed
    MalformedTimecode,
    /// Range empty, reversed or past the source duration
    InvalidRange,
    /// No tier could satisfy the output configuration
    UnsupportedConfiguration,
    /// Source frames could not be decoded in order
    DecodeError,
    /// Every encode path failed
    EncodingFailed,
    /// Remux could not find a key frame to start from
    NoKeyframeFound,
    /// Source already busy with another job
    JobAlreadyRunning,
    /// Job cancelled before this request ran
    Cancelled,
    /// Runtime failure outside the taxonomy
    Backend,
}

impl FailureReason {
    /// Stable identifier, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::MalformedTimecode => "malformed_timecode",
            FailureReason::InvalidRange => "invalid_range",
            FailureReason::UnsupportedConfiguration => "unsupported_configuration",
            FailureReason::DecodeError => "decode_error",
            FailureReason::EncodingFailed => "encoding_failed",
            FailureReason::NoKeyframeFound => "no_keyframe_found",
            FailureReason::JobAlreadyRunning => "job_already_running",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Backend => "backend",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MalformedTimecode => write!(f, "Malformed timecode"),
            FailureReason::InvalidRange => write!(f, "Invalid range"),
            FailureReason::UnsupportedConfiguration => write!(f, "Unsupported configuration"),
            FailureReason::DecodeError => write!(f, "Decode error"),
            FailureReason::EncodingFailed => write!(f, "Encoding failed"),
            FailureReason::NoKeyframeFound => write!(f, "No key frame found"),
            FailureReason::JobAlreadyRunning => write!(f, "Job already running"),
            FailureReason::Cancelled => write!(f, "Cancelled"),
            FailureReason::Backend => write!(f, "Backend error"),
        }
    }
}
