//! Error taxonomy for the analysis core.
//!
//! Frame-level problems ([`DecodeDefect`]) are absorbed by the pipeline and
//! counted. Source-level problems ([`SourceError`]) are fatal to a job and
//! surface to the caller as a [`FailureReason`].

use serde::{Deserialize, Serialize};

use crate::coordinator::JobId;

/// The frame source could not be opened or could not decode the media at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// A single frame could not be used. The frame is skipped, the job continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeDefect {
    #[error("Frame {index} has zero dimensions ({width}x{height})")]
    ZeroDimensions { index: u64, width: u32, height: u32 },

    #[error("Frame {index} stride {stride} is shorter than a row of {width} pixels")]
    StrideTooShort { index: u64, width: u32, stride: usize },

    #[error("Frame {index} buffer holds {actual} bytes, expected at least {expected}")]
    BufferTooShort { index: u64, expected: usize, actual: usize },

    #[error("Frame {index} stride {stride} over {height} rows overflows the address space")]
    LayoutOverflow { index: u64, stride: usize, height: u32 },

    #[error("Frame {index} timestamp does not advance past the previous frame")]
    OutOfOrder { index: u64 },

    #[error("Frame {index} could not be decoded: {reason}")]
    Corrupt { index: u64, reason: String },
}

/// Everything a [`crate::source::FrameSource`] can report instead of a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Defect(#[from] DecodeDefect),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Why a job ended without a [`crate::RiskAssessment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Cancelled")]
    Cancelled,

    /// The analysis task crashed. The worker that ran it keeps serving.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SourceError> for FailureReason {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(detail) => Self::SourceUnavailable(detail),
            SourceError::UnsupportedFormat(detail) => Self::UnsupportedFormat(detail),
        }
    }
}

/// A configuration value is out of range.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Environment variable {var} could not be parsed: {value:?}")]
    Env { var: &'static str, value: String },
}

/// Errors returned by the submission API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Job already submitted: {0}")]
    DuplicateJob(JobId),

    #[error("Job queue is full ({capacity} waiting)")]
    QueueFull { capacity: usize },

    #[error("Coordinator is shut down")]
    ShutDown,

    #[error("Job {0} has not finished")]
    StillRunning(JobId),
}
