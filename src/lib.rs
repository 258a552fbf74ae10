// THEORY:
// This file is the main entry point for the `strobe_guard` library crate.
// It exposes two levels of interface:
//
// - `JobCoordinator` for callers that hand over media by handle and want a
//   moderation outcome back, with bounded concurrency, timeouts and
//   cancellation handled for them.
// - `AnalysisPipeline` for callers that already hold decoded frames and want
//   the same analysis run synchronously.
//
// The per-frame stages live in `core_modules` and stay an implementation
// detail; everything a caller needs to act on a result is re-exported here.

pub mod config;
pub mod coordinator;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod source;

pub use config::{AnalysisConfig, CoordinatorConfig};
pub use coordinator::{JobCoordinator, JobId, JobResult, JobState, MediaJob};
pub use error::{ConfigError, CoordinatorError, DecodeDefect, FailureReason, FrameError, SourceError};
pub use pipeline::{AnalysisPipeline, Completion, FrameOutcome, ReasonCode, RiskAssessment, Verdict};
pub use source::{Frame, FrameSource, FrameSourceProvider, ImageFrameSource, MediaStore, SourceHandle};
