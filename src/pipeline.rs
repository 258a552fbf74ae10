// THEORY:
// The `pipeline` module is the synchronous heart of one analysis job. It
// threads a frame through every CPU-only stage in order:
//
//   Frame -> GridManager (features) -> FlashDetector (events)
//         -> TemporalRiskAggregator (windows) -> VerdictEngine (assessment)
//
// It keeps only the previous frame's features and the aggregator's window, so
// memory stays flat no matter how long the media runs. The job coordinator
// drives it one frame at a time from an async worker; tests and callers that
// already hold decoded frames use `AnalysisPipeline::analyze` directly.
//
// The pipeline is a pure function of its frames and configuration: the same
// input always produces the same `RiskAssessment`.

use crate::config::AnalysisConfig;
use crate::core_modules::flash_detector::FlashDetector;
use crate::core_modules::grid_manager::GridManager;
use crate::core_modules::risk_window::TemporalRiskAggregator;
use crate::core_modules::verdict::VerdictEngine;
use crate::error::{ConfigError, DecodeDefect};
use crate::source::Frame;

// Re-export key data structures for the public API.
pub use crate::core_modules::flash_detector::{FlashEvent, FlashKind};
pub use crate::core_modules::grid_manager::FrameFeatures;
pub use crate::core_modules::risk_window::{JobRisk, WindowStatus};
pub use crate::core_modules::verdict::{Completion, ReasonCode, RiskAssessment, Verdict};

/// What happened to one frame handed to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Dropped by the sampling stride.
    Skipped,
    /// Extracted; no flash against the previous frame.
    Steady,
    /// Extracted and compared; a flash was detected.
    Flash(FlashEvent),
}

/// Per-job analysis state.
pub struct AnalysisPipeline {
    grid_manager: GridManager,
    detector: FlashDetector,
    aggregator: TemporalRiskAggregator,
    verdict_engine: VerdictEngine,
    previous: Option<FrameFeatures>,
    frames_seen: u64,
    frame_stride: u64,
    pattern_contrast_threshold: f64,
    high_contrast_pattern: bool,
}

impl AnalysisPipeline {
    /// Builds the per-job state. `config` must already have passed
    /// [`AnalysisConfig::validate`]; an empty grid or a zero stride panics on the first frame.
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            grid_manager: GridManager::new(config),
            detector: FlashDetector::new(config),
            aggregator: TemporalRiskAggregator::new(config),
            verdict_engine: VerdictEngine::new(config),
            previous: None,
            frames_seen: 0,
            frame_stride: config.frame_stride as u64,
            pattern_contrast_threshold: config.pattern_contrast_threshold,
            high_contrast_pattern: false,
        }
    }

    /// Runs one frame through extraction, detection and aggregation.
    ///
    /// A defective frame is counted and returned as an error; the pipeline
    /// stays usable and the next frame is compared against the last good one.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutcome, DecodeDefect> {
        let position = self.frames_seen;
        self.frames_seen += 1;
        if position % self.frame_stride != 0 {
            return Ok(FrameOutcome::Skipped);
        }

        if let Some(previous) = &self.previous {
            if frame.timestamp <= previous.timestamp {
                let defect = DecodeDefect::OutOfOrder { index: frame.index };
                self.record_defect(&defect);
                return Err(defect);
            }
        }

        let features = match self.grid_manager.extract(frame) {
            Ok(features) => features,
            Err(defect) => {
                self.record_defect(&defect);
                return Err(defect);
            }
        };
        self.aggregator.record_frame();

        if features.luminance_std_dev > self.pattern_contrast_threshold {
            self.high_contrast_pattern = true;
        }

        let outcome = match self
            .previous
            .as_ref()
            .and_then(|previous| self.detector.compare(previous, &features))
        {
            Some(event) => {
                tracing::debug!(
                    frame = event.frame_index,
                    kind = ?event.kind,
                    magnitude = event.magnitude,
                    "Flash event",
                );
                self.aggregator.observe(&event);
                FrameOutcome::Flash(event)
            }
            None => FrameOutcome::Steady,
        };

        self.previous = Some(features);
        Ok(outcome)
    }

    /// Counts a frame the source could not decode at all.
    pub fn record_defect(&mut self, defect: &DecodeDefect) {
        tracing::warn!(error = %defect, "Skipping defective frame");
        self.aggregator.record_defect();
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.aggregator.frames_analyzed()
    }

    pub fn risk(&self) -> JobRisk {
        self.aggregator.risk()
    }

    pub fn window_status(&self) -> WindowStatus {
        self.aggregator.status()
    }

    pub fn finish(self, completion: Completion) -> RiskAssessment {
        let summary = self.aggregator.finish();
        self.verdict_engine.assess(summary, completion, self.high_contrast_pattern)
    }

    /// Validates `config`, then analyzes an already decoded frame sequence to completion.
    pub fn analyze<I>(config: &AnalysisConfig, frames: I) -> Result<RiskAssessment, ConfigError>
    where
        I: IntoIterator<Item = Result<Frame, DecodeDefect>>,
    {
        config.validate()?;
        let mut pipeline = Self::new(config);
        for frame in frames {
            match frame {
                Ok(frame) => {
                    let _ = pipeline.process_frame(&frame);
                }
                Err(defect) => pipeline.record_defect(&defect),
            }
        }
        Ok(pipeline.finish(Completion::Finished))
    }
}
