// THEORY:
// The verdict engine is the last, purely mechanical step. It maps the
// aggregator's terminal state onto a moderation outcome the calling layer can
// act on without reinterpreting anything. The one rule it must never break:
// "could not analyze" is never reported as "safe".

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::core_modules::risk_window::{AggregateOutcome, AggregateSummary};

/// Final categorical outcome for one media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Safe,
    Flagged,
    Inconclusive,
}

/// The code driving a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    NoHazard,
    Luminance,
    RedFlash,
    #[serde(rename = "luminance+red-flash")]
    LuminanceAndRedFlash,
    InsufficientFrames,
    DecodeFailure,
    Timeout,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoHazard => "no-hazard",
            Self::Luminance => "luminance",
            Self::RedFlash => "red-flash",
            Self::LuminanceAndRedFlash => "luminance+red-flash",
            Self::InsufficientFrames => "insufficient-frames",
            Self::DecodeFailure => "decode-failure",
            Self::Timeout => "timeout",
        }
    }

    pub fn includes_red_flash(&self) -> bool {
        matches!(self, Self::RedFlash | Self::LuminanceAndRedFlash)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the frame stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The source reached end of stream.
    Finished,
    /// The frame cap stopped analysis while the source still had frames.
    Truncated,
    /// The wall-clock budget ran out.
    TimedOut,
}

/// The immutable result of analyzing one media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub verdict: Verdict,
    pub reason: ReasonCode,
    /// Highest flash density (events per second) seen in a violating window.
    pub peak_density: f64,
    pub violating_windows: u64,
    /// Timestamps of the first violating windows, capped.
    pub evidence: Vec<Duration>,
    pub frames_analyzed: u64,
    pub frames_defective: u64,
    pub flash_events: u64,
    /// Analysis covered only a prefix of the media.
    pub partial: bool,
    /// At least one frame showed a high-contrast static pattern.
    pub high_contrast_pattern: bool,
}

impl RiskAssessment {
    pub fn is_flagged(&self) -> bool {
        self.verdict == Verdict::Flagged
    }
}

/// Reduces the aggregator's terminal state to a [`RiskAssessment`].
#[derive(Debug, Clone)]
pub struct VerdictEngine {
    max_defect_ratio: f64,
    evidence_cap: usize,
}

impl VerdictEngine {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            max_defect_ratio: config.max_defect_ratio,
            evidence_cap: config.evidence_cap,
        }
    }

    pub fn assess(&self, mut summary: AggregateSummary, completion: Completion, high_contrast_pattern: bool) -> RiskAssessment {
        let (verdict, reason) = match (summary.outcome, completion) {
            // A hazard already proven stands even if the rest went unread.
            (AggregateOutcome::Flagged, _) => (Verdict::Flagged, dominant_kind(&summary)),
            (_, Completion::TimedOut) => (Verdict::Inconclusive, ReasonCode::Timeout),
            (AggregateOutcome::Inconclusive, _) if summary.frames_defective > 0 => {
                (Verdict::Inconclusive, ReasonCode::DecodeFailure)
            }
            (AggregateOutcome::Inconclusive, _) => (Verdict::Inconclusive, ReasonCode::InsufficientFrames),
            (AggregateOutcome::Safe, _) if self.defect_ratio(&summary) > self.max_defect_ratio => {
                (Verdict::Inconclusive, ReasonCode::DecodeFailure)
            }
            (AggregateOutcome::Safe, _) => (Verdict::Safe, ReasonCode::NoHazard),
        };

        summary.evidence.truncate(self.evidence_cap);

        RiskAssessment {
            verdict,
            reason,
            peak_density: summary.peak_density,
            violating_windows: summary.violating_windows,
            evidence: summary.evidence,
            frames_analyzed: summary.frames_analyzed,
            frames_defective: summary.frames_defective,
            flash_events: summary.flash_events,
            partial: completion != Completion::Finished,
            high_contrast_pattern,
        }
    }

    fn defect_ratio(&self, summary: &AggregateSummary) -> f64 {
        let total = summary.frames_analyzed + summary.frames_defective;
        if total == 0 {
            return 0.0;
        }
        summary.frames_defective as f64 / total as f64
    }
}

/// Majority vote across violating windows; a tie names both kinds.
fn dominant_kind(summary: &AggregateSummary) -> ReasonCode {
    match summary.luminance_votes.cmp(&summary.red_votes) {
        std::cmp::Ordering::Greater => ReasonCode::Luminance,
        std::cmp::Ordering::Less => ReasonCode::RedFlash,
        std::cmp::Ordering::Equal => ReasonCode::LuminanceAndRedFlash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(outcome: AggregateOutcome) -> AggregateSummary {
        AggregateSummary {
            outcome,
            frames_analyzed: 20,
            frames_defective: 0,
            flash_events: 0,
            violating_windows: 0,
            peak_density: 0.0,
            evidence: Vec::new(),
            luminance_votes: 0,
            red_votes: 0,
        }
    }

    fn engine() -> VerdictEngine {
        VerdictEngine::new(&AnalysisConfig::default())
    }

    #[test]
    fn safe_maps_to_safe() {
        let assessment = engine().assess(summary(AggregateOutcome::Safe), Completion::Finished, false);
        assert_eq!(assessment.verdict, Verdict::Safe);
        assert_eq!(assessment.reason, ReasonCode::NoHazard);
        assert!(!assessment.partial);
    }

    #[test]
    fn flagged_reason_is_majority_kind() {
        let mut flagged = summary(AggregateOutcome::Flagged);
        flagged.violating_windows = 5;
        flagged.luminance_votes = 5;
        flagged.red_votes = 2;
        let assessment = engine().assess(flagged.clone(), Completion::Finished, false);
        assert_eq!(assessment.verdict, Verdict::Flagged);
        assert_eq!(assessment.reason, ReasonCode::Luminance);

        flagged.red_votes = 7;
        assert_eq!(engine().assess(flagged.clone(), Completion::Finished, false).reason, ReasonCode::RedFlash);

        flagged.red_votes = 5;
        let tied = engine().assess(flagged, Completion::Finished, false);
        assert_eq!(tied.reason, ReasonCode::LuminanceAndRedFlash);
        assert!(tied.reason.includes_red_flash());
    }

    #[test]
    fn too_few_frames_is_never_safe() {
        let mut short = summary(AggregateOutcome::Inconclusive);
        short.frames_analyzed = 1;
        let assessment = engine().assess(short.clone(), Completion::Finished, false);
        assert_eq!(assessment.verdict, Verdict::Inconclusive);
        assert_eq!(assessment.reason, ReasonCode::InsufficientFrames);

        short.frames_defective = 3;
        assert_eq!(engine().assess(short, Completion::Finished, false).reason, ReasonCode::DecodeFailure);
    }

    #[test]
    fn excessive_defects_downgrade_safe() {
        let mut defective = summary(AggregateOutcome::Safe);
        defective.frames_analyzed = 4;
        defective.frames_defective = 6;
        let assessment = engine().assess(defective, Completion::Finished, false);
        assert_eq!(assessment.verdict, Verdict::Inconclusive);
        assert_eq!(assessment.reason, ReasonCode::DecodeFailure);
    }

    #[test]
    fn timeout_without_hazard_is_inconclusive() {
        let assessment = engine().assess(summary(AggregateOutcome::Safe), Completion::TimedOut, false);
        assert_eq!(assessment.verdict, Verdict::Inconclusive);
        assert_eq!(assessment.reason, ReasonCode::Timeout);
        assert!(assessment.partial);
    }

    #[test]
    fn timeout_after_hazard_stays_flagged() {
        let mut flagged = summary(AggregateOutcome::Flagged);
        flagged.luminance_votes = 1;
        let assessment = engine().assess(flagged, Completion::TimedOut, false);
        assert_eq!(assessment.verdict, Verdict::Flagged);
        assert!(assessment.partial);
    }

    #[test]
    fn truncation_marks_partial() {
        let assessment = engine().assess(summary(AggregateOutcome::Safe), Completion::Truncated, true);
        assert!(assessment.partial);
        assert!(assessment.high_contrast_pattern);
    }

    #[test]
    fn reason_codes_serialize_as_labels() {
        let json = serde_json::to_string(&ReasonCode::LuminanceAndRedFlash).expect("serializes");
        assert_eq!(json, "\"luminance+red-flash\"");
        assert_eq!(ReasonCode::Timeout.to_string(), "timeout");
    }
}
