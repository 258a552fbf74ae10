// THEORY:
// The risk window turns a stream of individual flash events into a judgment
// about rate. A single flash is harmless; many flashes inside one second are
// what the guidance warns about. The aggregator slides a fixed-duration window
// over the event timestamps and marks every evaluation whose event count is
// above the rate threshold as violating.
//
// Two state machines run side by side:
// - Per window: `Idle -> Accumulating -> {Safe, Violating}`, re-evaluated on
//   every new event.
// - Per job: `Safe` until the first violating window, then `Flagged` for good.
//   A later quiet stretch never clears a job that has already strobed.
//
// Memory is bounded by the rate of events inside one window, never by the
// length of the media.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::core_modules::flash_detector::{FlashEvent, FlashKind};

/// Result of the most recent window evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStatus {
    /// No events observed yet.
    Idle,
    /// An event was admitted and the window has not been scored yet.
    Accumulating,
    Safe,
    Violating,
}

/// Job-level hazard state. Never moves back from `Flagged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRisk {
    Safe,
    Flagged,
}

/// Terminal state handed to the verdict engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    Safe,
    Flagged,
    /// Fewer than two frames were extracted, so no transition could be judged.
    Inconclusive,
}

/// Rolling window of recent flash events.
#[derive(Debug, Clone)]
pub struct RiskWindowState {
    window: Duration,
    events: VecDeque<(Duration, FlashKind)>,
    density: f64,
}

impl RiskWindowState {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: VecDeque::new(),
            density: 0.0,
        }
    }

    /// Admits an event and evicts everything at or before `timestamp - window`.
    pub fn admit(&mut self, timestamp: Duration, kind: FlashKind) {
        while let Some(&(oldest, _)) = self.events.front() {
            if oldest + self.window <= timestamp {
                self.events.pop_front();
            } else {
                break;
            }
        }
        self.events.push_back((timestamp, kind));
        self.density = self.events.len() as f64 / self.window.as_secs_f64();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events per second inside the current window.
    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn oldest(&self) -> Option<Duration> {
        self.events.front().map(|&(timestamp, _)| timestamp)
    }

    pub fn latest(&self) -> Option<Duration> {
        self.events.back().map(|&(timestamp, _)| timestamp)
    }
}

/// Everything the verdict engine needs once a job stops feeding frames.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSummary {
    pub outcome: AggregateOutcome,
    pub frames_analyzed: u64,
    pub frames_defective: u64,
    pub flash_events: u64,
    pub violating_windows: u64,
    /// Highest density seen in any violating window, 0.0 when none violated.
    pub peak_density: f64,
    pub evidence: Vec<Duration>,
    /// Violating windows triggered by an event with a luminance component.
    pub luminance_votes: u64,
    /// Violating windows triggered by an event with a red component.
    pub red_votes: u64,
}

/// Scores flash density over a sliding window for one job.
#[derive(Debug, Clone)]
pub struct TemporalRiskAggregator {
    state: RiskWindowState,
    rate_threshold: usize,
    evidence_cap: usize,
    status: WindowStatus,
    risk: JobRisk,
    frames_analyzed: u64,
    frames_defective: u64,
    flash_events: u64,
    violating_windows: u64,
    peak_density: f64,
    evidence: Vec<Duration>,
    luminance_votes: u64,
    red_votes: u64,
}

impl TemporalRiskAggregator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            state: RiskWindowState::new(config.window),
            rate_threshold: config.rate_threshold,
            evidence_cap: config.evidence_cap,
            status: WindowStatus::Idle,
            risk: JobRisk::Safe,
            frames_analyzed: 0,
            frames_defective: 0,
            flash_events: 0,
            violating_windows: 0,
            peak_density: 0.0,
            evidence: Vec::new(),
            luminance_votes: 0,
            red_votes: 0,
        }
    }

    pub fn record_frame(&mut self) {
        self.frames_analyzed += 1;
    }

    pub fn record_defect(&mut self) {
        self.frames_defective += 1;
    }

    /// Admits one event and scores the window that ends at it.
    pub fn observe(&mut self, event: &FlashEvent) -> WindowStatus {
        self.flash_events += 1;
        self.status = WindowStatus::Accumulating;
        self.state.admit(event.timestamp, event.kind);

        if self.state.len() > self.rate_threshold {
            self.violating_windows += 1;
            self.peak_density = self.peak_density.max(self.state.density());
            if self.evidence.len() < self.evidence_cap {
                self.evidence.push(event.timestamp);
            }
            if event.kind.is_luminance() {
                self.luminance_votes += 1;
            }
            if event.kind.is_red() {
                self.red_votes += 1;
            }
            if self.risk == JobRisk::Safe {
                tracing::debug!(
                    timestamp_ms = event.timestamp.as_millis() as u64,
                    events_in_window = self.state.len(),
                    "First violating flash window",
                );
            }
            self.risk = JobRisk::Flagged;
            self.status = WindowStatus::Violating;
        } else {
            self.status = WindowStatus::Safe;
        }

        self.status
    }

    pub fn status(&self) -> WindowStatus {
        self.status
    }

    pub fn risk(&self) -> JobRisk {
        self.risk
    }

    pub fn window(&self) -> &RiskWindowState {
        &self.state
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    pub fn finish(self) -> AggregateSummary {
        let outcome = if self.frames_analyzed < 2 {
            AggregateOutcome::Inconclusive
        } else {
            match self.risk {
                JobRisk::Safe => AggregateOutcome::Safe,
                JobRisk::Flagged => AggregateOutcome::Flagged,
            }
        };

        AggregateSummary {
            outcome,
            frames_analyzed: self.frames_analyzed,
            frames_defective: self.frames_defective,
            flash_events: self.flash_events,
            violating_windows: self.violating_windows,
            peak_density: self.peak_density,
            evidence: self.evidence,
            luminance_votes: self.luminance_votes,
            red_votes: self.red_votes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_at(millis: u64, kind: FlashKind) -> FlashEvent {
        FlashEvent {
            timestamp: Duration::from_millis(millis),
            frame_index: millis / 100,
            magnitude: 1.0,
            flashed_area: 1.0,
            kind,
        }
    }

    fn aggregator() -> TemporalRiskAggregator {
        let mut aggregator = TemporalRiskAggregator::new(&AnalysisConfig::default());
        aggregator.record_frame();
        aggregator.record_frame();
        aggregator
    }

    #[test]
    fn starts_idle_and_safe() {
        let aggregator = aggregator();
        assert_eq!(aggregator.status(), WindowStatus::Idle);
        assert_eq!(aggregator.risk(), JobRisk::Safe);
        assert_eq!(aggregator.finish().outcome, AggregateOutcome::Safe);
    }

    #[test]
    fn three_events_per_second_is_allowed() {
        let mut aggregator = aggregator();
        for millis in [0, 300, 600, 1000, 1300, 1600] {
            assert_eq!(aggregator.observe(&event_at(millis, FlashKind::Luminance)), WindowStatus::Safe);
        }
        let summary = aggregator.finish();
        assert_eq!(summary.outcome, AggregateOutcome::Safe);
        assert_eq!(summary.flash_events, 6);
        assert_eq!(summary.violating_windows, 0);
    }

    #[test]
    fn fourth_event_inside_one_second_violates() {
        let mut aggregator = aggregator();
        for millis in [0, 200, 400] {
            aggregator.observe(&event_at(millis, FlashKind::Luminance));
        }
        assert_eq!(aggregator.observe(&event_at(600, FlashKind::Luminance)), WindowStatus::Violating);

        let summary = aggregator.finish();
        assert_eq!(summary.outcome, AggregateOutcome::Flagged);
        assert_eq!(summary.violating_windows, 1);
        assert_eq!(summary.evidence, vec![Duration::from_millis(600)]);
        assert!((summary.peak_density - 4.0).abs() < 1e-9);
    }

    #[test]
    fn flagged_job_is_never_downgraded() {
        let mut aggregator = aggregator();
        for millis in [0, 100, 200, 300] {
            aggregator.observe(&event_at(millis, FlashKind::Luminance));
        }
        assert_eq!(aggregator.risk(), JobRisk::Flagged);

        assert_eq!(aggregator.observe(&event_at(5000, FlashKind::Luminance)), WindowStatus::Safe);
        assert_eq!(aggregator.risk(), JobRisk::Flagged);
        assert_eq!(aggregator.finish().outcome, AggregateOutcome::Flagged);
    }

    #[test]
    fn window_never_holds_stale_events() {
        let mut aggregator = aggregator();
        for step in 0..50_u64 {
            let millis = step * 70;
            aggregator.observe(&event_at(millis, FlashKind::Luminance));
            let window = aggregator.window();
            let latest = window.latest().expect("just admitted");
            let oldest = window.oldest().expect("just admitted");
            assert_eq!(latest, Duration::from_millis(millis));
            assert!(oldest + Duration::from_secs(1) > latest);
        }
    }

    #[test]
    fn evidence_is_capped() {
        let mut aggregator = aggregator();
        for step in 0..100_u64 {
            aggregator.observe(&event_at(step * 50, FlashKind::Luminance));
        }
        let summary = aggregator.finish();
        assert_eq!(summary.evidence.len(), 10);
        assert!(summary.violating_windows > 10);
        assert!((summary.peak_density - 20.0).abs() < 1e-9);
    }

    #[test]
    fn votes_follow_event_kinds() {
        let mut aggregator = aggregator();
        for millis in [0, 100, 200, 300, 400] {
            aggregator.observe(&event_at(millis, FlashKind::RedFlash));
        }
        aggregator.observe(&event_at(500, FlashKind::LuminanceAndRed));

        let summary = aggregator.finish();
        assert_eq!(summary.red_votes, 3);
        assert_eq!(summary.luminance_votes, 1);
    }

    #[test]
    fn fewer_than_two_frames_is_inconclusive() {
        let mut aggregator = TemporalRiskAggregator::new(&AnalysisConfig::default());
        aggregator.record_frame();
        assert_eq!(aggregator.finish().outcome, AggregateOutcome::Inconclusive);
    }
}
