// THEORY:
// The `FlashDetector` is the temporal comparator. It looks at two adjacent
// `FrameFeatures` and answers one question: did a flash happen between them?
//
// Key architectural principles:
// 1.  **Cell-Level Contrast**: A cell has flashed when its luminance moves by
//     enough in absolute terms, by enough relative to the darker of the two
//     states, and the darker state is not itself near full brightness.
//     Relative contrast is what the eye responds to; the absolute floor stops
//     noise in near-black scenes from producing huge ratios.
// 2.  **Area Gate**: A luminance flash needs enough flashed cells to cover a
//     meaningful share of the screen. A blinking cursor or a small sprite
//     never reaches the gate.
// 3.  **Red Channel**: Saturated red transitions are judged separately on the
//     red-area fraction. A transition that fires both tests is one event with
//     both kinds attached.
// 4.  **Stateless**: The detector keeps no history. The pipeline owns the
//     previous record and hands both sides in.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::core_modules::grid_manager::FrameFeatures;

/// Which hazard tests a transition tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashKind {
    Luminance,
    RedFlash,
    LuminanceAndRed,
}

impl FlashKind {
    fn from_flags(luminance: bool, red: bool) -> Option<Self> {
        match (luminance, red) {
            (true, true) => Some(Self::LuminanceAndRed),
            (true, false) => Some(Self::Luminance),
            (false, true) => Some(Self::RedFlash),
            (false, false) => None,
        }
    }

    pub fn is_luminance(&self) -> bool {
        matches!(self, Self::Luminance | Self::LuminanceAndRed)
    }

    pub fn is_red(&self) -> bool {
        matches!(self, Self::RedFlash | Self::LuminanceAndRed)
    }
}

/// A transition between two adjacent frames that crossed the flash thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlashEvent {
    /// Timestamp of the later frame.
    pub timestamp: Duration,
    /// Index of the later frame.
    pub frame_index: u64,
    /// Largest per-cell relative contrast, or the red-fraction change when only red fired.
    pub magnitude: f64,
    /// Share of grid cells that flashed.
    pub flashed_area: f64,
    pub kind: FlashKind,
}

/// Compares adjacent feature records against the flash thresholds.
#[derive(Debug, Clone)]
pub struct FlashDetector {
    relative_contrast_threshold: f64,
    min_luminance_delta: f64,
    max_darker_luminance: f64,
    min_flash_area: f64,
    red_area_threshold: f64,
    red_fraction_delta: f64,
}

impl FlashDetector {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            relative_contrast_threshold: config.relative_contrast_threshold,
            min_luminance_delta: config.min_luminance_delta,
            max_darker_luminance: config.max_darker_luminance,
            min_flash_area: config.min_flash_area,
            red_area_threshold: config.red_area_threshold,
            red_fraction_delta: config.red_fraction_delta,
        }
    }

    pub fn compare(&self, previous: &FrameFeatures, current: &FrameFeatures) -> Option<FlashEvent> {
        let (flashed_area, peak_contrast) = self.flashed_area(previous, current);
        let luminance_flash = flashed_area > 0.0 && flashed_area >= self.min_flash_area;

        let red_delta = (current.red_fraction - previous.red_fraction).abs();
        let crossed = (previous.red_fraction >= self.red_area_threshold)
            != (current.red_fraction >= self.red_area_threshold);
        let red_flash = crossed && red_delta > self.red_fraction_delta;

        let kind = FlashKind::from_flags(luminance_flash, red_flash)?;
        Some(FlashEvent {
            timestamp: current.timestamp,
            frame_index: current.index,
            magnitude: if luminance_flash { peak_contrast } else { red_delta },
            flashed_area,
            kind,
        })
    }

    /// Share of cells whose transition is a flash, and the strongest relative contrast among them.
    fn flashed_area(&self, previous: &FrameFeatures, current: &FrameFeatures) -> (f64, f64) {
        let cells = previous.cells.len().min(current.cells.len());
        if cells == 0 {
            return (0.0, 0.0);
        }

        let mut flashed = 0_usize;
        let mut peak_contrast = 0.0_f64;
        for (before, after) in previous.cells.iter().zip(&current.cells) {
            let delta = (after - before).abs();
            let darker = before.min(*after);
            let contrast = delta / darker.max(1.0);

            if delta >= self.min_luminance_delta
                && contrast >= self.relative_contrast_threshold
                && darker <= self.max_darker_luminance
            {
                flashed += 1;
                peak_contrast = peak_contrast.max(contrast);
            }
        }

        (flashed as f64 / cells as f64, peak_contrast)
    }
}
