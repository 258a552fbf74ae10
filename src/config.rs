//! Tunable thresholds and resource bounds.
//!
//! Every value has a default modeled on published flash-threshold guidance.
//! Callers may deserialize a config with serde or override individual fields
//! from `STROBE_*` environment variables via [`CoordinatorConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound for the default worker pool, regardless of core count.
const MAX_DEFAULT_POOL_SIZE: usize = 3;

/// Thresholds for the per-job analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Number of grid columns each frame is split into.
    pub grid_columns: u32,
    /// Number of grid rows each frame is split into.
    pub grid_rows: u32,
    /// Minimum per-cell luminance change, relative to the darker state.
    pub relative_contrast_threshold: f64,
    /// Minimum absolute per-cell luminance change on the 0-255 scale.
    pub min_luminance_delta: f64,
    /// A transition whose darker state is brighter than this is not a flash.
    pub max_darker_luminance: f64,
    /// Fraction of grid cells that must flash together for a luminance flash.
    pub min_flash_area: f64,
    /// Minimum red channel for a pixel to count as saturated red.
    pub red_min_channel: u8,
    /// Minimum `R / (R + G + B)` for a pixel to count as saturated red.
    pub red_min_ratio: f64,
    /// Red area fraction whose crossing (up or down) can fire a red flash.
    pub red_area_threshold: f64,
    /// Minimum change in red area fraction for a crossing to count.
    pub red_fraction_delta: f64,
    /// Duration of the trailing flash window.
    pub window: Duration,
    /// A window holding more events than this is violating.
    pub rate_threshold: usize,
    /// Maximum number of evidence timestamps kept in an assessment.
    pub evidence_cap: usize,
    /// A would-be safe job with more defective frames than this ratio is inconclusive.
    pub max_defect_ratio: f64,
    /// Analyze every Nth decoded frame.
    pub frame_stride: u32,
    /// Luminance standard deviation above which a frame is a high-contrast pattern.
    pub pattern_contrast_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            grid_columns: 4,
            grid_rows: 4,
            relative_contrast_threshold: 0.10,
            min_luminance_delta: 20.0,
            max_darker_luminance: 204.0,
            min_flash_area: 0.25,
            red_min_channel: 160,
            red_min_ratio: 0.8,
            red_area_threshold: 0.25,
            red_fraction_delta: 0.20,
            window: Duration::from_secs(1),
            rate_threshold: 3,
            evidence_cap: 10,
            max_defect_ratio: 0.5,
            frame_stride: 1,
            pattern_contrast_threshold: 80.0,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_columns == 0 || self.grid_rows == 0 {
            return Err(invalid("grid", "grid must have at least one cell"));
        }
        check_fraction("min_flash_area", self.min_flash_area)?;
        check_fraction("red_min_ratio", self.red_min_ratio)?;
        check_fraction("red_area_threshold", self.red_area_threshold)?;
        check_fraction("red_fraction_delta", self.red_fraction_delta)?;
        check_fraction("max_defect_ratio", self.max_defect_ratio)?;
        if self.relative_contrast_threshold.is_nan() || self.relative_contrast_threshold < 0.0 {
            return Err(invalid("relative_contrast_threshold", "must be non-negative"));
        }
        if self.min_luminance_delta.is_nan() || self.min_luminance_delta < 0.0 {
            return Err(invalid("min_luminance_delta", "must be non-negative"));
        }
        if !(0.0..=255.0).contains(&self.max_darker_luminance) {
            return Err(invalid("max_darker_luminance", "must lie within 0.0..=255.0"));
        }
        if self.pattern_contrast_threshold.is_nan() || self.pattern_contrast_threshold < 0.0 {
            return Err(invalid("pattern_contrast_threshold", "must be non-negative"));
        }
        if self.window.is_zero() {
            return Err(invalid("window", "must be longer than zero"));
        }
        if self.frame_stride == 0 {
            return Err(invalid("frame_stride", "must be at least 1"));
        }
        Ok(())
    }
}

/// Resource bounds for the job coordinator, plus the analysis thresholds it hands to each job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Number of jobs analyzed concurrently.
    pub pool_size: usize,
    /// Number of jobs allowed to wait for a worker before submission is rejected.
    pub queue_capacity: usize,
    /// Wall-clock budget for one job, measured from when a worker picks it up.
    pub job_timeout: Duration,
    /// Maximum number of frames pulled from one source.
    pub frame_cap: u64,
    /// Number of finished jobs kept for `result` and `wait`. Beyond that the oldest is dropped.
    pub terminal_retention: usize,
    pub analysis: AnalysisConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get().clamp(1, MAX_DEFAULT_POOL_SIZE),
            queue_capacity: 64,
            job_timeout: Duration::from_secs(30),
            frame_cap: 3000,
            terminal_retention: 1024,
            analysis: AnalysisConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `STROBE_POOL_SIZE`               | `min(num_cpus, 3)`      |
    /// | `STROBE_QUEUE_CAPACITY`          | `64`                    |
    /// | `STROBE_JOB_TIMEOUT_MS`          | `30000`                 |
    /// | `STROBE_FRAME_CAP`               | `3000`                  |
    /// | `STROBE_TERMINAL_RETENTION`      | `1024`                  |
    /// | `STROBE_GRID_COLUMNS`            | `4`                     |
    /// | `STROBE_GRID_ROWS`               | `4`                     |
    /// | `STROBE_CONTRAST_THRESHOLD`      | `0.10`                  |
    /// | `STROBE_MIN_LUMINANCE_DELTA`     | `20.0`                  |
    /// | `STROBE_MAX_DARKER_LUMINANCE`    | `204.0`                 |
    /// | `STROBE_MIN_FLASH_AREA`          | `0.25`                  |
    /// | `STROBE_RED_MIN_CHANNEL`         | `160`                   |
    /// | `STROBE_RED_MIN_RATIO`           | `0.8`                   |
    /// | `STROBE_RED_AREA_THRESHOLD`      | `0.25`                  |
    /// | `STROBE_RED_FRACTION_DELTA`      | `0.20`                  |
    /// | `STROBE_WINDOW_MS`               | `1000`                  |
    /// | `STROBE_RATE_THRESHOLD`          | `3`                     |
    /// | `STROBE_EVIDENCE_CAP`            | `10`                    |
    /// | `STROBE_MAX_DEFECT_RATIO`        | `0.5`                   |
    /// | `STROBE_FRAME_STRIDE`            | `1`                     |
    /// | `STROBE_PATTERN_CONTRAST`        | `80.0`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvOverrides { lookup };
        let mut config = Self::default();
        let analysis = &mut config.analysis;

        env.apply("STROBE_POOL_SIZE", &mut config.pool_size)?;
        env.apply("STROBE_QUEUE_CAPACITY", &mut config.queue_capacity)?;
        env.apply_millis("STROBE_JOB_TIMEOUT_MS", &mut config.job_timeout)?;
        env.apply("STROBE_FRAME_CAP", &mut config.frame_cap)?;
        env.apply("STROBE_TERMINAL_RETENTION", &mut config.terminal_retention)?;
        env.apply("STROBE_GRID_COLUMNS", &mut analysis.grid_columns)?;
        env.apply("STROBE_GRID_ROWS", &mut analysis.grid_rows)?;
        env.apply("STROBE_CONTRAST_THRESHOLD", &mut analysis.relative_contrast_threshold)?;
        env.apply("STROBE_MIN_LUMINANCE_DELTA", &mut analysis.min_luminance_delta)?;
        env.apply("STROBE_MAX_DARKER_LUMINANCE", &mut analysis.max_darker_luminance)?;
        env.apply("STROBE_MIN_FLASH_AREA", &mut analysis.min_flash_area)?;
        env.apply("STROBE_RED_MIN_CHANNEL", &mut analysis.red_min_channel)?;
        env.apply("STROBE_RED_MIN_RATIO", &mut analysis.red_min_ratio)?;
        env.apply("STROBE_RED_AREA_THRESHOLD", &mut analysis.red_area_threshold)?;
        env.apply("STROBE_RED_FRACTION_DELTA", &mut analysis.red_fraction_delta)?;
        env.apply_millis("STROBE_WINDOW_MS", &mut analysis.window)?;
        env.apply("STROBE_RATE_THRESHOLD", &mut analysis.rate_threshold)?;
        env.apply("STROBE_EVIDENCE_CAP", &mut analysis.evidence_cap)?;
        env.apply("STROBE_MAX_DEFECT_RATIO", &mut analysis.max_defect_ratio)?;
        env.apply("STROBE_FRAME_STRIDE", &mut analysis.frame_stride)?;
        env.apply("STROBE_PATTERN_CONTRAST", &mut analysis.pattern_contrast_threshold)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(invalid("pool_size", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        if self.job_timeout.is_zero() {
            return Err(invalid("job_timeout", "must be longer than zero"));
        }
        if self.terminal_retention == 0 {
            return Err(invalid("terminal_retention", "must be at least 1"));
        }
        self.analysis.validate()
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_string() }
}

fn check_fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, "must lie within 0.0..=1.0"))
    }
}

struct EnvOverrides<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvOverrides<F> {
    fn apply<T: FromStr>(&self, var: &'static str, slot: &mut T) -> Result<(), ConfigError> {
        if let Some(value) = (self.lookup)(var) {
            *slot = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var, value: value.clone() })?;
        }
        Ok(())
    }

    fn apply_millis(&self, var: &'static str, slot: &mut Duration) -> Result<(), ConfigError> {
        let mut millis = slot.as_millis() as u64;
        self.apply(var, &mut millis)?;
        *slot = Duration::from_millis(millis);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert!((1..=MAX_DEFAULT_POOL_SIZE).contains(&config.pool_size));
        assert_eq!(config.analysis.grid_columns * config.analysis.grid_rows, 16);
    }

    #[test]
    fn rejects_empty_grid() {
        let config = AnalysisConfig { grid_columns: 0, ..AnalysisConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "grid", .. })));
    }

    #[test]
    fn rejects_fraction_out_of_range() {
        let config = AnalysisConfig { min_flash_area: 1.5, ..AnalysisConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "min_flash_area", .. })
        ));
    }

    #[test]
    fn rejects_zero_pool() {
        let config = CoordinatorConfig { pool_size: 0, ..CoordinatorConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_brightness_and_pattern_thresholds() {
        let config = AnalysisConfig { max_darker_luminance: 300.0, ..AnalysisConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_darker_luminance", .. })
        ));

        let config = AnalysisConfig { pattern_contrast_threshold: f64::NAN, ..AnalysisConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "pattern_contrast_threshold", .. })
        ));
    }

    #[test]
    fn every_threshold_reads_from_the_environment() {
        let vars = HashMap::from([
            ("STROBE_MAX_DARKER_LUMINANCE", "190"),
            ("STROBE_RED_MIN_CHANNEL", "200"),
            ("STROBE_RED_MIN_RATIO", "0.7"),
            ("STROBE_MAX_DEFECT_RATIO", "0.3"),
            ("STROBE_PATTERN_CONTRAST", "64.5"),
            ("STROBE_TERMINAL_RETENTION", "16"),
            ("STROBE_WINDOW_MS", "1500"),
        ]);
        let config = CoordinatorConfig::from_lookup(|var| vars.get(var).map(|value| value.to_string()))
            .expect("overrides are valid");

        assert_eq!(config.analysis.max_darker_luminance, 190.0);
        assert_eq!(config.analysis.red_min_channel, 200);
        assert_eq!(config.analysis.red_min_ratio, 0.7);
        assert_eq!(config.analysis.max_defect_ratio, 0.3);
        assert_eq!(config.analysis.pattern_contrast_threshold, 64.5);
        assert_eq!(config.terminal_retention, 16);
        assert_eq!(config.analysis.window, Duration::from_millis(1500));
    }

    #[test]
    fn unparsable_environment_value_names_the_variable() {
        let result = CoordinatorConfig::from_lookup(|var| (var == "STROBE_RED_MIN_CHANNEL").then(|| "bright".to_string()));
        assert_eq!(
            result,
            Err(ConfigError::Env { var: "STROBE_RED_MIN_CHANNEL", value: "bright".to_string() })
        );
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{ "frame_cap": 12, "analysis": { "rate_threshold": 5 } }"#)
                .expect("config should deserialize");
        assert_eq!(config.frame_cap, 12);
        assert_eq!(config.analysis.rate_threshold, 5);
        assert_eq!(config.analysis.grid_columns, 4);
    }
}
