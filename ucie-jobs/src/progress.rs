//! Fallback progress for jobs whose backend does not report a percentage.
//!
//! Progress grows logarithmically with elapsed time: fast early so the user sees the job start,
//! slowing towards the expected duration. Locally estimated progress never reaches 100, only a
//! backend-confirmed completion may.

use std::time::Duration;

/// Default duration the estimator is calibrated against (10 minutes).
pub const DEFAULT_EXPECTED_DURATION: Duration = Duration::from_secs(10 * 60);

/// Highest percentage the estimator will ever report.
pub const DEFAULT_FALLBACK_CAP: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEstimator {
    expected_duration: Duration,
    cap: u8,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self {
            expected_duration: DEFAULT_EXPECTED_DURATION,
            cap: DEFAULT_FALLBACK_CAP,
        }
    }
}

impl ProgressEstimator {
    pub fn new(expected_duration: Duration) -> Self {
        Self {
            expected_duration,
            ..Default::default()
        }
    }

    /// Set the cap. Values of 100 or more are clamped to 99.
    pub fn with_cap(mut self, cap: u8) -> Self {
        self.cap = cap.min(99);
        self
    }

    pub fn expected_duration(&self) -> Duration {
        self.expected_duration
    }

    pub fn cap(&self) -> u8 {
        self.cap
    }

    /// Estimated percentage after `elapsed`.
    ///
    /// `log(elapsed_min + 1) / log(expected_min + 1) * 100`, floored and clamped to `[0, cap]`.
    pub fn estimate(&self, elapsed: Duration) -> u8 {
        let elapsed_minutes = elapsed.as_secs_f64() / 60.0;
        let expected_minutes = self.expected_duration.as_secs_f64() / 60.0;

        let denominator = (expected_minutes + 1.0).ln();
        if denominator <= 0.0 {
            return self.cap;
        }

        let raw = (elapsed_minutes + 1.0).ln() / denominator * 100.0;
        raw.clamp(0.0, self.cap as f64).floor() as u8
    }

    /// Percentage to display after a poll.
    ///
    /// A backend value greater than zero wins unconditionally. Otherwise the estimate is used,
    /// never lower than `previous` and never above the cap.
    pub fn resolve(&self, backend: Option<f64>, elapsed: Duration, previous: u8) -> u8 {
        match backend {
            Some(progress) if progress.is_finite() && progress > 0.0 => {
                progress.round().clamp(0.0, 100.0) as u8
            }
            _ => self.estimate(elapsed).max(previous).min(self.cap),
        }
    }
}
