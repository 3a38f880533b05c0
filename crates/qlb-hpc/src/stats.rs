//! Failure-rate statistics for finished jobs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Half-width multiplier of the 99% confidence interval.
pub const CONFIDENCE_Z: f64 = 2.58;

/// Number of errors needed so that the 99% confidence half-width is
/// `precision` times the estimated failure rate.
///
/// `precision * errors / shots ~= 2.58 * sqrt(errors) / shots`.
pub fn precision_to_errors(precision: f64) -> u64 {
    (CONFIDENCE_Z / precision).powi(2).ceil() as u64
}

/// Aggregate counters of one job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Stats {
    /// Finished shots, including discarded ones.
    pub shots: u64,
    /// Shots with a logical error.
    pub errors: u64,
    /// Shots discarded by post-selection.
    pub discards: u64,
    /// Wall time spent on the finished shots, in seconds.
    pub duration: f64,
}

impl Stats {
    /// Shots that count towards the failure rate.
    pub fn samples(&self) -> u64 {
        self.shots.saturating_sub(self.discards)
    }

    /// Estimated logical failure rate.
    pub fn failure_rate_value(&self) -> f64 {
        self.errors as f64 / self.samples() as f64
    }

    /// 99% confidence half-width of the failure rate.
    pub fn failure_rate_uncertainty(&self) -> f64 {
        let p = self.failure_rate_value();
        CONFIDENCE_Z * (p * (1.0 - p) / self.samples() as f64).sqrt()
    }

    /// Uncertainty relative to the estimated failure rate.
    pub fn relative_uncertainty(&self) -> f64 {
        self.failure_rate_uncertainty() / self.failure_rate_value()
    }

    /// Samples per second.
    pub fn speed(&self) -> f64 {
        self.samples() as f64 / self.duration
    }

    /// Seconds per shot, discards included.
    pub fn average_duration(&self) -> f64 {
        self.duration / self.shots as f64
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.samples() == 0 {
            return write!(f, "Stats{{ 0/0 }}");
        }
        write!(
            f,
            "Stats{{ pL = {}/{}= {:.2e}±{:.1e}",
            self.errors,
            self.samples(),
            self.failure_rate_value(),
            self.failure_rate_uncertainty()
        )?;
        if self.duration != 0.0 {
            write!(f, ", speed={:.2e}s/S", self.average_duration())?;
        }
        write!(f, " }}")
    }
}
