use qlb_core::errors::QlbError;
use serde::{Deserialize, Serialize};

use super::{Submission, Submitter};
use crate::job::JobTable;
use crate::result::{ErrorStatistics, MonteCarloResult};
use crate::stats::precision_to_errors;

/// Pushes each trusted job towards a target relative precision of its
/// logical error rate.
///
/// A job is trusted once it has collected the errors needed for
/// `min_precision`. Untrusted jobs are left alone so budget is not spent
/// chasing noise; pair this policy with a [`MinShotsSubmitter`](super::MinShotsSubmitter)
/// to seed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecisionSubmitter {
    /// Precision a job must reach before it receives more shots.
    #[serde(default = "default_min_precision")]
    pub min_precision: f64,
    /// Precision to aim for.
    #[serde(default = "default_target_precision")]
    pub target_precision: f64,
    /// Rough CPU seconds budget per job.
    #[serde(default = "default_time_limit")]
    pub time_limit: Option<f64>,
    /// Smallest submission.
    #[serde(default = "default_min_shots")]
    pub min_shots: u64,
    /// Failure rate above which precision is relaxed. Off by default.
    #[serde(default)]
    pub high_rate_threshold: Option<f64>,
    /// Precision used for jobs above the threshold.
    #[serde(default = "default_high_rate_precision")]
    pub high_rate_precision: f64,
}

fn default_min_precision() -> f64 {
    0.5
}

fn default_target_precision() -> f64 {
    0.03
}

fn default_time_limit() -> Option<f64> {
    Some(3600.0)
}

fn default_min_shots() -> u64 {
    100
}

fn default_high_rate_precision() -> f64 {
    0.3
}

impl Default for PrecisionSubmitter {
    fn default() -> Self {
        Self {
            min_precision: default_min_precision(),
            target_precision: default_target_precision(),
            time_limit: default_time_limit(),
            min_shots: default_min_shots(),
            high_rate_threshold: None,
            high_rate_precision: default_high_rate_precision(),
        }
    }
}

impl<R: MonteCarloResult + ErrorStatistics> Submitter<R> for PrecisionSubmitter {
    fn submit(&mut self, jobs: &mut JobTable<R>) -> Result<Vec<Submission>, QlbError> {
        let mut submit = Vec::new();
        let trusted_errors = precision_to_errors(self.min_precision);
        for job in jobs.iter() {
            if job.result().is_none() {
                continue;
            }
            if self.time_limit.is_some_and(|limit| job.duration() >= limit) {
                continue;
            }
            let errors = job.errors();
            if errors < trusted_errors {
                continue;
            }
            let mut precision = self.target_precision;
            if let Some(threshold) = self.high_rate_threshold {
                let stats = job.stats();
                if stats.samples() > 0 && stats.failure_rate_value() > threshold {
                    precision = precision.max(self.high_rate_precision);
                }
            }
            let target_shots = if errors < 10 {
                job.finished_shots() * 2
            } else {
                let required = precision_to_errors(precision);
                (required as f64 / errors as f64 * job.shots() as f64).ceil() as u64
            };
            if target_shots <= job.expecting_shots() {
                continue;
            }
            let mut remaining = target_shots - job.expecting_shots();
            if let Some(limit) = self.time_limit {
                let per_shot = job.duration_per_shot();
                if per_shot > 0.0 && job.duration() + remaining as f64 * per_shot > limit {
                    remaining = ((limit - job.duration()) / per_shot).ceil().max(0.0) as u64;
                }
            }
            if remaining > 0 {
                submit.push(Submission::new(job, remaining.max(self.min_shots)));
            }
        }
        Ok(submit)
    }
}
