use std::path::Path;
use std::time::Duration;

use qlb_core::errors::{ErrorInfo, QlbError};
use qlb_core::serde::from_yaml_slice;
use serde::{Deserialize, Serialize};

use crate::job::MonteCarloJob;

/// YAML-configurable tuning of the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloExecutorConfig {
    /// Finished shots needed before the per-shot cost is trusted.
    #[serde(default = "default_min_shots_before_estimation")]
    pub min_shots_before_estimation: u64,
    /// Seconds of accumulated work before quotas are split across dispatches.
    #[serde(default = "default_min_multi_dispatch_duration")]
    pub min_multi_dispatch_duration: f64,
    /// Preferred wall time of one dispatch, in seconds.
    #[serde(default = "default_target_job_time")]
    pub target_job_time: f64,
    /// Hard upper bound on the wall time of one dispatch, in seconds.
    #[serde(default = "default_max_job_time")]
    pub max_job_time: f64,
    /// Maximum number of dispatches in flight.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Re-invoke the submitter until it proposes nothing new.
    #[serde(default = "default_iterative_submitter")]
    pub iterative_submitter: bool,
    /// Bound on submitter invocations per loop iteration.
    #[serde(default = "default_max_submitter_iterations")]
    pub max_submitter_iterations: usize,
    /// Longest blocking wait for completions, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,
}

fn default_min_shots_before_estimation() -> u64 {
    100
}

fn default_min_multi_dispatch_duration() -> f64 {
    30.0
}

fn default_target_job_time() -> f64 {
    60.0
}

fn default_max_job_time() -> f64 {
    3600.0
}

fn default_max_in_flight() -> usize {
    1000
}

fn default_iterative_submitter() -> bool {
    true
}

fn default_max_submitter_iterations() -> usize {
    64
}

fn default_poll_interval() -> f64 {
    1.0
}

impl Default for MonteCarloExecutorConfig {
    fn default() -> Self {
        Self {
            min_shots_before_estimation: default_min_shots_before_estimation(),
            min_multi_dispatch_duration: default_min_multi_dispatch_duration(),
            target_job_time: default_target_job_time(),
            max_job_time: default_max_job_time(),
            max_in_flight: default_max_in_flight(),
            iterative_submitter: default_iterative_submitter(),
            max_submitter_iterations: default_max_submitter_iterations(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl MonteCarloExecutorConfig {
    /// Loads and validates a YAML config file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, QlbError> {
        let bytes = std::fs::read(path).map_err(|err| QlbError::io("config.read", path, err))?;
        let config: Self = from_yaml_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), QlbError> {
        let invalid = |field: &str, message: &str| {
            Err(QlbError::Config(
                ErrorInfo::new("config.invalid", message).with_context("field", field),
            ))
        };
        if self.max_in_flight == 0 {
            return invalid("max_in_flight", "at least one dispatch must be allowed in flight");
        }
        if self.max_submitter_iterations == 0 {
            return invalid("max_submitter_iterations", "the submitter must run at least once");
        }
        if !(self.max_job_time > 0.0) {
            return invalid("max_job_time", "must be positive");
        }
        if !(self.target_job_time > 0.0) {
            return invalid("target_job_time", "must be positive");
        }
        if !(self.min_multi_dispatch_duration >= 0.0) {
            return invalid("min_multi_dispatch_duration", "must not be negative");
        }
        if !(self.poll_interval > 0.0) || !self.poll_interval.is_finite() {
            return invalid("poll_interval", "must be a positive number of seconds");
        }
        Ok(())
    }

    /// Upper bound on one blocking wait.
    pub fn poll_duration(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval)
    }

    /// Splits `shots` requested shots of `job` into
    /// `(shots_per_dispatch, dispatch_count)`.
    ///
    /// The first dispatch of a job runs a single shot to measure the fixed
    /// overhead (`min_time`), then a warm-up batch estimates the per-shot
    /// cost. Afterwards each dispatch is sized to land near
    /// `target_job_time` and never beyond `max_job_time`.
    pub fn warmed_up_split<R>(&self, job: &MonteCarloJob<R>, shots: u64) -> (u64, u64) {
        if shots == 0 {
            return (0, 0);
        }
        let Some(min_time) = job.min_time else {
            return (1, 1);
        };
        if job.finished_shots < self.min_shots_before_estimation {
            return (shots.min(self.min_shots_before_estimation).max(1), 1);
        }
        let per_shot_time = (job.duration - min_time) / job.finished_shots as f64;
        if !(per_shot_time > 0.0) {
            return (shots, 1);
        }
        if job.duration < self.min_multi_dispatch_duration {
            let budget = self.min_multi_dispatch_duration.min(self.max_job_time) - min_time;
            let fill = (budget / per_shot_time).floor();
            let fill = if fill >= 1.0 { fill.min(shots as f64) as u64 } else { 1 };
            return (fill.clamp(1, shots), 1);
        }
        let target = self
            .target_job_time
            .max(3.0 * min_time)
            .min(self.max_job_time);
        if min_time + shots as f64 * per_shot_time <= target {
            return (shots, 1);
        }
        let cap = ((target - min_time) / per_shot_time).floor();
        let cap = if cap >= 1.0 { cap.min(shots as f64) as u64 } else { 1 };
        let count = shots.div_ceil(cap);
        let per = shots.div_ceil(count);
        (per, count)
    }
}
