use qlb_core::errors::QlbError;
use serde::{Deserialize, Serialize};

use super::{Submission, Submitter};
use crate::job::JobTable;
use crate::result::{ErrorStatistics, MonteCarloResult};

/// Doubles the shots of each job until it has collected enough errors,
/// reached `max_shots`, or spent `time_limit` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveMinShotsSubmitter {
    /// Shots every job receives first.
    #[serde(default = "default_min_shots")]
    pub min_shots: u64,
    /// Upper bound on expected shots.
    #[serde(default = "default_max_shots")]
    pub max_shots: u64,
    /// Stop once this many errors were observed.
    #[serde(default = "default_max_errors")]
    pub max_errors: u64,
    /// Rough CPU seconds budget per job.
    #[serde(default = "default_time_limit")]
    pub time_limit: Option<f64>,
}

fn default_min_shots() -> u64 {
    1000
}

fn default_max_shots() -> u64 {
    1_000_000
}

fn default_max_errors() -> u64 {
    100
}

fn default_time_limit() -> Option<f64> {
    Some(3600.0)
}

impl Default for AdaptiveMinShotsSubmitter {
    fn default() -> Self {
        Self {
            min_shots: default_min_shots(),
            max_shots: default_max_shots(),
            max_errors: default_max_errors(),
            time_limit: default_time_limit(),
        }
    }
}

impl<R: MonteCarloResult + ErrorStatistics> Submitter<R> for AdaptiveMinShotsSubmitter {
    fn submit(&mut self, jobs: &mut JobTable<R>) -> Result<Vec<Submission>, QlbError> {
        let mut submit = Vec::new();
        for job in jobs.iter() {
            let expecting = job.expecting_shots();
            if job.result().is_none() && expecting < self.min_shots {
                submit.push(Submission::new(job, self.min_shots - expecting));
                continue;
            }
            if self.time_limit.is_some_and(|limit| job.duration() >= limit) {
                continue;
            }
            if job.result().is_some() && job.errors() >= self.max_errors {
                continue;
            }
            if expecting < self.max_shots {
                let doubled = (job.finished_shots() * 2).min(self.max_shots);
                if doubled > expecting {
                    submit.push(Submission::new(job, doubled - expecting));
                }
            }
        }
        Ok(submit)
    }
}
