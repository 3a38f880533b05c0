use qlb_core::errors::{ErrorInfo, QlbError};
use serde::{Deserialize, Serialize};

use super::{Submission, Submitter};
use crate::job::JobTable;
use crate::result::MonteCarloResult;

/// Brings every job up to a minimum number of expected shots.
///
/// With several targets, job `i` (in declaration order) aims for
/// `shots[i % shots.len()]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinShotsSubmitter {
    /// Per-index shot targets, cycled over the jobs.
    pub shots: Vec<u64>,
}

impl MinShotsSubmitter {
    /// Same target for every job.
    pub fn new(shots: u64) -> Self {
        Self { shots: vec![shots] }
    }

    /// Cycles through `shots` by job index.
    pub fn cycle(shots: Vec<u64>) -> Result<Self, QlbError> {
        if shots.is_empty() {
            return Err(QlbError::Config(ErrorInfo::new(
                "submitter.min_shots",
                "at least one shot target is required",
            )));
        }
        Ok(Self { shots })
    }
}

impl Default for MinShotsSubmitter {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl<R: MonteCarloResult> Submitter<R> for MinShotsSubmitter {
    fn submit(&mut self, jobs: &mut JobTable<R>) -> Result<Vec<Submission>, QlbError> {
        if self.shots.is_empty() {
            return Ok(Vec::new());
        }
        Ok(jobs
            .iter()
            .enumerate()
            .filter_map(|(index, job)| {
                let target = self.shots[index % self.shots.len()];
                (job.expecting_shots() < target)
                    .then(|| Submission::new(job, target - job.expecting_shots()))
            })
            .collect())
    }
}
