//! Policies deciding how many more shots each job needs.
//!
//! A submitter inspects the job table and returns `(job, extra shots)`
//! proposals. The executor calls it repeatedly, so a policy must account for
//! shots that are already pending through
//! [`MonteCarloJob::expecting_shots`](crate::job::MonteCarloJob::expecting_shots).

mod adaptive_min_shots;
mod adaptive_p_vec;
mod barrier;
mod min_shots;
mod precision;

pub use adaptive_min_shots::AdaptiveMinShotsSubmitter;
pub use adaptive_p_vec::{AdaptivePVec, AdaptivePVecSubmitter};
pub use barrier::Barrier;
pub use min_shots::MinShotsSubmitter;
pub use precision::PrecisionSubmitter;

use qlb_core::errors::QlbError;

use crate::job::{JobTable, MonteCarloJob};
use crate::result::MonteCarloResult;

/// Request for more shots of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Hash of the job.
    pub hash: String,
    /// Additional shots requested.
    pub shots: u64,
}

impl Submission {
    /// Requests `shots` more shots of `job`.
    pub fn new<R>(job: &MonteCarloJob<R>, shots: u64) -> Self
    where
        R: MonteCarloResult,
    {
        Self {
            hash: job.hash().to_string(),
            shots,
        }
    }
}

/// Scheduling policy.
pub trait Submitter<R: MonteCarloResult> {
    /// Proposes additional work. May register new jobs in `jobs`.
    fn submit(&mut self, jobs: &mut JobTable<R>) -> Result<Vec<Submission>, QlbError>;
}

impl<R, F> Submitter<R> for F
where
    R: MonteCarloResult,
    F: FnMut(&mut JobTable<R>) -> Vec<Submission>,
{
    fn submit(&mut self, jobs: &mut JobTable<R>) -> Result<Vec<Submission>, QlbError> {
        Ok(self(jobs))
    }
}
