use qlb_core::errors::QlbError;

use super::{Submission, Submitter};
use crate::job::JobTable;
use crate::result::MonteCarloResult;

/// Runs `previous` to completion before handing over to `next`.
///
/// The barrier opens the first time `previous` proposes nothing while no job
/// has pending shots, and stays open. Barriers nest, so
/// `Barrier::new(Barrier::new(a, b), c)` sequences three phases.
#[derive(Debug, Clone)]
pub struct Barrier<A, B> {
    previous: A,
    next: B,
    open: bool,
}

impl<A, B> Barrier<A, B> {
    /// Sequences `previous` before `next`.
    pub fn new(previous: A, next: B) -> Self {
        Self {
            previous,
            next,
            open: false,
        }
    }

    /// Whether the previous phase has drained.
    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl<R, A, B> Submitter<R> for Barrier<A, B>
where
    R: MonteCarloResult,
    A: Submitter<R>,
    B: Submitter<R>,
{
    fn submit(&mut self, jobs: &mut JobTable<R>) -> Result<Vec<Submission>, QlbError> {
        if !self.open {
            let submit = self.previous.submit(jobs)?;
            if !submit.is_empty() || !jobs.no_pending() {
                return Ok(submit);
            }
            self.open = true;
        }
        self.next.submit(jobs)
    }
}
