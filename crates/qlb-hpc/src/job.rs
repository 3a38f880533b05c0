//! Jobs and the insertion-ordered job table.

use std::fmt;

use indexmap::IndexMap;
use qlb_core::errors::{ErrorInfo, QlbError};

use crate::parameters::JobParameters;
use crate::result::{ErrorStatistics, MonteCarloResult};
use crate::stats::Stats;

/// Parameters plus the running tally of a Monte Carlo job.
#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloJob<R> {
    parameters: JobParameters,
    pub(crate) finished_shots: u64,
    pub(crate) pending_shots: u64,
    pub(crate) duration: f64,
    pub(crate) result: Option<R>,
    pub(crate) min_time: Option<f64>,
}

impl<R: MonteCarloResult> MonteCarloJob<R> {
    /// Creates a job with no progress.
    pub fn new(parameters: JobParameters) -> Self {
        Self {
            parameters,
            finished_shots: 0,
            pending_shots: 0,
            duration: 0.0,
            result: None,
            min_time: None,
        }
    }

    /// Creates a job carrying previously finished work.
    ///
    /// `result` is dropped when `finished_shots` is zero.
    pub fn restored(
        parameters: JobParameters,
        finished_shots: u64,
        duration: f64,
        result: Option<R>,
        min_time: Option<f64>,
    ) -> Self {
        Self {
            parameters,
            finished_shots,
            pending_shots: 0,
            duration,
            result: if finished_shots == 0 { None } else { result },
            min_time,
        }
    }

    /// Identity of the job.
    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    /// Lookup key, see [`JobParameters::hash`].
    pub fn hash(&self) -> &str {
        self.parameters.hash()
    }

    /// Shots whose results have been merged.
    pub fn finished_shots(&self) -> u64 {
        self.finished_shots
    }

    /// Shots requested but not yet returned, queued quota included.
    pub fn pending_shots(&self) -> u64 {
        self.pending_shots
    }

    /// `finished_shots + pending_shots`.
    pub fn expecting_shots(&self) -> u64 {
        self.finished_shots + self.pending_shots
    }

    /// Alias of [`finished_shots`](Self::finished_shots).
    pub fn shots(&self) -> u64 {
        self.finished_shots
    }

    /// Cumulative seconds over finished dispatches.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Average seconds per finished shot, 0 before the first result.
    pub fn duration_per_shot(&self) -> f64 {
        if self.finished_shots == 0 {
            0.0
        } else {
            self.duration / self.finished_shots as f64
        }
    }

    /// Aggregated result, `None` exactly when no shot has finished.
    pub fn result(&self) -> Option<&R> {
        self.result.as_ref()
    }

    /// Shortest single-dispatch duration observed, used as the fixed
    /// overhead estimate of one dispatch.
    pub fn min_time(&self) -> Option<f64> {
        self.min_time
    }

    /// Merges the outcome of one successful dispatch.
    pub(crate) fn record_dispatch(&mut self, shots: u64, result: R, duration: f64) {
        self.finished_shots += shots;
        self.duration += duration;
        if self.finished_shots > 0 {
            self.result = Some(match self.result.take() {
                Some(previous) => previous.combine(&result),
                None => result,
            });
        }
        self.min_time = Some(match self.min_time {
            Some(min_time) => min_time.min(duration),
            None => duration,
        });
    }

    /// Replaces the tally with persisted progress.
    pub(crate) fn restore(
        &mut self,
        finished_shots: u64,
        duration: f64,
        result: Option<R>,
        min_time: Option<f64>,
    ) {
        self.finished_shots = finished_shots;
        self.duration = duration;
        self.result = if finished_shots == 0 { None } else { result };
        self.min_time = min_time;
    }
}

impl<R: MonteCarloResult + ErrorStatistics> MonteCarloJob<R> {
    /// Failure-rate statistics of the finished shots.
    pub fn stats(&self) -> Stats {
        Stats {
            shots: self.finished_shots,
            errors: self.result.as_ref().map_or(0, ErrorStatistics::errors),
            discards: self.result.as_ref().map_or(0, ErrorStatistics::discards),
            duration: self.duration,
        }
    }

    /// Error count of the finished shots, 0 before the first result.
    pub fn errors(&self) -> u64 {
        self.result.as_ref().map_or(0, ErrorStatistics::errors)
    }
}

impl<R> fmt::Display for MonteCarloJob<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MonteCarloJob{}", self.parameters)
    }
}

/// Insertion-ordered table of jobs keyed by parameter hash.
///
/// Submitters receive the table mutably so they can create sibling jobs;
/// newly created hashes are recorded so the executor can hydrate them from
/// the job-state file.
#[derive(Debug, Clone)]
pub struct JobTable<R> {
    jobs: IndexMap<String, MonteCarloJob<R>>,
    created: Vec<String>,
}

impl<R: MonteCarloResult> JobTable<R> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            jobs: IndexMap::new(),
            created: Vec::new(),
        }
    }

    /// Number of jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the table holds no job.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &MonteCarloJob<R>> {
        self.jobs.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut MonteCarloJob<R>> {
        self.jobs.values_mut()
    }

    /// Looks a job up by parameters.
    pub fn get(&self, parameters: &JobParameters) -> Option<&MonteCarloJob<R>> {
        self.jobs.get(parameters.hash())
    }

    /// Looks a job up by hash.
    pub fn get_by_hash(&self, hash: &str) -> Option<&MonteCarloJob<R>> {
        self.jobs.get(hash)
    }

    pub(crate) fn get_mut_by_hash(&mut self, hash: &str) -> Option<&mut MonteCarloJob<R>> {
        self.jobs.get_mut(hash)
    }

    /// Looks a job up by parameters, failing with [`QlbError::Lookup`] when
    /// it is missing.
    pub fn get_assert(&self, parameters: &JobParameters) -> Result<&MonteCarloJob<R>, QlbError> {
        self.get(parameters).ok_or_else(|| {
            QlbError::Lookup(
                ErrorInfo::new("jobs.missing", "job is not registered")
                    .with_context("job", parameters.to_string())
                    .with_context("hash", parameters.short_hash()),
            )
        })
    }

    /// Whether a job with these parameters exists.
    pub fn contains(&self, parameters: &JobParameters) -> bool {
        self.jobs.contains_key(parameters.hash())
    }

    /// Registers a job, failing with [`QlbError::DuplicateJob`] when the hash
    /// is taken. Parameters sharing a hash with different values fail with
    /// [`QlbError::HashConflict`].
    pub fn add_job(&mut self, job: MonteCarloJob<R>) -> Result<(), QlbError> {
        if self.registered(job.parameters())? {
            return Err(QlbError::DuplicateJob(
                ErrorInfo::new("executor.duplicate_job", "job is already registered")
                    .with_context("job", job.parameters().to_string())
                    .with_context("hash", job.parameters().short_hash()),
            ));
        }
        self.insert(job);
        Ok(())
    }

    /// Registers a job with no progress unless one already exists.
    /// Returns true when a job was created. An existing job under the same
    /// hash with different parameters fails with [`QlbError::HashConflict`].
    pub fn ensure_job(&mut self, parameters: JobParameters) -> Result<bool, QlbError> {
        if self.registered(&parameters)? {
            return Ok(false);
        }
        self.insert(MonteCarloJob::new(parameters));
        Ok(true)
    }

    fn registered(&self, parameters: &JobParameters) -> Result<bool, QlbError> {
        let Some(existing) = self.jobs.get(parameters.hash()) else {
            return Ok(false);
        };
        if existing.parameters() != parameters {
            return Err(QlbError::HashConflict(
                ErrorInfo::new("jobs.hash_conflict", "different parameters share a hash")
                    .with_context("hash", parameters.hash())
                    .with_context("existing", existing.parameters().to_string())
                    .with_context("incoming", parameters.to_string()),
            ));
        }
        Ok(true)
    }

    fn insert(&mut self, job: MonteCarloJob<R>) {
        let hash = job.hash().to_string();
        self.jobs.insert(hash.clone(), job);
        self.created.push(hash);
    }

    /// Hashes added since the last call.
    pub(crate) fn take_created(&mut self) -> Vec<String> {
        std::mem::take(&mut self.created)
    }

    /// Whether no job has outstanding shots.
    pub fn no_pending(&self) -> bool {
        self.jobs.values().all(|job| job.pending_shots == 0)
    }
}

impl<R: MonteCarloResult> Default for JobTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, R> IntoIterator for &'a JobTable<R> {
    type Item = &'a MonteCarloJob<R>;
    type IntoIter = indexmap::map::Values<'a, String, MonteCarloJob<R>>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.values()
    }
}
