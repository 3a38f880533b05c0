//! Control loop turning submitter proposals into dispatches.
//!
//! The executor owns the job table. Dispatches run on a [`WorkerPool`] and
//! report through a channel; the table is only mutated on the loop thread
//! while collecting those reports, loading from disk, or running the
//! submitter.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use indexmap::IndexMap;
use qlb_core::errors::{ErrorInfo, QlbError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::WorkerPool;
use crate::config::MonteCarloExecutorConfig;
use crate::dispatch::{dispatch_task, DispatchOutcome};
use crate::job::{JobTable, MonteCarloJob};
use crate::panic_store::{JobPanic, PanicStore};
use crate::parameters::JobParameters;
use crate::sampler::Sampler;
use crate::store::JobStateFile;
use crate::submitter::Submitter;

/// Panic file used when neither a panic file nor a state file is configured.
pub const DEFAULT_PANIC_FILE: &str = "monte_carlo.panic.yaml";

/// Per-call options of [`MonteCarloJobExecutor::execute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOptions {
    /// Give up (with [`QlbError::Timeout`]) once this much wall time passed.
    pub timeout: Option<Duration>,
    /// Skip submitting and dispatching; only persist and report.
    pub force_finished: bool,
}

/// Why [`MonteCarloJobExecutor::execute`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    /// Nothing in flight and no quota left.
    #[default]
    Drained,
    /// Work was proposed but no worker pool was attached.
    NoBackend,
    /// The caller asked to stop without sampling.
    ForceFinished,
}

/// Counters of one [`MonteCarloJobExecutor::execute`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecuteSummary {
    /// Loop iterations.
    pub iterations: usize,
    /// Dispatches handed to the pool.
    pub dispatched: usize,
    /// Dispatches whose results were merged.
    pub completed: usize,
    /// Dispatches that returned an error or panicked.
    pub failed: usize,
    /// Dispatches still in flight when the call returned.
    pub cancelled: usize,
    /// Whether the submitter hit `max_submitter_iterations`.
    pub submitter_capped: bool,
    /// Exit reason.
    pub exit: ExitReason,
}

struct InFlight {
    hash: String,
    shots: u64,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy)]
struct Quota {
    shots: u64,
    gate: Option<u64>,
}

/// Schedules Monte Carlo jobs onto a worker pool.
pub struct MonteCarloJobExecutor<S: Sampler> {
    sampler: Arc<S>,
    jobs: JobTable<S::Output>,
    config: MonteCarloExecutorConfig,
    state_file: Option<JobStateFile>,
    panics: PanicStore,
    in_flight: BTreeMap<u64, InFlight>,
    pending_submit: IndexMap<String, Quota>,
    next_dispatch: u64,
}

impl<S: Sampler> MonteCarloJobExecutor<S> {
    /// Creates an executor over `jobs`.
    ///
    /// Duplicate jobs are rejected. The panic store is loaded from
    /// `panic_file`, defaulting to `<state_file>.panic` or
    /// [`DEFAULT_PANIC_FILE`], and every job is hydrated from `state_file`
    /// when it exists.
    pub fn new<I>(
        sampler: S,
        jobs: I,
        config: MonteCarloExecutorConfig,
        state_file: Option<PathBuf>,
        panic_file: Option<PathBuf>,
    ) -> Result<Self, QlbError>
    where
        I: IntoIterator<Item = MonteCarloJob<S::Output>>,
    {
        config.validate()?;
        let panic_path = match (&panic_file, &state_file) {
            (Some(path), _) => path.clone(),
            (None, Some(state)) => {
                let mut name = state.clone().into_os_string();
                name.push(".panic");
                PathBuf::from(name)
            }
            (None, None) => PathBuf::from(DEFAULT_PANIC_FILE),
        };
        let mut table = JobTable::new();
        for job in jobs {
            table.add_job(job)?;
        }
        table.take_created();
        let mut panics = PanicStore::new(panic_path);
        panics.load_from_file()?;
        let mut executor = Self {
            sampler: Arc::new(sampler),
            jobs: table,
            config,
            state_file: state_file.map(JobStateFile::new),
            panics,
            in_flight: BTreeMap::new(),
            pending_submit: IndexMap::new(),
            next_dispatch: 0,
        };
        executor.load_from_file()?;
        Ok(executor)
    }

    /// Scheduling configuration.
    pub fn config(&self) -> &MonteCarloExecutorConfig {
        &self.config
    }

    /// Job table.
    pub fn jobs(&self) -> &JobTable<S::Output> {
        &self.jobs
    }

    /// Jobs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &MonteCarloJob<S::Output>> {
        self.jobs.iter()
    }

    /// Number of jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether there is no job.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Registers a job.
    ///
    /// An existing hash fails with [`QlbError::DuplicateJob`] unless
    /// `skip_if_exists` is set. With `load_from_file`, the new job is
    /// hydrated from the state file.
    pub fn add_job(
        &mut self,
        job: MonteCarloJob<S::Output>,
        load_from_file: bool,
        skip_if_exists: bool,
    ) -> Result<(), QlbError> {
        let exists = self
            .jobs
            .get(job.parameters())
            .is_some_and(|existing| existing.parameters() == job.parameters());
        if skip_if_exists && exists {
            return Ok(());
        }
        let hash = job.hash().to_string();
        self.jobs.add_job(job)?;
        self.jobs.take_created();
        if load_from_file {
            self.hydrate(&[hash])?;
        }
        Ok(())
    }

    /// Looks a job up by parameters.
    pub fn get_job(&self, parameters: &JobParameters) -> Option<&MonteCarloJob<S::Output>> {
        self.jobs.get(parameters)
    }

    /// Looks a job up, failing with [`QlbError::Lookup`] when it is missing.
    pub fn get_job_assert(
        &self,
        parameters: &JobParameters,
    ) -> Result<&MonteCarloJob<S::Output>, QlbError> {
        self.jobs.get_assert(parameters)
    }

    /// Failure records.
    pub fn panics(&self) -> &PanicStore {
        &self.panics
    }

    /// Forgets the failure of one job so it is scheduled again.
    pub fn clear_panic(&mut self, parameters: &JobParameters) -> Result<Option<JobPanic>, QlbError> {
        self.panics.clear_panic(parameters)
    }

    /// Dispatches currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Dispatches of one job currently in flight.
    pub fn in_flight_for(&self, hash: &str) -> usize {
        self.in_flight
            .values()
            .filter(|flight| flight.hash == hash)
            .count()
    }

    /// Quota of one job not yet turned into dispatches.
    pub fn pending_submit(&self, hash: &str) -> u64 {
        self.pending_submit.get(hash).map_or(0, |quota| quota.shots)
    }

    /// Whether no job has outstanding shots.
    pub fn no_pending(&self) -> bool {
        self.jobs.no_pending()
    }

    /// Overwrites every job's tally with the state file, if configured.
    pub fn load_from_file(&mut self) -> Result<(), QlbError> {
        let hashes: Vec<String> = self.jobs.iter().map(|job| job.hash().to_string()).collect();
        self.hydrate(&hashes)
    }

    /// Writes every job to the state file, if configured.
    pub fn update_file(&self) -> Result<(), QlbError> {
        match &self.state_file {
            Some(file) => file.persist(self.jobs.iter()),
            None => Ok(()),
        }
    }

    fn hydrate(&mut self, hashes: &[String]) -> Result<(), QlbError> {
        let Some(file) = &self.state_file else {
            return Ok(());
        };
        let Some(state) = file.load()? else {
            return Ok(());
        };
        for hash in hashes {
            if let Some(job) = self.jobs.get_mut_by_hash(hash) {
                if JobStateFile::hydrate(&state, job)? {
                    debug!(job = %job.parameters().short_hash(), shots = job.finished_shots(), "loaded job from file");
                }
            }
        }
        Ok(())
    }

    /// Runs the scheduling loop until the work drains.
    ///
    /// `loop_callback` observes the executor once per iteration. With
    /// `pool = None`, the loop exits as soon as work would have to be
    /// dispatched. Whatever the exit path, in-flight dispatches are
    /// cancelled, queued quota is dropped and every `pending_shots` is reset;
    /// finished counts are kept.
    pub fn execute<F>(
        &mut self,
        submitter: &mut dyn Submitter<S::Output>,
        pool: Option<&dyn WorkerPool>,
        options: &ExecuteOptions,
        mut loop_callback: F,
    ) -> Result<ExecuteSummary, QlbError>
    where
        F: FnMut(&Self),
    {
        let (sender, receiver) = channel::unbounded();
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let mut summary = ExecuteSummary::default();
        info!(
            jobs = self.jobs.len(),
            panicked = self.panics.len(),
            sampler = %self.sampler.name(),
            "monte carlo execution started"
        );
        let outcome = self.run_loop(
            submitter,
            pool,
            options,
            deadline,
            (&sender, &receiver),
            &mut summary,
            &mut loop_callback,
        );
        summary.cancelled = self.cancel_all();
        drop(receiver);
        match outcome {
            Ok(exit) => {
                summary.exit = exit;
                info!(
                    iterations = summary.iterations,
                    dispatched = summary.dispatched,
                    failed = summary.failed,
                    exit = ?exit,
                    "monte carlo execution finished"
                );
                Ok(summary)
            }
            Err(err) => {
                if let Err(persist) = self.update_file() {
                    warn!(error = %persist, "failed to persist state after aborted execution");
                }
                warn!(
                    error = %err,
                    cancelled = summary.cancelled,
                    "monte carlo execution aborted"
                );
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_loop<F>(
        &mut self,
        submitter: &mut dyn Submitter<S::Output>,
        pool: Option<&dyn WorkerPool>,
        options: &ExecuteOptions,
        deadline: Option<Instant>,
        (sender, receiver): (&Sender<DispatchOutcome<S::Output>>, &Receiver<DispatchOutcome<S::Output>>),
        summary: &mut ExecuteSummary,
        loop_callback: &mut F,
    ) -> Result<ExitReason, QlbError>
    where
        F: FnMut(&Self),
    {
        loop {
            summary.iterations += 1;
            if !self.in_flight.is_empty() {
                let wait = self.wait_budget(deadline)?;
                match receiver.recv_timeout(wait) {
                    Ok(outcome) => {
                        self.collect(outcome, summary)?;
                        while let Ok(outcome) = receiver.try_recv() {
                            self.collect(outcome, summary)?;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(QlbError::Io(ErrorInfo::new(
                            "executor.channel_closed",
                            "dispatch channel closed while dispatches were in flight",
                        )));
                    }
                }
            }

            if !options.force_finished {
                self.run_submitter(submitter, summary)?;
                if self.has_quota() {
                    match pool {
                        Some(pool) => self.dispatch_ready(pool, sender, summary)?,
                        None => {
                            self.update_file()?;
                            loop_callback(&*self);
                            return Ok(ExitReason::NoBackend);
                        }
                    }
                }
            }

            self.update_file()?;
            loop_callback(&*self);

            if self.in_flight.is_empty() {
                if options.force_finished {
                    return Ok(ExitReason::ForceFinished);
                }
                if !self.has_quota() {
                    return Ok(ExitReason::Drained);
                }
            }
        }
    }

    fn wait_budget(&self, deadline: Option<Instant>) -> Result<Duration, QlbError> {
        let poll = self.config.poll_duration();
        match deadline {
            None => Ok(poll),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(timeout_error(self.in_flight.len()));
                }
                Ok(poll.min(deadline - now))
            }
        }
    }

    fn collect(
        &mut self,
        outcome: DispatchOutcome<S::Output>,
        summary: &mut ExecuteSummary,
    ) -> Result<(), QlbError> {
        let Some(flight) = self.in_flight.remove(&outcome.id) else {
            warn!(dispatch = outcome.id, "discarding result of an unknown dispatch");
            return Ok(());
        };
        let Some(job) = self.jobs.get_mut_by_hash(&flight.hash) else {
            return Err(QlbError::Lookup(
                ErrorInfo::new("executor.missing_job", "dispatch refers to an unknown job")
                    .with_context("hash", flight.hash),
            ));
        };
        job.pending_shots = job.pending_shots.saturating_sub(flight.shots);
        match outcome.result {
            Ok((shots, result)) => {
                job.record_dispatch(shots, result, outcome.duration);
                summary.completed += 1;
                debug!(
                    job = %job.parameters().short_hash(),
                    shots,
                    duration = outcome.duration,
                    finished = job.finished_shots(),
                    "collected dispatch"
                );
            }
            Err(trace) => {
                let now = Utc::now().to_rfc3339();
                let first_line = trace.lines().next().unwrap_or_default().to_string();
                let latest = format!("{now} dispatch of {} shots failed: {first_line}", flight.shots);
                let record = format!(
                    "[{now}] {} failed after {} finished shots ({:.3}s accumulated) while sampling {} shots:\n{trace}",
                    job.parameters(),
                    job.finished_shots(),
                    job.duration(),
                    flight.shots,
                );
                let parameters = job.parameters().clone();
                summary.failed += 1;
                info!(job = %parameters.short_hash(), shots = flight.shots, "dispatch failed, job marked as panicked");
                self.panics
                    .add_panic(JobPanic::new(parameters, latest).with_panic(record))?;
                self.drop_quota(&flight.hash);
            }
        }
        Ok(())
    }

    fn drop_quota(&mut self, hash: &str) {
        if let Some(quota) = self.pending_submit.shift_remove(hash) {
            if let Some(job) = self.jobs.get_mut_by_hash(hash) {
                job.pending_shots = job.pending_shots.saturating_sub(quota.shots);
            }
        }
    }

    fn run_submitter(
        &mut self,
        submitter: &mut dyn Submitter<S::Output>,
        summary: &mut ExecuteSummary,
    ) -> Result<(), QlbError> {
        let mut rounds = 0;
        loop {
            rounds += 1;
            let submissions = submitter.submit(&mut self.jobs)?;
            let created = self.jobs.take_created();
            self.hydrate(&created)?;
            let mut proposed = false;
            for submission in submissions {
                if submission.shots == 0 || self.panics.contains_hash(&submission.hash) {
                    continue;
                }
                let Some(job) = self.jobs.get_mut_by_hash(&submission.hash) else {
                    return Err(QlbError::Lookup(
                        ErrorInfo::new("executor.unknown_submission", "submitter proposed an unregistered job")
                            .with_context("hash", submission.hash),
                    ));
                };
                job.pending_shots += submission.shots;
                self.pending_submit
                    .entry(submission.hash)
                    .or_insert(Quota { shots: 0, gate: None })
                    .shots += submission.shots;
                proposed = true;
            }
            debug!(round = rounds, proposed, created = created.len(), "submitter round");
            if !self.config.iterative_submitter || (!proposed && created.is_empty()) {
                return Ok(());
            }
            if rounds >= self.config.max_submitter_iterations {
                warn!(
                    rounds,
                    "submitter still proposing work after the iteration cap, continuing with the current proposals"
                );
                summary.submitter_capped = true;
                return Ok(());
            }
        }
    }

    fn has_quota(&self) -> bool {
        self.pending_submit
            .keys()
            .any(|hash| !self.panics.contains_hash(hash))
    }

    fn dispatch_ready(
        &mut self,
        pool: &dyn WorkerPool,
        sender: &Sender<DispatchOutcome<S::Output>>,
        summary: &mut ExecuteSummary,
    ) -> Result<(), QlbError> {
        let queued: Vec<String> = self.pending_submit.keys().cloned().collect();
        for hash in queued {
            if self.in_flight.len() >= self.config.max_in_flight {
                break;
            }
            if self.panics.contains_hash(&hash) {
                self.drop_quota(&hash);
                continue;
            }
            let Some(quota) = self.pending_submit.get(&hash).copied() else {
                continue;
            };
            if quota.gate.is_some_and(|gate| self.in_flight.contains_key(&gate)) {
                continue;
            }
            self.pending_submit.shift_remove(&hash);
            let Some(job) = self.jobs.get_by_hash(&hash) else {
                continue;
            };
            let parameters = job.parameters().clone();
            let (per_dispatch, count) = self.config.warmed_up_split(job, quota.shots);
            let mut remaining = quota.shots;
            let mut last = None;
            for _ in 0..count {
                if remaining == 0 || self.in_flight.len() >= self.config.max_in_flight {
                    break;
                }
                let shots = per_dispatch.min(remaining).max(1);
                last = Some(self.spawn(pool, sender, &hash, &parameters, shots));
                remaining -= shots;
                summary.dispatched += 1;
            }
            if remaining > 0 {
                self.pending_submit.insert(
                    hash,
                    Quota {
                        shots: remaining,
                        gate: last,
                    },
                );
            }
        }
        Ok(())
    }

    fn spawn(
        &mut self,
        pool: &dyn WorkerPool,
        sender: &Sender<DispatchOutcome<S::Output>>,
        hash: &str,
        parameters: &JobParameters,
        shots: u64,
    ) -> u64 {
        let id = self.next_dispatch;
        self.next_dispatch += 1;
        let cancel = Arc::new(AtomicBool::new(false));
        self.in_flight.insert(
            id,
            InFlight {
                hash: hash.to_string(),
                shots,
                cancel: Arc::clone(&cancel),
            },
        );
        debug!(job = %parameters.short_hash(), dispatch = id, shots, "dispatching");
        pool.spawn(dispatch_task(
            Arc::clone(&self.sampler),
            id,
            shots,
            parameters.clone(),
            cancel,
            sender.clone(),
        ));
        id
    }

    fn cancel_all(&mut self) -> usize {
        let cancelled = self.in_flight.len();
        for flight in self.in_flight.values() {
            flight.cancel.store(true, Ordering::Release);
        }
        if cancelled > 0 {
            warn!(cancelled, "cancelling dispatches still in flight, their results will be discarded");
        }
        self.in_flight.clear();
        self.pending_submit.clear();
        for job in self.jobs.iter_mut() {
            job.pending_shots = 0;
        }
        cancelled
    }
}

fn timeout_error(in_flight: usize) -> QlbError {
    QlbError::Timeout(
        ErrorInfo::new("executor.timeout", "execution deadline elapsed")
            .with_context("in_flight", in_flight.to_string()),
    )
}
