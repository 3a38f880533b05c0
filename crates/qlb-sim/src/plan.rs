//! YAML experiment plans consumed by the runner.

use std::path::{Path, PathBuf};
use std::time::Duration;

use qlb_core::errors::{ErrorInfo, QlbError};
use qlb_core::serde::from_yaml_slice;
use qlb_hpc::registry::Options;
use qlb_hpc::submitter::{
    AdaptiveMinShotsSubmitter, Barrier, MinShotsSubmitter, PrecisionSubmitter,
};
use qlb_hpc::{
    ErrorStatistics, JobParameters, JobTable, MonteCarloExecutorConfig, MonteCarloJob,
    MonteCarloJobExecutor, MonteCarloResult, Sampler, Submission, Submitter,
};
use serde::{Deserialize, Serialize};

/// Sampler name and the options handed to its constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerPlan {
    /// Registered sampler name.
    pub name: String,
    /// Constructor options.
    #[serde(default)]
    pub options: Options,
}

/// Submitter selection, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SubmitterPlan {
    /// [`MinShotsSubmitter`].
    MinShots(MinShotsSubmitter),
    /// [`AdaptiveMinShotsSubmitter`].
    AdaptiveMinShots(AdaptiveMinShotsSubmitter),
    /// [`PrecisionSubmitter`].
    Precision(PrecisionSubmitter),
    /// Drains `previous` before handing over to `next`.
    Barrier {
        /// First phase.
        previous: Box<SubmitterPlan>,
        /// Second phase.
        next: Box<SubmitterPlan>,
    },
}

impl Default for SubmitterPlan {
    fn default() -> Self {
        SubmitterPlan::MinShots(MinShotsSubmitter::default())
    }
}

impl SubmitterPlan {
    /// Builds the configured submitter for results of type `R`.
    pub fn build<R>(&self) -> Result<Box<dyn Submitter<R>>, QlbError>
    where
        R: MonteCarloResult + ErrorStatistics,
    {
        Ok(match self {
            SubmitterPlan::MinShots(submitter) => {
                Box::new(MinShotsSubmitter::cycle(submitter.shots.clone())?)
            }
            SubmitterPlan::AdaptiveMinShots(submitter) => Box::new(submitter.clone()),
            SubmitterPlan::Precision(submitter) => Box::new(submitter.clone()),
            SubmitterPlan::Barrier { previous, next } => Box::new(Barrier::new(
                Phase(previous.build::<R>()?),
                Phase(next.build::<R>()?),
            )),
        })
    }
}

struct Phase<R>(Box<dyn Submitter<R>>);

impl<R: MonteCarloResult> Submitter<R> for Phase<R> {
    fn submit(&mut self, jobs: &mut JobTable<R>) -> Result<Vec<Submission>, QlbError> {
        self.0.submit(jobs)
    }
}

/// One benchmark plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Sampler to resolve from the registry.
    pub sampler: SamplerPlan,
    /// How shots are requested.
    #[serde(default)]
    pub submitter: SubmitterPlan,
    /// Executor tuning.
    #[serde(default)]
    pub executor: MonteCarloExecutorConfig,
    /// Declared jobs.
    pub jobs: Vec<JobParameters>,
    /// Job-state file, relative to the plan file.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    /// Panic file, relative to the plan file.
    #[serde(default)]
    pub panic_file: Option<PathBuf>,
    /// Worker threads; 0 uses one per core.
    #[serde(default)]
    pub threads: usize,
    /// Scheduling timeout in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl Plan {
    /// Reads a plan and resolves its file paths against the plan's directory.
    pub fn load(path: &Path) -> Result<Self, QlbError> {
        let bytes = std::fs::read(path).map_err(|err| QlbError::io("plan.read", path, err))?;
        let mut plan: Plan = from_yaml_slice(&bytes)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        plan.state_file = plan.state_file.map(|file| base.join(file));
        plan.panic_file = plan.panic_file.map(|file| base.join(file));
        plan.validate()?;
        Ok(plan)
    }

    /// Checks the plan before any file is touched.
    pub fn validate(&self) -> Result<(), QlbError> {
        if self.jobs.is_empty() {
            return Err(QlbError::Config(ErrorInfo::new(
                "plan.no_jobs",
                "a plan must declare at least one job",
            )));
        }
        self.timeout_duration()?;
        self.executor.validate()
    }

    /// Timeout as a [`Duration`].
    pub fn timeout_duration(&self) -> Result<Option<Duration>, QlbError> {
        self.timeout.map(seconds).transpose()
    }

    /// Executor over the plan's jobs, hydrated from its state and panic files.
    pub fn executor<S: Sampler>(&self, sampler: S) -> Result<MonteCarloJobExecutor<S>, QlbError> {
        MonteCarloJobExecutor::new(
            sampler,
            self.jobs.iter().cloned().map(MonteCarloJob::new),
            self.executor.clone(),
            self.state_file.clone(),
            self.panic_file.clone(),
        )
    }
}

/// Parses a non-negative number of seconds.
pub fn seconds(value: f64) -> Result<Duration, QlbError> {
    Duration::try_from_secs_f64(value).map_err(|err| {
        QlbError::Config(
            ErrorInfo::new("plan.invalid_timeout", err.to_string())
                .with_context("timeout", value.to_string()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
sampler:
  name: bernoulli
  options: {scale: 0.5}
submitter:
  kind: precision
  target_precision: 0.1
executor:
  max_job_time: 120
jobs:
  - kwargs: {d: 3, p: 0.01}
  - kwargs: {d: 5, p: 0.01}
state_file: out/state.json
timeout: 30
"#;

    #[test]
    fn parses_sections_with_defaults() {
        let plan: Plan = from_yaml_slice(PLAN.as_bytes()).unwrap();
        assert_eq!(plan.sampler.name, "bernoulli");
        assert_eq!(plan.jobs.len(), 2);
        assert_eq!(plan.jobs[0].get_u64("d"), Some(3));
        assert_eq!(plan.executor.max_job_time, 120.0);
        assert_eq!(plan.executor.target_job_time, 60.0);
        match &plan.submitter {
            SubmitterPlan::Precision(submitter) => {
                assert_eq!(submitter.target_precision, 0.1);
                assert_eq!(submitter.min_shots, 100);
            }
            other => panic!("unexpected submitter {other:?}"),
        }
        assert_eq!(plan.timeout_duration().unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(plan.threads, 0);
    }

    #[test]
    fn min_shots_is_the_default_submitter() {
        let plan: Plan =
            from_yaml_slice(b"sampler: {name: bernoulli}\njobs: [{kwargs: {p: 0.1}}]\n").unwrap();
        assert_eq!(plan.submitter, SubmitterPlan::MinShots(MinShotsSubmitter::new(1000)));
    }

    #[test]
    fn barrier_plans_nest() {
        let plan: Plan = from_yaml_slice(
            br#"
sampler: {name: bernoulli}
submitter:
  kind: barrier
  previous: {kind: min-shots, shots: [500]}
  next: {kind: adaptive-min-shots, max_errors: 50}
jobs: [{kwargs: {p: 0.1}}]
"#,
        )
        .unwrap();
        let SubmitterPlan::Barrier { previous, next } = &plan.submitter else {
            panic!("expected a barrier, got {:?}", plan.submitter);
        };
        assert_eq!(**previous, SubmitterPlan::MinShots(MinShotsSubmitter::new(500)));
        assert!(matches!(**next, SubmitterPlan::AdaptiveMinShots(ref s) if s.max_errors == 50));
        let mut submitter = plan.submitter.build::<qlb_hpc::LogicalErrorResult>().unwrap();
        let mut jobs = JobTable::new();
        jobs.add_job(MonteCarloJob::new(plan.jobs[0].clone())).unwrap();
        let proposed = submitter.submit(&mut jobs).unwrap();
        assert_eq!(proposed.len(), 1);
        assert_eq!(proposed[0].shots, 500);
    }

    #[test]
    fn rejects_empty_job_lists_and_negative_timeouts() {
        let mut plan: Plan = from_yaml_slice(PLAN.as_bytes()).unwrap();
        plan.timeout = Some(-1.0);
        assert_eq!(plan.validate().unwrap_err().info().code, "plan.invalid_timeout");
        plan.timeout = None;
        plan.jobs.clear();
        assert_eq!(plan.validate().unwrap_err().info().code, "plan.no_jobs");
    }
}
