//! `qlb-sim run`: executes a plan until its submitter is satisfied.

use std::path::PathBuf;

use clap::Args;
use qlb_core::errors::QlbError;
use qlb_hpc::{
    ErrorStatistics, ExecuteOptions, ExecuteSummary, ProgressReport, RayonPool, Sampler,
    WorkerPool,
};
use tracing::info;

use crate::plan::{seconds, Plan};
use crate::samplers::BuiltinSampler;

/// Arguments of `qlb-sim run`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// YAML plan describing the sampler, submitter and jobs.
    #[arg(long)]
    pub plan: PathBuf,
    /// Worker threads, overriding the plan (0 = one per core).
    #[arg(long)]
    pub threads: Option<usize>,
    /// Scheduling timeout in seconds, overriding the plan.
    #[arg(long)]
    pub timeout: Option<f64>,
    /// Only report persisted progress; do not submit new shots.
    #[arg(long)]
    pub force_finished: bool,
}

/// Outcome of one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Executor summary.
    pub summary: ExecuteSummary,
    /// Progress table after the last loop iteration.
    pub report: ProgressReport,
}

/// Executes the plan until its submitter is satisfied.
pub fn run(args: &RunArgs) -> Result<RunOutcome, QlbError> {
    let (plan, sampler) = super::load(&args.plan)?;
    match sampler {
        BuiltinSampler::Bernoulli(sampler) => execute(sampler, &plan, args),
        BuiltinSampler::MultiDecoder(sampler) => execute(sampler, &plan, args),
    }
}

fn execute<S>(sampler: S, plan: &Plan, args: &RunArgs) -> Result<RunOutcome, QlbError>
where
    S: Sampler,
    S::Output: ErrorStatistics,
{
    let name = sampler.name();
    let mut executor = plan.executor(sampler)?;
    let mut submitter = plan.submitter.build::<S::Output>()?;
    let pool = RayonPool::new(args.threads.unwrap_or(plan.threads))?;
    let timeout = match args.timeout {
        Some(value) => Some(seconds(value)?),
        None => plan.timeout_duration()?,
    };
    let options = ExecuteOptions {
        timeout,
        force_finished: args.force_finished,
    };
    info!(
        sampler = %name,
        jobs = executor.len(),
        threads = pool.parallelism(),
        "running plan"
    );
    let summary = executor.execute(submitter.as_mut(), Some(&pool), &options, |executor| {
        info!("progress\n{}", ProgressReport::of(executor));
    })?;
    info!(
        exit = ?summary.exit,
        iterations = summary.iterations,
        dispatched = summary.dispatched,
        failed = summary.failed,
        "plan finished"
    );
    Ok(RunOutcome {
        summary,
        report: ProgressReport::of(&executor),
    })
}
