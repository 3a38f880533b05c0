//! `qlb-sim status`: persisted progress of a plan.

use std::path::PathBuf;

use clap::Args;
use qlb_core::errors::QlbError;
use qlb_hpc::{ErrorStatistics, ProgressReport, Sampler};

use crate::plan::Plan;
use crate::samplers::BuiltinSampler;

/// Arguments of `qlb-sim status`.
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// YAML plan whose state and panic files are inspected.
    #[arg(long)]
    pub plan: PathBuf,
}

/// Progress of the plan's jobs as persisted, without sampling.
pub fn run(args: &StatusArgs) -> Result<ProgressReport, QlbError> {
    let (plan, sampler) = super::load(&args.plan)?;
    match sampler {
        BuiltinSampler::Bernoulli(sampler) => report(sampler, &plan),
        BuiltinSampler::MultiDecoder(sampler) => report(sampler, &plan),
    }
}

fn report<S>(sampler: S, plan: &Plan) -> Result<ProgressReport, QlbError>
where
    S: Sampler,
    S::Output: ErrorStatistics,
{
    let executor = plan.executor(sampler)?;
    Ok(ProgressReport::of(&executor))
}
