//! `qlb-sim clear-panics`: re-enables failed jobs.

use std::path::PathBuf;

use clap::Args;
use qlb_core::errors::QlbError;
use qlb_hpc::Sampler;
use tracing::info;

use crate::plan::Plan;
use crate::samplers::BuiltinSampler;

/// Arguments of `qlb-sim clear-panics`.
#[derive(Args, Debug, Clone)]
pub struct ClearPanicsArgs {
    /// YAML plan whose jobs are re-enabled.
    #[arg(long)]
    pub plan: PathBuf,
}

/// Removes the panic entries of every job in the plan, returning how many
/// were cleared. Entries of jobs outside the plan are kept.
pub fn run(args: &ClearPanicsArgs) -> Result<usize, QlbError> {
    let (plan, sampler) = super::load(&args.plan)?;
    match sampler {
        BuiltinSampler::Bernoulli(sampler) => clear(sampler, &plan),
        BuiltinSampler::MultiDecoder(sampler) => clear(sampler, &plan),
    }
}

fn clear<S: Sampler>(sampler: S, plan: &Plan) -> Result<usize, QlbError> {
    let mut executor = plan.executor(sampler)?;
    let mut cleared = 0;
    for parameters in &plan.jobs {
        if let Some(entry) = executor.clear_panic(parameters)? {
            info!(job = %parameters.short_hash(), latest = %entry.latest, "cleared panic");
            cleared += 1;
        }
    }
    Ok(cleared)
}
