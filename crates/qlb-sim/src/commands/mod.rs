//! Subcommand implementations.

pub mod clear_panics;
pub mod run;
pub mod status;

use std::path::Path;

use qlb_core::errors::QlbError;

use crate::plan::Plan;
use crate::samplers::{builtin_samplers, BuiltinSampler};

/// Loads a plan and resolves its sampler through the built-in registry.
pub fn load(path: &Path) -> Result<(Plan, BuiltinSampler), QlbError> {
    let plan = Plan::load(path)?;
    let sampler = builtin_samplers()?.resolve(&plan.sampler.name, &plan.sampler.options)?;
    Ok((plan, sampler))
}
