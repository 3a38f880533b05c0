#![warn(missing_docs)]
#![doc = "Plan-driven runner for QEC Monte Carlo benchmarks built on `qlb-hpc`."]

pub mod commands;
pub mod plan;
pub mod samplers;

pub use plan::{Plan, SamplerPlan, SubmitterPlan};
pub use samplers::{builtin_samplers, BuiltinSampler};
