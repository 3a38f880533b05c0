#![warn(missing_docs)]
#![doc = "Monte Carlo job execution and adaptive sampling engine for QEC decoding benchmarks."]

pub mod backend;
/// Executor tuning and the dispatch size heuristic.
pub mod config;
mod dispatch;
pub mod executor;
pub mod job;
pub mod panic_store;
/// Job identity.
pub mod parameters;
pub mod progress;
pub mod registry;
pub mod result;
/// Sampling contract.
pub mod sampler;
pub mod stats;
pub mod store;
pub mod submitter;
pub mod transaction;

pub use backend::{InlinePool, RayonPool, WorkerPool};
pub use config::MonteCarloExecutorConfig;
pub use executor::{ExecuteOptions, ExecuteSummary, ExitReason, MonteCarloJobExecutor};
pub use job::{JobTable, MonteCarloJob};
pub use panic_store::{JobPanic, PanicStore};
pub use parameters::JobParameters;
pub use progress::ProgressReport;
pub use registry::Registry;
pub use result::{ErrorStatistics, LogicalErrorResult, MonteCarloResult};
pub use sampler::{from_fn, SampleError, Sampler};
pub use stats::{precision_to_errors, Stats};
pub use submitter::{Submission, Submitter};
