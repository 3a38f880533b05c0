use crate::parameters::JobParameters;
use crate::result::MonteCarloResult;

/// Error returned by a failing sampling call.
pub type SampleError = Box<dyn std::error::Error + Send + Sync>;

/// Opaque sampling function driven by the executor.
///
/// `sample` runs `shots` shots for the job identified by `parameters` and
/// returns the number of shots actually run together with their aggregated
/// result. It is called from worker threads, possibly concurrently for the
/// same job.
pub trait Sampler: Send + Sync + 'static {
    /// Result type produced by every dispatch.
    type Output: MonteCarloResult;

    /// Runs one dispatch.
    fn sample(
        &self,
        shots: u64,
        parameters: &JobParameters,
    ) -> Result<(u64, Self::Output), SampleError>;

    /// Name shown in logs.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Pins the signature of a sampling closure so its argument and error types
/// are inferred.
///
/// ```
/// use qlb_hpc::result::LogicalErrorResult;
/// use qlb_hpc::sampler::{from_fn, Sampler};
/// use qlb_hpc::parameters::JobParameters;
///
/// let sampler = from_fn(|shots, _| Ok((shots, LogicalErrorResult::with_errors(shots / 10))));
/// let (shots, result) = sampler.sample(20, &JobParameters::default()).unwrap();
/// assert_eq!((shots, result.errors), (20, 2));
/// ```
pub fn from_fn<F, R>(f: F) -> F
where
    F: Fn(u64, &JobParameters) -> Result<(u64, R), SampleError> + Send + Sync + 'static,
    R: MonteCarloResult,
{
    f
}

impl<F, R> Sampler for F
where
    F: Fn(u64, &JobParameters) -> Result<(u64, R), SampleError> + Send + Sync + 'static,
    R: MonteCarloResult,
{
    type Output = R;

    fn sample(&self, shots: u64, parameters: &JobParameters) -> Result<(u64, R), SampleError> {
        self(shots, parameters)
    }

    fn name(&self) -> String {
        "closure".to_string()
    }
}
