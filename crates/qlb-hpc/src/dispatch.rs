use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::Sender;

use crate::backend::Task;
use crate::parameters::JobParameters;
use crate::sampler::{SampleError, Sampler};

/// Completion message of one dispatch.
pub(crate) struct DispatchOutcome<R> {
    pub id: u64,
    pub duration: f64,
    pub result: Result<(u64, R), String>,
}

/// Builds the task that runs one dispatch and reports on `sender`.
///
/// A task whose token is already cancelled returns without sampling or
/// reporting. A closed channel is ignored: the executor stopped listening.
pub(crate) fn dispatch_task<S: Sampler>(
    sampler: Arc<S>,
    id: u64,
    shots: u64,
    parameters: JobParameters,
    cancel: Arc<AtomicBool>,
    sender: Sender<DispatchOutcome<S::Output>>,
) -> Task {
    Box::new(move || {
        if cancel.load(Ordering::Acquire) {
            return;
        }
        let started = Instant::now();
        let caught = catch_unwind(AssertUnwindSafe(|| sampler.sample(shots, &parameters)));
        let duration = started.elapsed().as_secs_f64();
        let result = match caught {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(err)) => Err(format_error_chain(err)),
            Err(payload) => Err(format!("sampler panicked: {}", panic_message(payload.as_ref()))),
        };
        if cancel.load(Ordering::Acquire) {
            return;
        }
        let _ = sender.send(DispatchOutcome {
            id,
            duration,
            result,
        });
    })
}

fn format_error_chain(err: SampleError) -> String {
    let mut trace = format!("sampler error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        trace.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    trace
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::LogicalErrorResult;
    use crate::sampler::from_fn;
    use crossbeam::channel::unbounded;

    #[test]
    fn panics_are_reported_as_failures() {
        let sampler = Arc::new(from_fn(|_shots, _| -> Result<(u64, LogicalErrorResult), SampleError> {
            panic!("decoder exploded")
        }));
        let (sender, receiver) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));
        dispatch_task(sampler, 7, 10, JobParameters::default(), cancel, sender)();
        let outcome = receiver.try_recv().unwrap();
        assert_eq!(outcome.id, 7);
        let trace = outcome.result.unwrap_err();
        assert!(trace.contains("decoder exploded"));
    }

    #[test]
    fn cancelled_tasks_do_not_sample() {
        let sampler = Arc::new(from_fn(|shots, _| -> Result<(u64, LogicalErrorResult), SampleError> {
            panic!("must not run {shots}")
        }));
        let (sender, receiver) = unbounded();
        let cancel = Arc::new(AtomicBool::new(true));
        dispatch_task(sampler, 1, 10, JobParameters::default(), cancel, sender)();
        assert!(receiver.try_recv().is_err());
    }
}
