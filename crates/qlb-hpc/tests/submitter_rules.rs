use std::sync::{Arc, Mutex};

use qlb_hpc::progress::JobStatus;
use qlb_hpc::submitter::{Barrier, MinShotsSubmitter, PrecisionSubmitter};
use qlb_hpc::{
    from_fn, ExecuteOptions, InlinePool, JobParameters, JobTable, LogicalErrorResult,
    MonteCarloExecutorConfig, MonteCarloJob, MonteCarloJobExecutor, ProgressReport, SampleError,
    Submission, Submitter,
};
use serde_json::json;
use tempfile::tempdir;

fn parameters(p: f64) -> JobParameters {
    JobParameters::from_kwargs([("d", json!(3)), ("p", json!(p))])
}

fn measured(p: f64, shots: u64, errors: u64, duration: f64) -> MonteCarloJob<LogicalErrorResult> {
    MonteCarloJob::restored(
        parameters(p),
        shots,
        duration,
        Some(LogicalErrorResult::with_errors(errors)),
        Some(duration / shots as f64),
    )
}

fn table(jobs: Vec<MonteCarloJob<LogicalErrorResult>>) -> JobTable<LogicalErrorResult> {
    let mut table = JobTable::new();
    for job in jobs {
        table.add_job(job).unwrap();
    }
    table
}

#[test]
fn precision_waits_for_trusted_error_counts() {
    let mut jobs = table(vec![
        MonteCarloJob::new(parameters(0.001)),
        measured(0.002, 100, 0, 1.0),
        measured(0.003, 100, 26, 1.0),
    ]);
    let proposed = PrecisionSubmitter::default().submit(&mut jobs).unwrap();
    assert!(proposed.is_empty());
}

#[test]
fn precision_extrapolates_from_the_observed_rate() {
    let mut jobs = table(vec![measured(0.01, 100, 50, 1.0)]);
    let mut submitter = PrecisionSubmitter {
        target_precision: 0.1,
        ..PrecisionSubmitter::default()
    };
    let proposed = submitter.submit(&mut jobs).unwrap();
    assert_eq!(proposed, vec![Submission::new(jobs.get(&parameters(0.01)).unwrap(), 1232)]);
}

#[test]
fn high_failure_rates_relax_the_target() {
    let mut jobs = table(vec![measured(0.01, 100, 50, 1.0)]);
    let mut submitter = PrecisionSubmitter {
        target_precision: 0.1,
        min_shots: 10,
        high_rate_threshold: Some(0.3),
        ..PrecisionSubmitter::default()
    };
    let proposed = submitter.submit(&mut jobs).unwrap();
    assert_eq!(proposed.len(), 1);
    assert_eq!(proposed[0].shots, 48);
}

#[test]
fn precision_respects_the_time_limit() {
    let mut jobs = table(vec![measured(0.01, 100, 50, 3000.0), measured(0.02, 100, 50, 3600.0)]);
    let mut submitter = PrecisionSubmitter {
        target_precision: 0.1,
        min_shots: 1,
        ..PrecisionSubmitter::default()
    };
    let proposed = submitter.submit(&mut jobs).unwrap();
    assert_eq!(proposed.len(), 1);
    assert_eq!(proposed[0].hash, parameters(0.01).hash());
    assert_eq!(proposed[0].shots, 20);
}

#[test]
fn min_shots_cycles_targets_by_index() {
    let mut jobs = table(vec![
        MonteCarloJob::new(parameters(0.01)),
        MonteCarloJob::new(parameters(0.02)),
        measured(0.03, 50, 1, 1.0),
    ]);
    let mut submitter = MinShotsSubmitter::cycle(vec![100, 300]).unwrap();
    let shots: Vec<u64> = submitter
        .submit(&mut jobs)
        .unwrap()
        .into_iter()
        .map(|submission| submission.shots)
        .collect();
    assert_eq!(shots, vec![100, 300, 50]);
    assert!(MinShotsSubmitter::cycle(Vec::new()).is_err());
}

fn recording_executor(
    calls: Arc<Mutex<Vec<u64>>>,
    jobs: Vec<MonteCarloJob<LogicalErrorResult>>,
    panic_file: std::path::PathBuf,
) -> MonteCarloJobExecutor<impl qlb_hpc::Sampler<Output = LogicalErrorResult>> {
    let sampler = from_fn(move |shots, parameters| {
        if parameters.get_f64("p") == Some(0.5) {
            return Err(SampleError::from("syndrome extraction failed"));
        }
        calls.lock().unwrap().push(shots);
        Ok((shots, LogicalErrorResult::with_errors(shots / 20)))
    });
    MonteCarloJobExecutor::new(sampler, jobs, MonteCarloExecutorConfig::default(), None, Some(panic_file))
        .unwrap()
}

#[test]
fn barrier_drains_the_first_phase_before_the_second() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut executor = recording_executor(
        Arc::clone(&calls),
        vec![MonteCarloJob::new(parameters(0.01))],
        dir.path().join("panic.yaml"),
    );
    let mut barrier = Barrier::new(MinShotsSubmitter::new(100), MinShotsSubmitter::new(300));
    executor
        .execute(&mut barrier, Some(&InlinePool), &ExecuteOptions::default(), |_| {})
        .unwrap();
    assert!(barrier.is_open());
    assert_eq!(*calls.lock().unwrap(), vec![1, 99, 200]);
    assert_eq!(executor.get_job(&parameters(0.01)).unwrap().finished_shots(), 300);
}

#[test]
fn closure_submitters_can_create_jobs() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut executor = recording_executor(
        Arc::clone(&calls),
        vec![MonteCarloJob::new(parameters(0.01))],
        dir.path().join("panic.yaml"),
    );
    let extra = parameters(0.02);
    let mut submitter = |jobs: &mut JobTable<LogicalErrorResult>| {
        jobs.ensure_job(extra.clone()).unwrap();
        jobs.iter()
            .filter(|job| job.expecting_shots() == 0)
            .map(|job| Submission::new(job, 10))
            .collect::<Vec<_>>()
    };
    let summary = executor
        .execute(&mut submitter, Some(&InlinePool), &ExecuteOptions::default(), |_| {})
        .unwrap();
    assert_eq!(executor.len(), 2);
    assert!(executor.iter().all(|job| job.finished_shots() == 10));
    assert_eq!(summary.dispatched, 4);
    assert!(!summary.submitter_capped);
}

#[test]
fn endlessly_creating_submitters_hit_the_iteration_cap() {
    let dir = tempdir().unwrap();
    let sampler = from_fn(|shots, _| Ok((shots, LogicalErrorResult::with_errors(0))));
    let config = MonteCarloExecutorConfig {
        max_submitter_iterations: 5,
        ..MonteCarloExecutorConfig::default()
    };
    let mut executor = MonteCarloJobExecutor::new(
        sampler,
        [MonteCarloJob::new(parameters(0.01))],
        config,
        None,
        Some(dir.path().join("panic.yaml")),
    )
    .unwrap();
    let mut round = 0;
    let mut submitter = |jobs: &mut JobTable<LogicalErrorResult>| {
        round += 1;
        let sibling = JobParameters::from_kwargs([("d", json!(3)), ("round", json!(round))]);
        jobs.ensure_job(sibling).unwrap();
        Vec::<Submission>::new()
    };
    let summary = executor
        .execute(&mut submitter, Some(&InlinePool), &ExecuteOptions::default(), |_| {})
        .unwrap();
    assert!(summary.submitter_capped);
    assert_eq!(summary.iterations, 1);
    assert_eq!(summary.dispatched, 0);
    assert_eq!(executor.len(), 6);
}

#[test]
fn progress_report_orders_pending_panicked_finished() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let healthy = parameters(0.01);
    let broken = parameters(0.5);
    let idle = parameters(0.02);
    let mut executor = recording_executor(
        calls,
        vec![
            MonteCarloJob::new(idle.clone()),
            MonteCarloJob::new(healthy.clone()),
            MonteCarloJob::new(broken.clone()),
        ],
        dir.path().join("panic.yaml"),
    );
    let mut reports = Vec::new();
    executor
        .execute(
            &mut MinShotsSubmitter::cycle(vec![0, 100, 100]).unwrap(),
            Some(&InlinePool),
            &ExecuteOptions::default(),
            |executor| reports.push(ProgressReport::of(executor)),
        )
        .unwrap();

    let first = &reports[0];
    assert_eq!(first.count(JobStatus::Pending), 2);
    assert_eq!(first.count(JobStatus::Finished), 1);
    assert_eq!(first.in_flight, 2);

    let second = &reports[1];
    let statuses: Vec<_> = second.rows.iter().map(|row| (row.status, row.job.clone())).collect();
    assert_eq!(
        statuses,
        vec![
            (JobStatus::Pending, healthy.to_string()),
            (JobStatus::Panicked, broken.to_string()),
            (JobStatus::Finished, idle.to_string()),
        ]
    );
    assert!(second.rows[1].errors.is_none());

    let last = ProgressReport::of(&executor);
    assert_eq!(last.count(JobStatus::Pending), 0);
    assert_eq!(last.rows[0].status, JobStatus::Panicked);
    assert_eq!(last.rows[1].job, healthy.to_string());
    assert_eq!(last.rows[1].errors.as_ref().unwrap().errors, 4);
    let rendered = last.to_string();
    assert!(rendered.lines().next().unwrap().starts_with("Status"));
    assert!(rendered.contains("panicked"));
    assert!(rendered.contains("100 (100%)"));
}
