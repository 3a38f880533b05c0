use std::fs;
use std::path::Path;

use qlb_core::QlbError;
use qlb_hpc::submitter::MinShotsSubmitter;
use qlb_hpc::{
    from_fn, ExecuteOptions, ExitReason, InlinePool, JobParameters, LogicalErrorResult,
    MonteCarloExecutorConfig, MonteCarloJob, MonteCarloJobExecutor, Sampler,
};
use serde_json::{json, Value};
use tempfile::tempdir;

fn sampler() -> impl Sampler<Output = LogicalErrorResult> {
    from_fn(|shots, parameters| {
        let d = parameters.get_u64("d").unwrap_or(1);
        Ok((
            shots,
            LogicalErrorResult {
                errors: shots / (10 * d),
                discards: shots / 100,
                panics: 0,
                elapsed: shots as f64 * 1e-6,
            },
        ))
    })
}

fn jobs() -> Vec<MonteCarloJob<LogicalErrorResult>> {
    [3, 5]
        .into_iter()
        .map(|d| MonteCarloJob::new(JobParameters::from_kwargs([("d", json!(d)), ("p", json!(0.001))])))
        .collect()
}

fn executor(state: &Path) -> MonteCarloJobExecutor<impl Sampler<Output = LogicalErrorResult>> {
    MonteCarloJobExecutor::new(
        sampler(),
        jobs(),
        MonteCarloExecutorConfig::default(),
        Some(state.to_path_buf()),
        None,
    )
    .unwrap()
}

fn run(executor: &mut MonteCarloJobExecutor<impl Sampler<Output = LogicalErrorResult>>, shots: u64) -> qlb_hpc::ExecuteSummary {
    executor
        .execute(
            &mut MinShotsSubmitter::new(shots),
            Some(&InlinePool),
            &ExecuteOptions::default(),
            |_| {},
        )
        .unwrap()
}

#[test]
fn reload_restores_identical_tallies() {
    let dir = tempdir().unwrap();
    let state = dir.path().join("state.json");
    let mut first = executor(&state);
    run(&mut first, 2000);
    let snapshot: Vec<_> = first
        .iter()
        .map(|job| (job.finished_shots(), job.duration(), job.result().cloned(), job.min_time()))
        .collect();
    drop(first);

    let second = executor(&state);
    let reloaded: Vec<_> = second
        .iter()
        .map(|job| (job.finished_shots(), job.duration(), job.result().cloned(), job.min_time()))
        .collect();
    assert_eq!(snapshot, reloaded);
    assert!(second.iter().all(|job| job.finished_shots() == 2000));
}

#[test]
fn resumed_run_only_samples_the_difference() {
    let dir = tempdir().unwrap();
    let state = dir.path().join("state.json");
    let mut first = executor(&state);
    run(&mut first, 1000);
    drop(first);

    let mut second = executor(&state);
    let idle = run(&mut second, 1000);
    assert_eq!(idle.dispatched, 0);
    assert_eq!(idle.exit, ExitReason::Drained);

    let grown = run(&mut second, 3000);
    assert!(grown.dispatched > 0);
    for job in second.iter() {
        assert_eq!(job.finished_shots(), 3000);
        assert_eq!(job.result().unwrap().discards, job.stats().discards);
    }
}

#[test]
fn executors_sharing_a_file_keep_each_others_entries() {
    let dir = tempdir().unwrap();
    let state = dir.path().join("shared.json");
    let [a, b]: [MonteCarloJob<LogicalErrorResult>; 2] = jobs().try_into().unwrap();
    let mut first = MonteCarloJobExecutor::new(
        sampler(),
        [a],
        MonteCarloExecutorConfig::default(),
        Some(state.clone()),
        None,
    )
    .unwrap();
    let mut second = MonteCarloJobExecutor::new(
        sampler(),
        [b],
        MonteCarloExecutorConfig::default(),
        Some(state.clone()),
        None,
    )
    .unwrap();
    run(&mut first, 500);
    run(&mut second, 700);

    let stored: Value = serde_json::from_slice(&fs::read(&state).unwrap()).unwrap();
    let shots: Vec<u64> = stored
        .as_object()
        .unwrap()
        .values()
        .map(|entry| entry["shots"].as_u64().unwrap())
        .collect();
    assert_eq!(shots.len(), 2);
    assert!(shots.contains(&500) && shots.contains(&700));

    let both = executor(&state);
    let mut finished: Vec<u64> = both.iter().map(|job| job.finished_shots()).collect();
    finished.sort_unstable();
    assert_eq!(finished, vec![500, 700]);
}

#[test]
fn stored_parameter_mismatch_is_fatal() {
    let dir = tempdir().unwrap();
    let state = dir.path().join("state.json");
    let mut first = executor(&state);
    run(&mut first, 100);
    drop(first);

    let mut stored: Value = serde_json::from_slice(&fs::read(&state).unwrap()).unwrap();
    for entry in stored.as_object_mut().unwrap().values_mut() {
        entry["kwargs"]["p"] = json!("0.5");
    }
    fs::write(&state, serde_json::to_vec_pretty(&stored).unwrap()).unwrap();

    let err = MonteCarloJobExecutor::new(
        sampler(),
        jobs(),
        MonteCarloExecutorConfig::default(),
        Some(state.clone()),
        None,
    )
    .err()
    .unwrap();
    assert!(matches!(err, QlbError::HashConflict(_)));
    assert_eq!(err.info().code, "store.hash_conflict");
}

#[test]
fn duplicate_jobs_are_rejected() {
    let dir = tempdir().unwrap();
    let state = dir.path().join("state.json");
    let mut duplicated = jobs();
    duplicated.push(duplicated[0].clone());
    let err = MonteCarloJobExecutor::new(
        sampler(),
        duplicated,
        MonteCarloExecutorConfig::default(),
        Some(state.clone()),
        None,
    )
    .err()
    .unwrap();
    assert!(matches!(err, QlbError::DuplicateJob(_)));

    let mut executor = executor(&state);
    let again = jobs().remove(0);
    assert!(matches!(
        executor.add_job(again.clone(), true, false),
        Err(QlbError::DuplicateJob(_))
    ));
    executor.add_job(again, true, true).unwrap();
    assert_eq!(executor.len(), 2);
}

#[test]
fn added_jobs_are_hydrated_from_the_file() {
    let dir = tempdir().unwrap();
    let state = dir.path().join("state.json");
    let mut first = executor(&state);
    run(&mut first, 400);
    drop(first);

    let mut late = MonteCarloJobExecutor::new(
        sampler(),
        Vec::new(),
        MonteCarloExecutorConfig::default(),
        Some(state.clone()),
        None,
    )
    .unwrap();
    let parameters = JobParameters::from_kwargs([("d", json!(5)), ("p", json!(0.001))]);
    late.add_job(MonteCarloJob::new(parameters.clone()), true, false)
        .unwrap();
    assert_eq!(late.get_job_assert(&parameters).unwrap().finished_shots(), 400);

    let fresh = JobParameters::from_kwargs([("d", json!(7)), ("p", json!(0.001))]);
    late.add_job(MonteCarloJob::new(fresh.clone()), false, false)
        .unwrap();
    assert_eq!(late.get_job_assert(&fresh).unwrap().finished_shots(), 0);
    assert!(matches!(
        late.get_job_assert(&JobParameters::default()),
        Err(QlbError::Lookup(_))
    ));
}
