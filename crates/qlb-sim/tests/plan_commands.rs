use std::fs;
use std::path::{Path, PathBuf};

use qlb_hpc::progress::JobStatus;
use qlb_hpc::ExitReason;
use qlb_sim::commands::clear_panics::{self, ClearPanicsArgs};
use qlb_sim::commands::run::{self, RunArgs};
use qlb_sim::commands::status::{self, StatusArgs};
use tempfile::tempdir;

fn write_plan(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("plan.yaml");
    fs::write(&path, body).unwrap();
    path
}

fn run_args(plan: &Path) -> RunArgs {
    RunArgs {
        plan: plan.to_path_buf(),
        threads: Some(2),
        timeout: Some(60.0),
        force_finished: false,
    }
}

const BERNOULLI: &str = r#"
sampler:
  name: bernoulli
  options: {seed: 7, discard_rate: 0.01}
submitter: {kind: min-shots, shots: [2000]}
executor: {poll_interval: 0.05}
jobs:
  - kwargs: {d: 3, p: 0.01}
  - kwargs: {d: 5, p: 0.02}
state_file: state/plan.json
"#;

#[test]
fn run_then_status_reports_the_same_progress() {
    let dir = tempdir().unwrap();
    let plan = write_plan(dir.path(), BERNOULLI);

    let outcome = run::run(&run_args(&plan)).unwrap();
    assert_eq!(outcome.summary.exit, ExitReason::Drained);
    assert_eq!(outcome.summary.failed, 0);
    assert!(outcome.report.rows.iter().all(|row| row.finished == 2000));
    assert!(dir.path().join("state/plan.json").exists());

    let report = status::run(&StatusArgs { plan: plan.clone() }).unwrap();
    assert_eq!(report.count(JobStatus::Finished), 2);
    let finished: Vec<u64> = report.rows.iter().map(|row| row.finished).collect();
    assert_eq!(finished, vec![2000, 2000]);
    let errors = report.rows[0].errors.as_ref().unwrap();
    assert!(errors.discards > 0);

    let again = run::run(&run_args(&plan)).unwrap();
    assert_eq!(again.summary.dispatched, 0);
}

#[test]
fn force_finished_runs_do_not_sample() {
    let dir = tempdir().unwrap();
    let plan = write_plan(dir.path(), BERNOULLI);
    let outcome = run::run(&RunArgs {
        force_finished: true,
        ..run_args(&plan)
    })
    .unwrap();
    assert_eq!(outcome.summary.exit, ExitReason::ForceFinished);
    assert_eq!(outcome.summary.dispatched, 0);
    assert!(outcome.report.rows.iter().all(|row| row.finished == 0));
}

#[test]
fn failing_jobs_are_reported_until_cleared() {
    let dir = tempdir().unwrap();
    let plan = write_plan(
        dir.path(),
        r#"
sampler:
  name: multi-decoder
  options: {seed: 3}
submitter: {kind: min-shots, shots: [300]}
executor: {poll_interval: 0.05}
jobs:
  - kwargs: {d: 3, p: 0.05}
  - kwargs: {d: 3, p: 2.0}
state_file: state.json
panic_file: panics.yaml
"#,
    );

    let outcome = run::run(&run_args(&plan)).unwrap();
    assert_eq!(outcome.summary.failed, 1);
    assert_eq!(outcome.report.count(JobStatus::Panicked), 1);
    assert!(dir.path().join("panics.yaml").exists());

    let report = status::run(&StatusArgs { plan: plan.clone() }).unwrap();
    assert_eq!(report.count(JobStatus::Panicked), 1);
    assert_eq!(report.rows[0].status, JobStatus::Panicked);

    let cleared = clear_panics::run(&ClearPanicsArgs { plan: plan.clone() }).unwrap();
    assert_eq!(cleared, 1);
    let report = status::run(&StatusArgs { plan: plan.clone() }).unwrap();
    assert_eq!(report.count(JobStatus::Panicked), 0);
    assert_eq!(clear_panics::run(&ClearPanicsArgs { plan }).unwrap(), 0);
}

#[test]
fn unknown_samplers_are_rejected_before_running() {
    let dir = tempdir().unwrap();
    let plan = write_plan(
        dir.path(),
        "sampler: {name: stim}\njobs: [{kwargs: {p: 0.1}}]\nstate_file: state.json\n",
    );
    let err = run::run(&run_args(&plan)).unwrap_err();
    assert_eq!(err.info().code, "registry.unknown");
    assert!(err.info().hint.as_deref().unwrap().contains("bernoulli"));
    assert!(!dir.path().join("state.json").exists());
}
