//! The job runner against real subprocesses: classification, logs, timeouts
//! and cancellation.

#![cfg(unix)]

mod common;

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use verif_matrix::config::BackendConfig;
use verif_matrix::core::aggregate::aggregate;
use verif_matrix::core::context::RunContext;
use verif_matrix::core::execution::{RunOutcome, run_job};
use verif_matrix::core::scheduler::{RetryPolicy, execute};
use verif_matrix::execution::run_scheduled;
use verif_matrix::models::{Backend, JobStatus};

fn context_with(dir: &std::path::Path, command: &str) -> RunContext {
    let commands = BTreeMap::from([(
        Backend::Icarus,
        BackendConfig {
            command: command.to_string(),
        },
    )]);
    RunContext::new(&dir.join("out"), dir.to_path_buf()).with_backend_commands(commands)
}

fn expect_finished(outcome: RunOutcome) -> verif_matrix::models::JobResult {
    match outcome {
        RunOutcome::Finished(result) => result,
        RunOutcome::Cancelled => panic!("job was unexpectedly cancelled"),
    }
}

#[tokio::test]
async fn test_exit_zero_is_a_pass_candidate_with_a_log() {
    let dir = setup_test_environment();
    let ctx = context_with(dir.path(), "sh -c 'echo hello from {name}'");
    let spec = fake_spec("uart", 0);

    let result = expect_finished(run_job(&spec, Duration::from_secs(10), &ctx).await);

    assert_eq!(result.status, JobStatus::Pass);
    assert_eq!(result.exit_code, Some(0));
    let log = fs::read_to_string(&result.log_path).unwrap();
    assert!(log.starts_with("command:"));
    assert!(log.contains("hello from uart"));
    assert!(result.log_path.starts_with(ctx.job_dir(&spec.id)));
}

#[tokio::test]
async fn test_non_zero_exit_is_a_fail_candidate() {
    let dir = setup_test_environment();
    let ctx = context_with(dir.path(), "sh -c 'exit 3'");
    let result = expect_finished(run_job(&fake_spec("uart", 0), Duration::from_secs(10), &ctx).await);
    assert_eq!(result.status, JobStatus::Fail);
    assert_eq!(result.exit_code, Some(3));
}

#[tokio::test]
async fn test_job_environment_is_exported() {
    let dir = setup_test_environment();
    let ctx = context_with(dir.path(), "env").with_seed(Some(7));
    let spec = fake_spec("uart", 5);

    let result = expect_finished(run_job(&spec, Duration::from_secs(10), &ctx).await);
    let log = fs::read_to_string(&result.log_path).unwrap();
    assert!(log.contains("TESTCASE=uart"));
    assert!(log.contains("SIM=icarus"));
    assert!(log.contains("PARAM_SEED=5"));
    assert!(log.contains("RANDOM_SEED=7"));
    assert!(log.contains(&format!("JOB_ID={}", spec.id)));
}

#[tokio::test]
async fn test_missing_executable_is_an_error() {
    let dir = setup_test_environment();
    let ctx = context_with(dir.path(), "definitely-not-a-simulator-binary {name}");
    let result = expect_finished(run_job(&fake_spec("uart", 0), Duration::from_secs(10), &ctx).await);
    assert_eq!(result.status, JobStatus::Error);
    assert!(result.detail.is_some());
    assert!(result.log_path.exists());
}

/// A live process that is not a zombie awaiting its reaper.
fn is_running(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    if kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        Err(_) => true,
    }
}

#[tokio::test]
async fn test_timeout_kills_the_process_tree() {
    let dir = setup_test_environment();
    let ctx = context_with(dir.path(), "sh -c 'sleep 30 & echo $! > grandchild.pid; sleep 30'");
    let start = Instant::now();

    let result = expect_finished(run_job(&fake_spec("hang", 0), Duration::from_millis(500), &ctx).await);

    assert_eq!(result.status, JobStatus::Timeout);
    assert!(start.elapsed() < Duration::from_secs(10));

    let pid: i32 = fs::read_to_string(dir.path().join("grandchild.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while is_running(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!is_running(pid), "background sleep {pid} outlived the timed-out job");
}

#[tokio::test]
async fn test_cancellation_kills_the_running_job() {
    let dir = setup_test_environment();
    let ctx = context_with(dir.path(), "sh -c 'sleep 30'");
    let token = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });
    let start = Instant::now();

    let outcome = run_job(&fake_spec("hang", 0), Duration::from_secs(60), &ctx).await;

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_run_produces_a_passing_verdict() {
    let dir = setup_test_environment();
    let ctx = Arc::new(context_with(dir.path(), "sh -c 'echo TESTS=2 PASS=2 FAIL=0 SKIP=0'"));

    let outcome = execute(fake_specs(4), 2, &RetryPolicy::default(), Arc::clone(&ctx), run_scheduled).await;
    let verdict = aggregate(outcome.results, outcome.cancelled, outcome.not_run, &ctx);

    assert_eq!(verdict.total, 4);
    assert!(verdict.is_pass(), "{verdict:?}");
}
