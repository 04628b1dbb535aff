// Shared test helpers for integration tests
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

use verif_matrix::core::context::RunContext;
use verif_matrix::core::execution::{LOG_FILE, RunOutcome};
use verif_matrix::models::{Backend, JobResult, JobSpec, JobStatus, RuntimeClass};

pub fn setup_test_environment() -> TempDir {
    tempdir().expect("Failed to create temporary directory")
}

/// Writes a matrix file into `dir` and returns its path.
pub fn write_matrix(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("Failed to write matrix file");
    path
}

/// A job that is never actually spawned; the runner is faked in tests.
pub fn fake_spec(test: &str, index: usize) -> JobSpec {
    let parameters = BTreeMap::from([("seed".to_string(), index.to_string())]);
    JobSpec {
        id: JobSpec::derive_id(test, Backend::Icarus, &parameters),
        test: test.to_string(),
        path: PathBuf::from("tb"),
        backend: Backend::Icarus,
        parameters,
        runtime: RuntimeClass::Fast,
        tags: BTreeSet::new(),
        env: BTreeMap::new(),
        timeout: Duration::from_secs(5),
    }
}

pub fn fake_specs(count: usize) -> Vec<JobSpec> {
    (0..count).map(|i| fake_spec("tb", i)).collect()
}

pub fn test_context(dir: &Path) -> Arc<RunContext> {
    Arc::new(RunContext::new(dir, dir.to_path_buf()))
}

/// A finished outcome with the given status and no artifacts.
pub fn finished(spec: &JobSpec, ctx: &RunContext, status: JobStatus) -> RunOutcome {
    let log_path = ctx.job_dir(&spec.id).join(LOG_FILE);
    RunOutcome::Finished(JobResult::new(spec, status, Duration::from_millis(1), log_path))
}

/// A result whose artifacts exist on disk, ready for the aggregator.
pub fn result_with_artifacts(
    ctx: &RunContext,
    spec: &JobSpec,
    status: JobStatus,
    log: &str,
    coverage: Option<&str>,
) -> JobResult {
    let job_dir = ctx.job_dir(&spec.id);
    fs::create_dir_all(&job_dir).expect("Failed to create job directory");
    let log_path = job_dir.join(LOG_FILE);
    fs::write(&log_path, log).expect("Failed to write log");
    let coverage_path = job_dir.join("coverage.json");
    if let Some(coverage) = coverage {
        fs::write(&coverage_path, coverage).expect("Failed to write coverage");
    }
    let mut result = JobResult::new(spec, status, Duration::from_millis(5), log_path);
    result.coverage_path = Some(coverage_path);
    result.exit_code = Some(if status == JobStatus::Pass { 0 } else { 1 });
    result
}

pub const CLEAN_SUMMARY: &str = "** TESTS=1 PASS=1 FAIL=0 SKIP=0 **\n";
