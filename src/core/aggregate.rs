//! # Result Aggregator / 结果聚合器
//!
//! Normalizes every job's raw artifacts through its backend adapter and folds
//! the results into one [`Verdict`]. A broken artifact only ever demotes its
//! own job to `ERROR`.
//!
//! 通过各自的后端适配器规范化每个任务的原始产物，并将结果折叠为一个 [`Verdict`]。
//! 损坏的产物只会把它自己的任务降级为 `ERROR`。

use chrono::Utc;
use std::fs;

use crate::core::adapters::{BackendAdapter, RawArtifact};
use crate::core::context::RunContext;
use crate::core::error::AggregationError;
use crate::core::execution::RESULTS_FILE;
use crate::core::models::{CoverageDb, JobResult, JobStatus, Overall, Verdict};
use crate::infra::command::log_body;

/// Refines one result and extracts its coverage.
///
/// Coverage is only taken from jobs that end up PASS: a failing test bench
/// does not get credit for the conditions it exercised.
pub fn normalize(mut result: JobResult) -> (JobResult, Option<CoverageDb>) {
    match try_normalize(&result) {
        Ok((status, coverage)) => {
            result.status = status;
            (result, coverage)
        }
        Err(e) => {
            tracing::warn!(job = %result.job_id, "demoting to ERROR: {e}");
            result.status = JobStatus::Error;
            result.detail = Some(e.to_string());
            (result, None)
        }
    }
}

fn try_normalize(result: &JobResult) -> Result<(JobStatus, Option<CoverageDb>), AggregationError> {
    if matches!(result.status, JobStatus::Timeout | JobStatus::Error) {
        return Ok((result.status, None));
    }

    let adapter = BackendAdapter::for_backend(result.backend);
    let log = fs::read(&result.log_path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|_| AggregationError::MissingLog(result.log_path.clone()))?;
    let results_xml = result
        .log_path
        .parent()
        .map(|dir| dir.join(RESULTS_FILE))
        .and_then(|path| fs::read_to_string(path).ok());

    let status = adapter.parse(&RawArtifact {
        candidate: result.status,
        exit_code: result.exit_code,
        log: log_body(&log),
        results_xml: results_xml.as_deref(),
    })?;

    if status != JobStatus::Pass {
        return Ok((status, None));
    }

    let coverage = match &result.coverage_path {
        Some(path) if path.is_file() => {
            let content = fs::read_to_string(path).map_err(|e| AggregationError::Coverage {
                path: path.clone(),
                message: e.to_string(),
            })?;
            Some(adapter.parse_coverage(path, &content)?)
        }
        _ => None,
    };
    Ok((status, coverage))
}

/// Builds the verdict for a run.
///
/// `results` must be in submission order; the verdict keeps that order.
/// The overall outcome is PASS only when at least one job ran, every job
/// passed and the run was not cancelled.
pub fn aggregate(results: Vec<JobResult>, cancelled: bool, not_run: usize, ctx: &RunContext) -> Verdict {
    let mut coverage = CoverageDb::default();
    let mut normalized = Vec::with_capacity(results.len());
    for result in results {
        let (result, job_coverage) = normalize(result);
        if let Some(db) = job_coverage {
            coverage.merge(&db);
        }
        normalized.push(result);
    }
    build_verdict(normalized, coverage, cancelled, not_run, ctx)
}

/// Counts statuses and decides the overall outcome. Results are taken as-is.
pub fn build_verdict(
    results: Vec<JobResult>,
    coverage: CoverageDb,
    cancelled: bool,
    not_run: usize,
    ctx: &RunContext,
) -> Verdict {
    let count = |status: JobStatus| results.iter().filter(|r| r.status == status).count();
    let passed = count(JobStatus::Pass);
    let failed = count(JobStatus::Fail);
    let timed_out = count(JobStatus::Timeout);
    let errored = count(JobStatus::Error);
    let total = results.len();

    let overall = if !cancelled && not_run == 0 && total > 0 && passed == total {
        Overall::Pass
    } else {
        Overall::Fail
    };

    Verdict {
        run_id: ctx.run_id.clone(),
        started_at: ctx.started_at,
        finished_at: Utc::now(),
        total,
        passed,
        failed,
        timed_out,
        errored,
        not_run,
        cancelled,
        coverage: coverage.summary(),
        results,
        overall,
    }
}
