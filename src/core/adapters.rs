//! # Backend Adapters / 后端适配器
//!
//! One variant per simulator. Each adapter is a pure function from a job's raw
//! artifacts to the shared [`JobStatus`] vocabulary, plus a coverage parser for
//! the database format that simulator produces.
//!
//! 每个仿真器对应一个变体。每个适配器都是一个纯函数，
//! 将任务的原始产物映射到共享的 [`JobStatus`] 词汇，并附带该仿真器覆盖率数据库格式的解析器。

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::core::error::AggregationError;
use crate::core::models::{Backend, CoverageDb, JobStatus};

/// cocotb's end-of-regression line, e.g. `** TESTS=3 PASS=2 FAIL=1 SKIP=0`.
static REGRESSION_SUMMARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"TESTS=(\d+)\s+PASS=(\d+)\s+FAIL=(\d+)(?:\s+SKIP=(\d+))?")
        .expect("valid summary regex")
});

static ICARUS_FATAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:ERROR:|\S+:\d+: (?:syntax )?error|[Ee]rror: )").expect("valid icarus regex")
});
static VERILATOR_FATAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^%(?:Error|Fatal)").expect("valid verilator regex"));
static CVC_FATAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\*\*(?:FATAL|ERROR)").expect("valid cvc regex"));
static VCS_FATAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Error-\[").expect("valid vcs regex"));

/// Test counts reported by the simulation framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegressionSummary {
    pub tests: u32,
    pub passed: u32,
    pub failed: u32,
}

/// Everything an adapter is allowed to look at.
#[derive(Debug, Clone, Copy)]
pub struct RawArtifact<'a> {
    /// Status the job runner derived from the exit status.
    pub candidate: JobStatus,
    pub exit_code: Option<i32>,
    pub log: &'a str,
    /// cocotb JUnit results, when the simulator wrote them.
    pub results_xml: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendAdapter {
    Icarus,
    Verilator,
    Cvc,
    Vcs,
}

impl BackendAdapter {
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Icarus => BackendAdapter::Icarus,
            Backend::Verilator => BackendAdapter::Verilator,
            Backend::Cvc => BackendAdapter::Cvc,
            Backend::Vcs => BackendAdapter::Vcs,
        }
    }

    /// Verilator writes its native `coverage.dat`; the others export
    /// cocotb-coverage JSON.
    pub fn coverage_file_name(&self) -> &'static str {
        match self {
            BackendAdapter::Verilator => "coverage.dat",
            _ => "coverage.json",
        }
    }

    fn fatal_marker(&self) -> &'static Regex {
        match self {
            BackendAdapter::Icarus => &*ICARUS_FATAL,
            BackendAdapter::Verilator => &*VERILATOR_FATAL,
            BackendAdapter::Cvc => &*CVC_FATAL,
            BackendAdapter::Vcs => &*VCS_FATAL,
        }
    }

    /// Confirms or corrects the runner's candidate status.
    ///
    /// - TIMEOUT and ERROR candidates are final.
    /// - A simulator fatal marker or a summary with failures means FAIL.
    /// - Exit 0 needs a regression summary with at least one test, otherwise
    ///   the artifact is unconfirmed and the job becomes ERROR.
    /// - A non-zero exit next to a clean summary breaks the backend contract.
    pub fn parse(&self, artifact: &RawArtifact<'_>) -> Result<JobStatus, AggregationError> {
        match artifact.candidate {
            JobStatus::Timeout | JobStatus::Error => return Ok(artifact.candidate),
            JobStatus::Pass | JobStatus::Fail => {}
        }

        if self.fatal_marker().is_match(artifact.log) {
            return Ok(JobStatus::Fail);
        }

        let summary = regression_summary(artifact.log)
            .or_else(|| artifact.results_xml.and_then(junit_summary));

        match (artifact.candidate, summary) {
            (_, Some(s)) if s.failed > 0 => Ok(JobStatus::Fail),
            (JobStatus::Pass, Some(s)) if s.tests > 0 => Ok(JobStatus::Pass),
            (JobStatus::Pass, _) => Err(AggregationError::MissingSummary),
            (_, Some(s)) if s.tests > 0 => Err(AggregationError::ContractMismatch {
                exit_code: artifact.exit_code.unwrap_or(-1),
            }),
            _ => Ok(JobStatus::Fail),
        }
    }

    /// Parses this backend's coverage database.
    pub fn parse_coverage(&self, path: &Path, content: &str) -> Result<CoverageDb, AggregationError> {
        let invalid = |message: String| AggregationError::Coverage {
            path: path.to_path_buf(),
            message,
        };
        match self {
            BackendAdapter::Verilator => parse_verilator_coverage(content).map_err(invalid),
            _ => serde_json::from_str::<CoverageDb>(content).map_err(|e| invalid(e.to_string())),
        }
    }
}

/// The last regression summary line in a log, if any.
pub fn regression_summary(log: &str) -> Option<RegressionSummary> {
    let caps = REGRESSION_SUMMARY.captures_iter(log).last()?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    Some(RegressionSummary {
        tests: num(1)?,
        passed: num(2)?,
        failed: num(3)?,
    })
}

/// Counts `<testcase>` and `<failure>`/`<error>` elements in cocotb's JUnit
/// output. Good enough for confirmation; the log remains the primary source.
fn junit_summary(xml: &str) -> Option<RegressionSummary> {
    let tests = xml.matches("<testcase").count() as u32;
    if tests == 0 {
        return None;
    }
    let failed = (xml.matches("<failure").count() + xml.matches("<error").count()) as u32;
    Some(RegressionSummary {
        tests,
        passed: tests.saturating_sub(failed),
        failed,
    })
}

/// Verilator `coverage.dat`: `C '<key>' <count>` per point, `#` comments.
/// The key's `\x01`/`\x02` field separators are rendered as `;` and `=`.
fn parse_verilator_coverage(content: &str) -> Result<CoverageDb, String> {
    let mut db = CoverageDb::default();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let body = line
            .strip_prefix("C '")
            .ok_or_else(|| format!("line {}: expected coverage point", lineno + 1))?;
        let split = body
            .rfind("' ")
            .ok_or_else(|| format!("line {}: unterminated coverage key", lineno + 1))?;
        let key: String = body[..split]
            .trim_start_matches('\u{1}')
            .chars()
            .map(|c| match c {
                '\u{1}' => ';',
                '\u{2}' => '=',
                other => other,
            })
            .collect();
        let hits: u64 = body[split + 2..]
            .trim()
            .parse()
            .map_err(|e| format!("line {}: bad hit count: {e}", lineno + 1))?;
        let entry = db.bins.entry(key).or_insert(0);
        *entry = entry.saturating_add(hits);
    }
    Ok(db)
}
