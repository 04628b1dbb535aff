//! # Data Models Module / 数据模型模块
//!
//! This module defines the core data structures used throughout the matrix runner:
//! simulator backends, concrete jobs, per-job results, coverage databases and the
//! final verdict.
//!
//! 此模块定义了整个矩阵运行器中使用的核心数据结构：
//! 仿真器后端、具体任务、单个任务结果、覆盖率数据库以及最终裁决。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::core::error::ConfigError;

/// The closed set of HDL simulators a job can run on.
/// 任务可以运行的 HDL 仿真器的封闭集合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Icarus Verilog (`iverilog` + `vvp`).
    Icarus,
    /// Verilator.
    Verilator,
    /// Tachyon CVC (`cvc64`).
    Cvc,
    /// Synopsys VCS.
    Vcs,
}

impl Backend {
    pub const ALL: [Backend; 4] = [
        Backend::Icarus,
        Backend::Verilator,
        Backend::Cvc,
        Backend::Vcs,
    ];

    /// Stable lowercase name, used in job ids, artifact paths and the `SIM` variable.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Icarus => "icarus",
            Backend::Verilator => "verilator",
            Backend::Cvc => "cvc",
            Backend::Vcs => "vcs",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "icarus" | "iverilog" => Ok(Backend::Icarus),
            "verilator" => Ok(Backend::Verilator),
            "cvc" | "cvc64" => Ok(Backend::Cvc),
            "vcs" => Ok(Backend::Vcs),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Expected runtime class of a test bench.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeClass {
    #[default]
    Fast,
    Slow,
}

/// One concrete combination of a test bench, a simulator backend and a
/// parameter assignment. Created by the planner and never mutated.
///
/// 测试平台、仿真器后端和参数赋值的一个具体组合。
/// 由计划器创建，之后不会被修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Derived identifier, see [`JobSpec::derive_id`].
    pub id: String,
    /// Name of the originating test descriptor.
    pub test: String,
    /// Location of the test bench.
    pub path: PathBuf,
    pub backend: Backend,
    /// Axis name to chosen value. Ordered so that ids and display are stable.
    pub parameters: BTreeMap<String, String>,
    pub runtime: RuntimeClass,
    pub tags: BTreeSet<String>,
    /// Extra environment variables declared by the descriptor.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Per-job timeout after applying overrides and the slow-runtime factor.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl JobSpec {
    /// Computes the reproducible id `<test>.<backend>.<hash12>`.
    ///
    /// The hash covers the test name, backend and every axis/value pair in
    /// axis order. Each field is length-prefixed so no two distinct tuples
    /// share an encoding.
    pub fn derive_id(test: &str, backend: Backend, parameters: &BTreeMap<String, String>) -> String {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        field(test.as_bytes());
        field(backend.as_str().as_bytes());
        for (axis, value) in parameters {
            field(axis.as_bytes());
            field(value.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        format!("{}.{}.{}", test, backend, &digest[..12])
    }

    /// Key of the compiled simulation image this job can share.
    ///
    /// Jobs differing only in test name (several `TESTCASE`s of one bench)
    /// share a key; a different bench location, backend or parameter set
    /// needs its own build.
    pub fn build_key(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        field(self.path.to_string_lossy().as_bytes());
        field(self.backend.as_str().as_bytes());
        for (axis, value) in &self.parameters {
            field(axis.as_bytes());
            field(value.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        format!("{}.{}", self.backend, &digest[..12])
    }

    /// Human readable parameter tuple, e.g. `size=large,width=32`.
    pub fn parameter_label(&self) -> String {
        format_parameters(&self.parameters)
    }
}

pub(crate) fn format_parameters(parameters: &BTreeMap<String, String>) -> String {
    if parameters.is_empty() {
        return "-".to_string();
    }
    parameters
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Outcome vocabulary shared by every backend.
/// 所有后端共享的结果词汇。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pass,
    Fail,
    /// Killed after exceeding its timeout. Retryable by default.
    Timeout,
    /// Crash, spawn failure, unparseable artifacts or a contract mismatch.
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pass => "PASS",
            JobStatus::Fail => "FAIL",
            JobStatus::Timeout => "TIMEOUT",
            JobStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of executing one [`JobSpec`].
///
/// The job runner fills in a candidate `status` from the exit status alone;
/// the aggregator may refine it after reading the log and coverage artifacts.
///
/// 执行一个 [`JobSpec`] 的结果。
/// 任务运行器仅根据退出状态填写候选 `status`；
/// 聚合器在读取日志和覆盖率产物后可能会对其进行修正。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub test: String,
    pub backend: Backend,
    pub parameters: BTreeMap<String, String>,
    pub status: JobStatus,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub log_path: PathBuf,
    /// Where the simulator was asked to write coverage; may not exist.
    pub coverage_path: Option<PathBuf>,
    /// Number of retries consumed (0 when the first attempt was final).
    pub retries: u32,
    pub exit_code: Option<i32>,
    /// Short triage message, e.g. why a result was demoted to ERROR.
    pub detail: Option<String>,
}

impl JobResult {
    /// Creates a result for `spec` with no artifacts attached yet.
    pub fn new(spec: &JobSpec, status: JobStatus, duration: Duration, log_path: PathBuf) -> Self {
        Self {
            job_id: spec.id.clone(),
            test: spec.test.clone(),
            backend: spec.backend,
            parameters: spec.parameters.clone(),
            status,
            duration,
            log_path,
            coverage_path: None,
            retries: 0,
            exit_code: None,
            detail: None,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == JobStatus::Pass
    }

    pub fn parameter_label(&self) -> String {
        format_parameters(&self.parameters)
    }
}

/// Coverage bins and their hit counts.
///
/// Merging adds counts bin by bin, which makes it associative and commutative:
/// the merged database does not depend on job completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageDb {
    pub bins: BTreeMap<String, u64>,
}

impl CoverageDb {
    pub fn merge(&mut self, other: &CoverageDb) {
        for (bin, hits) in &other.bins {
            let entry = self.bins.entry(bin.clone()).or_insert(0);
            *entry = entry.saturating_add(*hits);
        }
    }

    pub fn merged<'a>(dbs: impl IntoIterator<Item = &'a CoverageDb>) -> CoverageDb {
        let mut acc = CoverageDb::default();
        for db in dbs {
            acc.merge(db);
        }
        acc
    }

    pub fn summary(&self) -> CoverageSummary {
        let total_bins = self.bins.len();
        let covered_bins = self.bins.values().filter(|hits| **hits > 0).count();
        let percent = if total_bins == 0 {
            0.0
        } else {
            covered_bins as f64 * 100.0 / total_bins as f64
        };
        CoverageSummary {
            total_bins,
            covered_bins,
            percent,
            bins: self.bins.clone(),
        }
    }
}

/// Summary of a merged coverage database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub total_bins: usize,
    pub covered_bins: usize,
    pub percent: f64,
    pub bins: BTreeMap<String, u64>,
}

/// Overall pass/fail outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Overall {
    Pass,
    Fail,
}

/// The terminal artifact of a run. Built once by the aggregator.
///
/// 一次运行的最终产物。由聚合器一次性构建。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errored: usize,
    /// Jobs that were planned but never produced a result because the run was cancelled.
    pub not_run: usize,
    pub cancelled: bool,
    pub coverage: CoverageSummary,
    pub results: Vec<JobResult>,
    pub overall: Overall,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        self.overall == Overall::Pass
    }

    /// Process exit code for this verdict: 0 on PASS, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_pass() { 0 } else { 1 }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_job_id_is_reproducible() {
        let p = params(&[("size", "small"), ("width", "32")]);
        let a = JobSpec::derive_id("uart", Backend::Icarus, &p);
        let b = JobSpec::derive_id("uart", Backend::Icarus, &p.clone());
        assert_eq!(a, b);
        assert!(a.starts_with("uart.icarus."));
        assert_eq!(a.len(), "uart.icarus.".len() + 12);
    }

    #[test]
    fn test_job_id_distinguishes_parameters_and_backends() {
        let small = params(&[("size", "small")]);
        let large = params(&[("size", "large")]);
        let ids = [
            JobSpec::derive_id("uart", Backend::Icarus, &small),
            JobSpec::derive_id("uart", Backend::Icarus, &large),
            JobSpec::derive_id("uart", Backend::Verilator, &small),
            JobSpec::derive_id("uart", Backend::Icarus, &BTreeMap::new()),
        ];
        let unique: BTreeSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_job_id_does_not_confuse_axis_boundaries() {
        let a = params(&[("a", "b=c")]);
        let b = params(&[("a=b", "c")]);
        assert_ne!(
            JobSpec::derive_id("t", Backend::Cvc, &a),
            JobSpec::derive_id("t", Backend::Cvc, &b)
        );
    }

    #[test]
    fn test_backend_parsing_accepts_aliases() {
        assert_eq!("iverilog".parse::<Backend>().unwrap(), Backend::Icarus);
        assert_eq!("CVC64".parse::<Backend>().unwrap(), Backend::Cvc);
        assert!("modelsim".parse::<Backend>().is_err());
    }

    #[test]
    fn test_coverage_summary_counts_covered_bins() {
        let db = CoverageDb {
            bins: [("a".to_string(), 3), ("b".to_string(), 0)].into_iter().collect(),
        };
        let summary = db.summary();
        assert_eq!(summary.total_bins, 2);
        assert_eq!(summary.covered_bins, 1);
        assert!((summary.percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_job_result_serializes_status_uppercase() {
        let spec = JobSpec {
            id: "t.icarus.000000000000".into(),
            test: "t".into(),
            path: PathBuf::from("tests/t"),
            backend: Backend::Icarus,
            parameters: BTreeMap::new(),
            runtime: RuntimeClass::Fast,
            tags: BTreeSet::new(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(5),
        };
        let result = JobResult::new(&spec, JobStatus::Timeout, Duration::from_millis(1500), "x.log".into());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "TIMEOUT");
        assert_eq!(json["backend"], "icarus");
        assert_eq!(json["duration"], 1.5);
    }
}
