//! # JSON Reporting Module / JSON 报告模块
//!
//! The machine-readable report: per-status counts, per-job detail and the
//! merged coverage summary, exactly as carried by the [`Verdict`].
//!
//! 机器可读的报告：按状态统计的数量、每个任务的详情以及合并后的覆盖率摘要，
//! 与 [`Verdict`] 中携带的内容完全一致。

use anyhow::{Context, Result};
use std::path::Path;

use crate::core::models::Verdict;
use crate::infra::fs::write_file;

/// File name of the report inside the run directory.
pub const REPORT_FILE: &str = "report.json";

pub fn render(verdict: &Verdict) -> Result<String> {
    serde_json::to_string_pretty(verdict).context("Failed to serialize verdict")
}

/// Writes an already rendered report.
pub fn write_report(json: &str, path: &Path) -> Result<()> {
    write_file(path, json)?;
    tracing::info!(path = %path.display(), "wrote JSON report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregate::build_verdict;
    use crate::core::context::RunContext;
    use crate::core::models::{Backend, CoverageDb, JobResult, JobStatus};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_report_carries_counts_and_jobs() {
        let ctx = RunContext::new(Path::new("out"), PathBuf::from("."));
        let result = JobResult {
            job_id: "uart.icarus.0123456789ab".to_string(),
            test: "uart".to_string(),
            backend: Backend::Icarus,
            parameters: BTreeMap::from([("corner".to_string(), "rtl".to_string())]),
            status: JobStatus::Timeout,
            duration: Duration::from_secs(3),
            log_path: PathBuf::from("out/sim.log"),
            coverage_path: None,
            retries: 1,
            exit_code: None,
            detail: None,
        };
        let verdict = build_verdict(vec![result], CoverageDb::default(), false, 0, &ctx);

        let json = render(&verdict).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["overall"], "FAIL");
        assert_eq!(value["timed_out"], 1);
        assert_eq!(value["results"][0]["status"], "TIMEOUT");
        assert_eq!(value["results"][0]["retries"], 1);
        assert_eq!(value["results"][0]["parameters"]["corner"], "rtl");
        assert_eq!(value["coverage"]["total_bins"], 0);
    }

    #[test]
    fn test_write_report_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run/report.json");
        write_report("{}", &path).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "{}");
    }
}
