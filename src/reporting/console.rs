//! # Console Reporting Module / 控制台报告模块
//!
//! This module renders the verdict as a colored table and prints triage
//! details for every job that did not pass.
//!
//! 此模块将结论渲染为彩色表格，并为每个未通过的任务打印排查详情。

use colored::*;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::core::models::{JobResult, JobStatus, Verdict};

/// Lines of simulator log shown for each failing job.
const LOG_TAIL_LINES: usize = 20;

fn colored_status(status: JobStatus) -> ColoredString {
    match status {
        JobStatus::Pass => status.as_str().green(),
        JobStatus::Fail => status.as_str().red(),
        JobStatus::Timeout => status.as_str().yellow(),
        JobStatus::Error => status.as_str().magenta(),
    }
}

/// Renders the verdict as a table followed by totals, coverage and the
/// overall outcome.
///
/// 将结论渲染为表格，随后是总计、覆盖率和总体结果。
///
/// # Output Format / 输出格式
/// ```text
/// --- Verification Summary (run_20250101_120000_000) ---
///   - Status   | Job                                      | Parameters               |   Duration
///   - PASS     | uart.icarus.1f2e3d4c5b6a                 | corner=rtl               |      1.23s
///   - TIMEOUT  | dma.verilator.a1b2c3d4e5f6               | corner=gl                |    600.00s (1 retries)
/// ```
pub fn render_table(verdict: &Verdict) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n{}",
        format!("--- Verification Summary ({}) ---", verdict.run_id).bold()
    );
    let _ = writeln!(
        out,
        "  - {:<8} | {:<40} | {:<24} | {:>10}",
        "Status", "Job", "Parameters", "Duration"
    );

    for result in &verdict.results {
        let retries = if result.retries > 0 {
            format!(" ({} retries)", result.retries)
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "  - {:<8} | {:<40} | {:<24} | {:>9.2}s{}",
            colored_status(result.status),
            result.job_id,
            result.parameter_label(),
            result.duration.as_secs_f64(),
            retries
        );
    }

    let _ = writeln!(
        out,
        "\nTotal: {}  Passed: {}  Failed: {}  Timed out: {}  Errors: {}  Not run: {}",
        verdict.total,
        verdict.passed.to_string().green(),
        verdict.failed.to_string().red(),
        verdict.timed_out.to_string().yellow(),
        verdict.errored.to_string().magenta(),
        verdict.not_run
    );

    if verdict.coverage.total_bins > 0 {
        let _ = writeln!(
            out,
            "Coverage: {}/{} bins ({:.1}%)",
            verdict.coverage.covered_bins, verdict.coverage.total_bins, verdict.coverage.percent
        );
    }
    if verdict.cancelled {
        let _ = writeln!(out, "{}", "Run was cancelled before all jobs completed.".yellow());
    }

    let overall = if verdict.is_pass() {
        "Verdict: PASS".green().bold()
    } else {
        "Verdict: FAIL".red().bold()
    };
    let _ = writeln!(out, "{overall}");
    out
}

/// Prints the summary table to stdout.
pub fn print_summary(verdict: &Verdict) {
    print!("{}", render_table(verdict));
}

/// Prints detailed information about every job that did not pass: its
/// triage detail, the log location and the end of the log.
///
/// 打印每个未通过任务的详细信息：排查说明、日志位置以及日志末尾内容。
pub fn print_failure_details(verdict: &Verdict) {
    let failures: Vec<&JobResult> = verdict.results.iter().filter(|r| !r.is_pass()).collect();
    if failures.is_empty() {
        return;
    }

    println!("\n{}", "--- Failure Details ---".red().bold());
    println!("{}", "-".repeat(80));

    for (i, result) in failures.iter().enumerate() {
        println!(
            "[{}/{}] {} '{}'",
            i + 1,
            failures.len(),
            colored_status(result.status),
            result.job_id.cyan()
        );
        if let Some(detail) = &result.detail {
            println!("  {detail}");
        }
        println!("  log: {}", result.log_path.display());
        if let Some(tail) = log_tail(&result.log_path, LOG_TAIL_LINES) {
            println!("\n--- {} ---\n", "Simulation Log (tail)".yellow());
            println!("{tail}");
        }
        println!("\n{}", "-".repeat(80));
    }
}

/// The last `lines` lines of a log file, if it can be read.
pub fn log_tail(path: &Path, lines: usize) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let content = String::from_utf8_lossy(&bytes);
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Some(all[start..].join("\n"))
}
