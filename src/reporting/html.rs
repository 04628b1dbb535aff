//! # HTML Reporting Module / HTML 报告模块
//!
//! This module renders a standalone HTML page from a verdict: summary
//! counters, coverage, and a results table whose failing rows can be expanded
//! to show their triage detail and log tail.
//!
//! 此模块从结论渲染独立的 HTML 页面：汇总计数、覆盖率，以及一个结果表格，
//! 其中失败的行可以展开查看排查说明和日志末尾内容。

use anyhow::Result;
use std::path::Path;

use crate::core::models::{JobStatus, Verdict};
use crate::infra::fs::write_file;
use crate::reporting::console::log_tail;

/// Embedded CSS styles for HTML reports / HTML 报告的嵌入式 CSS 样式
const HTML_STYLE: &str = include_str!("assets/report.css");

/// Embedded JavaScript for HTML report interactivity / HTML 报告交互性的嵌入式 JavaScript
const HTML_SCRIPT: &str = include_str!("assets/report.js");

const LOG_TAIL_LINES: usize = 40;

fn status_class(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pass => "passed",
        JobStatus::Fail => "failed",
        JobStatus::Timeout => "timeout",
        JobStatus::Error => "error",
    }
}

/// Renders the report page.
///
/// 渲染报告页面。
pub fn render(verdict: &Verdict) -> String {
    let mut html = String::new();
    html.push_str(&format!(
        "<!DOCTYPE html><html><head><meta charset='utf-8'><title>Verification Report {}</title>",
        escape_html(&verdict.run_id)
    ));
    html.push_str("<style>");
    html.push_str(HTML_STYLE);
    html.push_str("</style>");
    html.push_str("</head><body>");
    html.push_str(&format!(
        "<h1>Verification Report <span class='verdict {}'>{}</span></h1>",
        if verdict.is_pass() { "passed" } else { "failed" },
        if verdict.is_pass() { "PASS" } else { "FAIL" }
    ));
    html.push_str(&format!(
        "<p class='meta'>{} &middot; started {} &middot; finished {}{}</p>",
        escape_html(&verdict.run_id),
        verdict.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        verdict.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
        if verdict.cancelled { " &middot; <strong>cancelled</strong>" } else { "" }
    ));

    html.push_str("<div class='summary-container'>");
    for (count, label, class) in [
        (verdict.total, "Total", ""),
        (verdict.passed, "Passed", "passed-text"),
        (verdict.failed, "Failed", "failed-text"),
        (verdict.timed_out, "Timed out", "timeout-text"),
        (verdict.errored, "Errors", "error-text"),
        (verdict.not_run, "Not run", "skipped-text"),
    ] {
        html.push_str(&format!(
            "<div class='summary-item'><span class='count {class}'>{count}</span><span class='label'>{label}</span></div>"
        ));
    }
    html.push_str("</div>");

    if verdict.coverage.total_bins > 0 {
        html.push_str(&format!(
            "<p class='coverage'>Coverage: {}/{} bins ({:.1}%)</p>",
            verdict.coverage.covered_bins, verdict.coverage.total_bins, verdict.coverage.percent
        ));
    }

    html.push_str("<table><thead><tr>");
    html.push_str("<th>Job</th><th>Parameters</th>");
    html.push_str("<th class='status-col'>Status</th>");
    html.push_str("<th class='duration-cell'>Duration</th>");
    html.push_str("<th class='retries-cell'>Retries</th>");
    html.push_str("</tr></thead><tbody>");

    for (i, result) in verdict.results.iter().enumerate() {
        let output_id = format!("output-{i}");
        let retries_str = if result.retries > 0 {
            result.retries.to_string()
        } else {
            String::new()
        };

        let (output_toggle, details) = if result.is_pass() {
            (String::new(), String::new())
        } else {
            let mut output = String::new();
            if let Some(detail) = &result.detail {
                output.push_str(detail);
                output.push_str("\n\n");
            }
            output.push_str(&format!("log: {}\n", result.log_path.display()));
            if let Some(tail) = log_tail(&result.log_path, LOG_TAIL_LINES) {
                output.push('\n');
                output.push_str(&tail);
            }
            (
                format!("<div class='output-toggle' onclick=\"toggleOutput('{output_id}')\">Show output</div>"),
                format!(
                    "<tr id='{output_id}' style='display:none;'><td colspan='5'><pre class='output-content'>{}</pre></td></tr>",
                    escape_html(&output)
                ),
            )
        };

        html.push_str("<tr>");
        html.push_str(&format!("<td>{}</td>", escape_html(&result.job_id)));
        html.push_str(&format!("<td>{}</td>", escape_html(&result.parameter_label())));
        html.push_str(&format!(
            "<td class='status-col'><div class='status-cell {}'>{}</div>{}</td>",
            status_class(result.status),
            result.status,
            output_toggle
        ));
        html.push_str(&format!(
            "<td class='duration-cell'>{:.2}s</td>",
            result.duration.as_secs_f64()
        ));
        html.push_str(&format!("<td class='retries-cell'>{retries_str}</td>"));
        html.push_str("</tr>");
        html.push_str(&details);
    }

    html.push_str("</tbody></table>");
    html.push_str("<script>");
    html.push_str(HTML_SCRIPT);
    html.push_str("</script></body></html>");
    html
}

/// Renders the report page and writes it to `output_path`.
///
/// # Errors / 错误
/// Returns an error if the file or its parent directories cannot be written.
/// 如果无法写入文件或其父目录，则返回错误。
pub fn generate_html_report(verdict: &Verdict, output_path: &Path) -> Result<()> {
    write_file(output_path, &render(verdict))
}

/// Simple HTML escape function to replace special characters with their HTML entities
/// 简单的 HTML 转义函数，用 HTML 实体替换特殊字符
fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
