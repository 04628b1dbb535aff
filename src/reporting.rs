//! # Reporting Module / 报告模块
//!
//! This module turns a [`Verdict`] into report artifacts: a colored console
//! table, the structured JSON report and an optional standalone HTML page.
//! Rendering is pure; writing files is left to the CLI, which treats every
//! reporting failure as a warning.
//!
//! 此模块将 [`Verdict`] 转换为报告产物：彩色控制台表格、结构化 JSON 报告以及
//! 可选的独立 HTML 页面。渲染是纯函数；文件写入由 CLI 负责，
//! CLI 会把所有报告错误视为警告。

use anyhow::Result;

use crate::core::models::Verdict;

pub mod console;
pub mod html;
pub mod json;

// Re-export common reporting functions
pub use console::{print_failure_details, print_summary, render_table};
pub use html::generate_html_report;

/// The rendered forms of a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub json: String,
    pub table: String,
}

/// Renders the structured report and the console table.
pub fn emit(verdict: &Verdict) -> Result<Report> {
    Ok(Report {
        json: json::render(verdict)?,
        table: console::render_table(verdict),
    })
}
