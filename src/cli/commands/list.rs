//! # List Command Module / 列表命令模块
//!
//! Dry run: loads and expands the matrix exactly as `run` would and prints
//! the resulting jobs in submission order.
//!
//! 试运行：与 `run` 完全相同地加载并展开矩阵，并按提交顺序打印生成的任务。

use anyhow::Result;
use colored::*;
use std::path::PathBuf;

use crate::core::config;
use crate::core::models::Backend;
use crate::core::planner::{self, MatrixFilter, PlanRequest, TimeoutPolicy};

#[derive(Debug, Clone)]
pub struct ListArgs {
    pub matrix: PathBuf,
    pub backends: Vec<Backend>,
    pub filters: Vec<String>,
    pub tags: Vec<String>,
    pub total_runners: Option<usize>,
    pub runner_index: Option<usize>,
}

pub fn execute(args: ListArgs) -> Result<u8> {
    let matrix = config::load(&args.matrix)?;
    let timeouts = TimeoutPolicy::resolve(None, &matrix.settings);
    let plan = planner::plan(
        &matrix,
        &PlanRequest {
            backends: args.backends,
            filter: MatrixFilter {
                name_globs: args.filters,
                tags: args.tags,
            },
            timeouts,
            total_runners: args.total_runners,
            runner_index: args.runner_index,
        },
    )?;

    println!(
        "  - {:<40} | {:<10} | {:<30} | {:>8}",
        "Job".bold(),
        "Backend".bold(),
        "Parameters".bold(),
        "Timeout".bold()
    );
    for job in &plan.jobs {
        println!(
            "  - {:<40} | {:<10} | {:<30} | {:>7}s",
            job.id,
            job.backend,
            job.parameter_label(),
            job.timeout.as_secs()
        );
    }
    println!(
        "\n{}",
        format!(
            "{} job(s) listed of {} in the matrix ({} test(s) filtered out, {} slow)",
            plan.jobs.len(),
            plan.matrix_size,
            plan.filtered_out,
            plan.slow_jobs
        )
        .cyan()
    );
    Ok(0)
}
