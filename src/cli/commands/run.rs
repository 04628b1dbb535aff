//! # Run Command Module / 运行命令模块
//!
//! This module implements the `run` command: it loads and expands the matrix,
//! runs every job on the scheduler, aggregates the results into a verdict and
//! writes the reports. The verdict alone decides the exit code.
//!
//! 此模块实现了 `run` 命令：加载并展开矩阵，在调度器上运行所有任务，
//! 将结果聚合为结论并写出报告。只有结论决定退出码。

use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::core::{
    aggregate::aggregate,
    config::{self, MatrixConfig},
    context::RunContext,
    execution::run_scheduled,
    models::Backend,
    planner::{self, MatrixFilter, PlanRequest, TimeoutPolicy},
    scheduler::{self, RetryPolicy},
};
use crate::infra::fs::{absolute_path, absolutize};
use crate::reporting::{self, html::generate_html_report, json};

/// Output directory used when neither the CLI nor `[settings]` names one.
pub const DEFAULT_OUTPUT_DIR: &str = "verif_runs";

/// Arguments of the `run` command after CLI parsing.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub matrix: PathBuf,
    pub backends: Vec<Backend>,
    pub filters: Vec<String>,
    pub tags: Vec<String>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    pub output_dir: Option<PathBuf>,
    pub project_dir: PathBuf,
    pub report: Option<PathBuf>,
    pub html: Option<PathBuf>,
    pub seed: Option<u64>,
    pub total_runners: Option<usize>,
    pub runner_index: Option<usize>,
}

/// Executes the run command and returns the process exit code.
///
/// Configuration problems surface as errors before any job is scheduled.
/// Once scheduling has started, the verdict decides the exit code and
/// reporting failures are only logged.
pub async fn execute(args: RunArgs) -> Result<u8> {
    println!(
        "{}",
        format!("Loading test matrix from: {}", args.matrix.display()).cyan()
    );
    let matrix = config::load(&args.matrix)?;
    let settings = &matrix.settings;

    let concurrency = args
        .concurrency
        .or(settings.concurrency)
        .unwrap_or(num_cpus::get() / 2 + 1)
        .max(1);
    let mut retry_policy = RetryPolicy::new(args.retries.or(settings.retries).unwrap_or(0));
    if let Some(retry_on) = &settings.retry_on {
        retry_policy = retry_policy.with_retry_on(retry_on.clone());
    }
    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| settings.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

    let plan = planner::plan(
        &matrix,
        &PlanRequest {
            backends: args.backends.clone(),
            filter: MatrixFilter {
                name_globs: args.filters.clone(),
                tags: args.tags.clone(),
            },
            timeouts: TimeoutPolicy::resolve(args.timeout_secs, settings),
            total_runners: args.total_runners,
            runner_index: args.runner_index,
        },
    )?;

    if plan.filtered_out > 0 {
        println!(
            "{}",
            format!("Filtered out {} test(s) by name or tag.", plan.filtered_out).cyan()
        );
    }
    if plan.slow_jobs > 0 {
        println!(
            "{}",
            format!("{} slow job(s) run with an extended timeout.", plan.slow_jobs).yellow()
        );
    }
    if let (Some(total), Some(index)) = (args.total_runners, args.runner_index) {
        println!(
            "{}",
            format!(
                "Running as runner {}/{}: {} of {} job(s).",
                index + 1,
                total,
                plan.jobs.len(),
                plan.matrix_size
            )
            .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "Running {} job(s) with concurrency {}.",
                plan.jobs.len(),
                concurrency
            )
            .bold()
        );
    }

    if plan.jobs.is_empty() {
        // Only a shard can be empty; the full matrix being empty is a ConfigError.
        println!("{}", "No jobs assigned to this runner.".green());
        return Ok(0);
    }

    let project_root = absolute_path(&args.project_dir)
        .with_context(|| format!("Project directory not found: {}", args.project_dir.display()))?;
    // Commands may change directory (`make -C`), so artifact paths must be absolute.
    let output_dir = absolutize(&output_dir)?;
    let ctx = Arc::new(build_context(&matrix, &output_dir, project_root, args.seed, setup_signal_handler()));
    tracing::info!(run_id = %ctx.run_id, run_dir = %ctx.run_dir.display(), "starting run");

    let outcome = scheduler::execute(
        plan.jobs,
        concurrency,
        &retry_policy,
        Arc::clone(&ctx),
        run_scheduled,
    )
    .await;

    if outcome.cancelled {
        println!(
            "\n{}",
            format!(
                "Run cancelled: {} job(s) completed, {} not run.",
                outcome.results.len(),
                outcome.not_run
            )
            .yellow()
        );
    }

    let verdict = aggregate(outcome.results, outcome.cancelled, outcome.not_run, &ctx);

    match reporting::emit(&verdict) {
        Ok(report) => {
            print!("{}", report.table);
            let report_path = args
                .report
                .clone()
                .or_else(|| settings.report.clone())
                .unwrap_or_else(|| ctx.run_dir.join(json::REPORT_FILE));
            match json::write_report(&report.json, &report_path) {
                Ok(()) => println!("JSON report: {}", report_path.display()),
                Err(e) => tracing::warn!("failed to write JSON report: {e:#}"),
            }
        }
        Err(e) => tracing::warn!("failed to render report: {e:#}"),
    }

    if let Some(html_path) = &args.html {
        println!("\nGenerating HTML report at: {}", html_path.display());
        if let Err(e) = generate_html_report(&verdict, html_path) {
            eprintln!("{} {:#}", "Failed to generate HTML report:".red(), e);
        }
    }

    reporting::print_failure_details(&verdict);
    if verdict.is_pass() {
        println!("\n{}", "All jobs passed.".green().bold());
    }
    Ok(verdict.exit_code())
}

fn build_context(
    matrix: &MatrixConfig,
    output_dir: &std::path::Path,
    project_root: PathBuf,
    seed: Option<u64>,
    cancel: CancellationToken,
) -> RunContext {
    RunContext::new(output_dir, project_root)
        .with_seed(seed.or(matrix.settings.seed))
        .with_container(matrix.settings.container.clone())
        .with_backend_commands(matrix.backends.clone())
        .with_cancel_token(cancel)
}

/// Sets up a signal handler for graceful shutdown.
fn setup_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                println!(
                    "\n{}",
                    "Received Ctrl-C, stopping: no new jobs will start and running jobs are killed."
                        .yellow()
                );
                token_clone.cancel();
            }
            Err(e) => tracing::warn!("failed to listen for Ctrl-C: {e}"),
        }
    });

    token
}
