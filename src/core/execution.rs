//! # Job Runner Module / 任务运行模块
//!
//! Executes one [`JobSpec`] as an isolated simulator subprocess and classifies
//! the outcome from the exit status and elapsed time alone. Reading simulator
//! logs is the aggregator's job, so a new backend never touches this module
//! beyond its default command line.
//!
//! 将一个 [`JobSpec`] 作为隔离的仿真器子进程执行，并仅根据退出状态和耗时对结果进行分类。
//! 读取仿真器日志是聚合器的工作，因此新增后端时除了默认命令行外无需修改本模块。

use colored::*;
use tracing::Instrument;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::adapters::BackendAdapter;
use crate::core::config::ContainerConfig;
use crate::core::context::RunContext;
use crate::core::models::{Backend, JobResult, JobSpec, JobStatus};
use crate::infra::command::{self, Termination};
use crate::infra::fs::prepare_job_dir;

/// Name of the merged stdout/stderr log inside each job directory.
pub const LOG_FILE: &str = "sim.log";
/// Name of the cocotb results file inside each job directory.
pub const RESULTS_FILE: &str = "results.xml";

/// What a single invocation of the runner produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The job ran to a classifiable end (including TIMEOUT and ERROR).
    Finished(JobResult),
    /// The run was cancelled while this job was in flight; its process was
    /// killed and no result is reported for it.
    Cancelled,
}

/// The cocotb makefile flow used when a backend has no `[backends.*]` override.
///
/// Placeholders: `{name}` `{path}` `{backend}` `{job_id}` `{job_dir}`
/// `{build_dir}` `{results}` `{coverage}` `{seed}` `{plusargs}` and
/// `{param.<axis>}`. Substituted values are shell-quoted, so templates must
/// not wrap placeholders in quotes themselves.
///
/// Coverage lands at `{coverage}`: Verilator is pointed there through
/// `{plusargs}`, the other backends' cocotb benches write their bins JSON to
/// the path in `COVERAGE_FILE`.
pub fn default_command(backend: Backend) -> &'static str {
    match backend {
        Backend::Icarus => {
            "make -C {path} SIM=icarus TOPLEVEL_LANG=verilog TESTCASE={name} \
             SIM_BUILD={build_dir} COCOTB_RESULTS_FILE={results} PLUSARGS={plusargs}"
        }
        Backend::Verilator => {
            "make -C {path} SIM=verilator TOPLEVEL_LANG=verilog TESTCASE={name} \
             SIM_BUILD={build_dir} COCOTB_RESULTS_FILE={results} \
             EXTRA_ARGS=--coverage PLUSARGS={plusargs}"
        }
        Backend::Cvc => {
            "make -C {path} SIM=cvc TOPLEVEL_LANG=verilog TESTCASE={name} \
             SIM_BUILD={build_dir} COCOTB_RESULTS_FILE={results} PLUSARGS={plusargs}"
        }
        Backend::Vcs => {
            "make -C {path} SIM=vcs TOPLEVEL_LANG=verilog TESTCASE={name} \
             SIM_BUILD={build_dir} COCOTB_RESULTS_FILE={results} \
             COMPILE_ARGS=-cm=line+tgl+cond+fsm+branch PLUSARGS={plusargs}"
        }
    }
}

fn command_template(backend: Backend, ctx: &RunContext) -> &str {
    ctx.backend_commands
        .get(&backend)
        .map(|c| c.command.as_str())
        .unwrap_or_else(|| default_command(backend))
}

/// Runtime plusargs: one `+axis=value` per parameter, plus the coverage
/// output file for backends that take it on the command line.
fn plusargs(spec: &JobSpec, coverage_path: &Path) -> String {
    let mut args: Vec<String> = spec
        .parameters
        .iter()
        .map(|(axis, value)| format!("+{axis}={value}"))
        .collect();
    if spec.backend == Backend::Verilator {
        args.push(format!("+verilator+coverage+file+{}", coverage_path.display()));
    }
    args.join(" ")
}

/// The concrete process invocation for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    /// Build directory the command compiles into, when its template uses one.
    pub build_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn display(&self) -> String {
        shlex::try_join(self.argv.iter().map(String::as_str))
            .unwrap_or_else(|_| self.argv.join(" "))
    }
}

/// Runs one job to completion, timeout or cancellation.
///
/// Never returns an error: every failure mode becomes a `JobResult` status so
/// that one broken job cannot disturb the rest of the run.
pub async fn run_job(spec: &JobSpec, timeout: Duration, ctx: &RunContext) -> RunOutcome {
    let job_dir = ctx.job_dir(&spec.id);
    let log_path = job_dir.join(LOG_FILE);
    let coverage_path = job_dir.join(BackendAdapter::for_backend(spec.backend).coverage_file_name());

    let errored = |detail: String| {
        let mut result = JobResult::new(spec, JobStatus::Error, Duration::ZERO, log_path.clone());
        result.detail = Some(detail);
        RunOutcome::Finished(result)
    };

    if let Err(e) = prepare_job_dir(&job_dir) {
        return errored(format!("{e:#}"));
    }

    let invocation = match build_invocation(spec, ctx, &job_dir, &coverage_path) {
        Ok(invocation) => invocation,
        Err(message) => {
            // Keep the log contract: the artifact exists even when nothing ran.
            if let Err(e) = std::fs::write(&log_path, format!("command rendering failed: {message}\n")) {
                tracing::warn!(log = %log_path.display(), "cannot write job log: {e}");
            }
            return errored(message);
        }
    };

    // Jobs sharing a build run one at a time so the first compiles the image
    // and the rest reuse it.
    let _build_guard = match &invocation.build_dir {
        Some(build_dir) => {
            let lock = ctx.build_lock(build_dir);
            let guard = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return RunOutcome::Cancelled,
                guard = lock.lock_owned() => guard,
            };
            if let Err(e) = std::fs::create_dir_all(build_dir) {
                return errored(format!("cannot create build directory {}: {e}", build_dir.display()));
            }
            Some(guard)
        }
        None => None,
    };

    println!("{}", format!("▶ {} [{}]", spec.id, spec.parameter_label()).blue());
    tracing::debug!(job = %spec.id, command = %invocation.display(), timeout_secs = timeout.as_secs_f64(), "starting job");

    let mut cmd = tokio::process::Command::new(&invocation.argv[0]);
    cmd.args(&invocation.argv[1..])
        .current_dir(&invocation.cwd)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let run = command::spawn_and_capture(
        cmd,
        &invocation.display(),
        &log_path,
        timeout,
        &ctx.cancel,
    )
    .instrument(tracing::info_span!("job", id = %spec.id))
    .await;

    let (status, exit_code, detail) = match run.termination {
        Termination::Exited(exit) => match exit.code() {
            Some(0) => (JobStatus::Pass, Some(0), None),
            Some(code) => (JobStatus::Fail, Some(code), None),
            None => (
                JobStatus::Error,
                None,
                Some(format!("simulator terminated abnormally ({exit})")),
            ),
        },
        Termination::TimedOut => (
            JobStatus::Timeout,
            None,
            Some(format!("killed after {:.1}s timeout", timeout.as_secs_f64())),
        ),
        Termination::Failed(message) => (JobStatus::Error, None, Some(message)),
        Termination::Cancelled => {
            println!("{}", format!("✖ {} cancelled", spec.id).dimmed());
            return RunOutcome::Cancelled;
        }
    };

    let mut result = JobResult::new(spec, status, run.elapsed, log_path);
    result.exit_code = exit_code;
    result.coverage_path = Some(coverage_path);
    result.detail = detail;

    let line = format!(
        "{} {} ({:.2}s)",
        status_marker(status),
        spec.id,
        run.elapsed.as_secs_f64()
    );
    match status {
        JobStatus::Pass => println!("{}", line.green()),
        JobStatus::Timeout => println!("{}", line.yellow()),
        _ => println!("{}", line.red()),
    }

    RunOutcome::Finished(result)
}

/// Owned-argument form of [`run_job`] used as the scheduler's runner.
pub async fn run_scheduled(spec: JobSpec, ctx: Arc<RunContext>) -> RunOutcome {
    run_job(&spec, spec.timeout, &ctx).await
}

fn status_marker(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pass => "✔",
        JobStatus::Fail => "✘",
        JobStatus::Timeout => "⏱",
        JobStatus::Error => "!",
    }
}

/// Renders the command template, environment and working directory for a job,
/// wrapping it in a container run when one is configured.
pub fn build_invocation(
    spec: &JobSpec,
    ctx: &RunContext,
    job_dir: &Path,
    coverage_path: &Path,
) -> Result<Invocation, String> {
    let template = command_template(spec.backend, ctx);
    let build_dir = template
        .contains("{build_dir}")
        .then(|| ctx.build_dir(spec));

    let expanded = shellexpand::full(template)
        .map_err(|e| format!("failed to expand command template: {e}"))?;

    let results_path = job_dir.join(RESULTS_FILE);
    let plusargs = plusargs(spec, coverage_path);
    let build_path = build_dir.clone().unwrap_or_else(|| job_dir.join("sim_build"));

    let mut values: BTreeMap<String, String> = BTreeMap::new();
    values.insert("name".into(), spec.test.clone());
    values.insert("path".into(), spec.path.display().to_string());
    values.insert("backend".into(), spec.backend.to_string());
    values.insert("job_id".into(), spec.id.clone());
    values.insert("job_dir".into(), job_dir.display().to_string());
    values.insert("build_dir".into(), build_path.display().to_string());
    values.insert("results".into(), results_path.display().to_string());
    values.insert("coverage".into(), coverage_path.display().to_string());
    values.insert(
        "seed".into(),
        ctx.seed.map(|s| s.to_string()).unwrap_or_default(),
    );
    values.insert("plusargs".into(), plusargs);
    for (axis, value) in &spec.parameters {
        values.insert(format!("param.{axis}"), value.clone());
    }

    let rendered = render_template(&expanded, &values)?;
    let argv = shlex::split(&rendered)
        .filter(|parts| !parts.is_empty())
        .ok_or_else(|| format!("failed to parse command: {rendered}"))?;

    let mut env = vec![
        ("TESTCASE".to_string(), spec.test.clone()),
        ("SIM".to_string(), spec.backend.to_string()),
        ("JOB_ID".to_string(), spec.id.clone()),
        ("JOB_DIR".to_string(), job_dir.display().to_string()),
        ("BUILD_DIR".to_string(), build_path.display().to_string()),
        ("COCOTB_RESULTS_FILE".to_string(), results_path.display().to_string()),
        ("COVERAGE_FILE".to_string(), coverage_path.display().to_string()),
    ];
    if let Some(seed) = ctx.seed {
        env.push(("RANDOM_SEED".to_string(), seed.to_string()));
    }
    for (axis, value) in &spec.parameters {
        env.push((format!("PARAM_{}", env_key(axis)), value.clone()));
    }
    env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    match &ctx.container {
        None => Ok(Invocation {
            argv,
            env,
            cwd: ctx.project_root.clone(),
            build_dir,
        }),
        Some(container) => Ok(Invocation {
            build_dir,
            ..containerize(container, argv, env, spec, ctx, job_dir)
        }),
    }
}

/// Substitutes `{placeholder}`s. Unknown placeholders are an error so that a
/// typo in a template fails the job loudly instead of running a wrong command.
fn render_template(template: &str, values: &BTreeMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(format!("unterminated placeholder in '{template}'"));
        };
        let key = &after[..close];
        let value = values
            .get(key)
            .ok_or_else(|| format!("unknown placeholder '{{{key}}}' in command template"))?;
        out.push_str(&quote(value));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn quote(value: &str) -> Cow<'_, str> {
    if value.is_empty() {
        return Cow::Borrowed("''");
    }
    shlex::try_quote(value).unwrap_or(Cow::Borrowed(value))
}

fn env_key(axis: &str) -> String {
    axis.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn containerize(
    container: &ContainerConfig,
    inner: Vec<String>,
    env: Vec<(String, String)>,
    spec: &JobSpec,
    ctx: &RunContext,
    job_dir: &Path,
) -> Invocation {
    let mut argv = vec![
        container.engine.clone(),
        "run".to_string(),
        "--rm".to_string(),
        "--init".to_string(),
    ];
    #[cfg(unix)]
    {
        let uid = nix::unistd::getuid();
        let gid = nix::unistd::getgid();
        argv.push("--user".to_string());
        argv.push(format!("{uid}:{gid}"));
    }

    let mut mounts: Vec<PathBuf> = vec![ctx.project_root.clone(), ctx.run_dir.clone()];
    if spec.path.is_absolute() {
        mounts.push(spec.path.clone());
    }
    mounts.extend(container.mounts.iter().cloned());
    mounts.sort();
    mounts.dedup();
    for mount in mounts {
        argv.push("-v".to_string());
        argv.push(format!("{0}:{0}", mount.display()));
    }

    argv.push("-w".to_string());
    argv.push(ctx.project_root.display().to_string());
    for (key, value) in &env {
        argv.push("-e".to_string());
        argv.push(format!("{key}={value}"));
    }
    argv.extend(container.extra_args.iter().cloned());
    argv.push(container.image.clone());

    let script = shlex::try_join(inner.iter().map(String::as_str))
        .unwrap_or_else(|_| inner.join(" "));
    argv.push("sh".to_string());
    argv.push("-ec".to_string());
    argv.push(script);

    tracing::trace!(job = %spec.id, job_dir = %job_dir.display(), image = %container.image, "wrapped job in container");
    Invocation {
        argv,
        env: Vec::new(),
        cwd: ctx.project_root.clone(),
        build_dir: None,
    }
}
