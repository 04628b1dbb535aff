//! # Scheduler Module / 调度模块
//!
//! Runs a list of jobs on a bounded pool of workers. Workers pull from one
//! shared pending queue, claim the job id while it runs, re-enqueue retryable
//! outcomes and stop pulling as soon as the run is cancelled. The scheduler is
//! the only component that decides the run is over.
//!
//! 在有界的工作者池上运行任务列表。工作者从一个共享的待处理队列中取任务，
//! 在运行期间占用任务 id，对可重试的结果重新入队，并在运行被取消后立即停止取任务。
//! 调度器是唯一决定运行结束的组件。

use colored::*;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::context::RunContext;
use crate::core::execution::{LOG_FILE, RunOutcome};
use crate::core::models::{JobResult, JobSpec, JobStatus};

/// Which outcomes are retried, and how often.
///
/// FAIL is treated as a deterministic verification failure and ERROR needs
/// manual triage, so by default only TIMEOUT is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_on: Vec<JobStatus>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_on: vec![JobStatus::Timeout],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_retry_on(mut self, statuses: Vec<JobStatus>) -> Self {
        self.retry_on = statuses
            .into_iter()
            .filter(|s| *s != JobStatus::Pass)
            .collect();
        self
    }

    pub fn should_retry(&self, status: JobStatus, retries_used: u32) -> bool {
        status != JobStatus::Pass && self.retry_on.contains(&status) && retries_used < self.max_retries
    }
}

/// What the scheduler hands to the aggregator.
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// One result per completed job, in submission order.
    pub results: Vec<JobResult>,
    pub cancelled: bool,
    /// Jobs that never produced a result (only non-zero when cancelled).
    pub not_run: usize,
}

#[derive(Debug)]
struct Pending {
    index: usize,
    spec: JobSpec,
    retries: u32,
}

#[derive(Debug, Default)]
struct Queue {
    pending: VecDeque<Pending>,
    in_flight: HashSet<String>,
}

impl Queue {
    /// Takes the first pending job whose id is not already running.
    fn claim(&mut self) -> Option<Pending> {
        let position = self
            .pending
            .iter()
            .position(|p| !self.in_flight.contains(&p.spec.id))?;
        let job = self.pending.remove(position)?;
        self.in_flight.insert(job.spec.id.clone());
        Some(job)
    }

    fn release(&mut self, id: &str) {
        self.in_flight.remove(id);
    }
}

/// Executes `jobs` with at most `concurrency` running at once.
///
/// `runner` performs a single attempt; in production it wraps
/// [`crate::core::execution::run_job`]. Each attempt runs in its own task, so
/// a panicking runner yields an ERROR result instead of losing the job.
///
/// Without cancellation every submitted job appears exactly once in the
/// output. With cancellation, queued jobs are dropped, in-flight jobs are
/// killed by the runner, and results completed so far are kept.
pub async fn execute<F, Fut>(
    jobs: Vec<JobSpec>,
    concurrency: usize,
    retry_policy: &RetryPolicy,
    ctx: Arc<RunContext>,
    runner: F,
) -> ScheduleOutcome
where
    F: Fn(JobSpec, Arc<RunContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RunOutcome> + Send + 'static,
{
    let total = jobs.len();
    let queue = Arc::new(Mutex::new(Queue {
        pending: jobs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Pending {
                index,
                spec,
                retries: 0,
            })
            .collect(),
        in_flight: HashSet::new(),
    }));
    let completed: Arc<Mutex<Vec<(usize, JobResult)>>> =
        Arc::new(Mutex::new(Vec::with_capacity(total)));
    let runner = Arc::new(runner);
    let policy = Arc::new(retry_policy.clone());

    let workers = concurrency.max(1).min(total.max(1));
    tracing::info!(jobs = total, workers, max_retries = policy.max_retries, "starting scheduler");

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            tokio::spawn(worker_loop(
                worker,
                total,
                Arc::clone(&queue),
                Arc::clone(&completed),
                Arc::clone(&runner),
                Arc::clone(&policy),
                Arc::clone(&ctx),
            ))
        })
        .collect();

    for joined in futures::future::join_all(handles).await {
        if let Err(e) = joined {
            tracing::error!("scheduler worker terminated unexpectedly: {e}");
        }
    }

    let mut completed = std::mem::take(&mut *completed.lock().await);
    completed.sort_by_key(|(index, _)| *index);
    let results: Vec<JobResult> = completed.into_iter().map(|(_, r)| r).collect();
    let cancelled = ctx.is_cancelled();
    let not_run = total - results.len();
    if !cancelled && not_run > 0 {
        tracing::error!(not_run, "jobs finished without a result");
    }

    ScheduleOutcome {
        results,
        cancelled,
        not_run,
    }
}

async fn worker_loop<F, Fut>(
    worker: usize,
    total: usize,
    queue: Arc<Mutex<Queue>>,
    completed: Arc<Mutex<Vec<(usize, JobResult)>>>,
    runner: Arc<F>,
    policy: Arc<RetryPolicy>,
    ctx: Arc<RunContext>,
) where
    F: Fn(JobSpec, Arc<RunContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RunOutcome> + Send + 'static,
{
    loop {
        if ctx.is_cancelled() {
            tracing::debug!(worker, "cancelled; not dispatching further jobs");
            return;
        }
        let Some(job) = queue.lock().await.claim() else {
            return;
        };
        ctx.progress.record_dispatch();
        tracing::debug!(worker, job = %job.spec.id, attempt = job.retries + 1, "dispatching");

        let attempt = tokio::spawn(runner(job.spec.clone(), Arc::clone(&ctx)));
        let outcome = match attempt.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let log_path = ctx.job_dir(&job.spec.id).join(LOG_FILE);
                let mut result = JobResult::new(&job.spec, JobStatus::Error, Duration::ZERO, log_path);
                result.detail = Some(format!("job runner failed: {e}"));
                RunOutcome::Finished(result)
            }
        };

        let mut result = match outcome {
            RunOutcome::Finished(result) => result,
            RunOutcome::Cancelled => {
                queue.lock().await.release(&job.spec.id);
                return;
            }
        };
        result.retries = job.retries;

        if policy.should_retry(result.status, job.retries) && !ctx.is_cancelled() {
            ctx.progress.record_retry();
            println!(
                "{}",
                format!(
                    "↻ {} {}: retry {}/{}",
                    job.spec.id,
                    result.status,
                    job.retries + 1,
                    policy.max_retries
                )
                .yellow()
            );
            let mut q = queue.lock().await;
            q.release(&job.spec.id);
            q.pending.push_back(Pending {
                index: job.index,
                spec: job.spec,
                retries: job.retries + 1,
            });
            continue;
        }

        completed.lock().await.push((job.index, result));
        queue.lock().await.release(&job.spec.id);
        let done = ctx.progress.record_completion();
        tracing::info!(worker, job = %job.spec.id, "[{done}/{total}] complete");
    }
}
