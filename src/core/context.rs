//! # Run Context / 运行上下文
//!
//! Everything a run shares: its identity, where artifacts go, the settings
//! snapshot, the cancellation token and progress counters. Created once at run
//! start and handed down explicitly; there is no process-wide state.
//!
//! 一次运行共享的所有内容：运行标识、产物存放位置、设置快照、
//! 取消令牌和进度计数器。在运行开始时创建一次并显式向下传递；
//! 不存在进程级全局状态。

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::config::{BackendConfig, ContainerConfig};
use crate::core::models::{Backend, JobSpec};

/// Subdirectory of the run directory holding shared simulator builds.
pub const BUILD_DIR: &str = "build";

/// Progress counters, updated by the scheduler.
#[derive(Debug, Default)]
pub struct Progress {
    dispatched: AtomicUsize,
    completed: AtomicUsize,
    retried: AtomicUsize,
}

impl Progress {
    pub fn record_dispatch(&self) -> usize {
        self.dispatched.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_completion(&self) -> usize {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_retry(&self) -> usize {
        self.retried.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// `<output_dir>/<run_id>`; every job gets a subdirectory named by its id.
    pub run_dir: PathBuf,
    /// Directory command templates run in and relative paths resolve against.
    pub project_root: PathBuf,
    pub seed: Option<u64>,
    pub container: Option<ContainerConfig>,
    pub backend_commands: BTreeMap<Backend, BackendConfig>,
    pub cancel: CancellationToken,
    pub progress: Progress,
    build_locks: StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RunContext {
    /// Creates a context whose run directory lives under `output_dir`.
    /// The directory itself is created lazily by the job runner.
    pub fn new(output_dir: &Path, project_root: PathBuf) -> Self {
        let started_at = Utc::now();
        let run_id = format!("run_{}", started_at.format("%Y%m%d_%H%M%S_%3f"));
        Self {
            run_dir: output_dir.join(&run_id),
            run_id,
            started_at,
            project_root,
            seed: None,
            container: None,
            backend_commands: BTreeMap::new(),
            cancel: CancellationToken::new(),
            progress: Progress::default(),
            build_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_container(mut self, container: Option<ContainerConfig>) -> Self {
        self.container = container;
        self
    }

    pub fn with_backend_commands(mut self, commands: BTreeMap<Backend, BackendConfig>) -> Self {
        self.backend_commands = commands;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Artifact directory for one job.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.run_dir.join(crate::infra::fs::sanitize_component(job_id))
    }

    /// Shared build directory for every job with the same [`JobSpec::build_key`].
    pub fn build_dir(&self, spec: &JobSpec) -> PathBuf {
        self.run_dir.join(BUILD_DIR).join(spec.build_key())
    }

    /// The lock serializing jobs that compile into `build_dir`: the first
    /// holder compiles, later holders find the image up to date.
    pub fn build_lock(&self, build_dir: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.build_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(build_dir.to_path_buf()).or_default())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::RuntimeClass;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn spec(test: &str, width: &str) -> JobSpec {
        let parameters: BTreeMap<String, String> =
            [("width".to_string(), width.to_string())].into_iter().collect();
        JobSpec {
            id: JobSpec::derive_id(test, Backend::Verilator, &parameters),
            test: test.into(),
            path: PathBuf::from("/work/dv/uart"),
            backend: Backend::Verilator,
            parameters,
            runtime: RuntimeClass::Fast,
            tags: BTreeSet::new(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_testcases_of_one_bench_share_a_build_dir() {
        let ctx = RunContext::new(Path::new("/tmp/out"), PathBuf::from("/work"));
        let tx = spec("uart_tx", "8");
        let rx = spec("uart_rx", "8");
        let wide = spec("uart_tx", "32");

        assert_ne!(tx.id, rx.id);
        assert_eq!(ctx.build_dir(&tx), ctx.build_dir(&rx));
        assert_ne!(ctx.build_dir(&tx), ctx.build_dir(&wide));
        assert!(ctx.build_dir(&tx).starts_with(ctx.run_dir.join(BUILD_DIR)));
    }

    #[test]
    fn test_build_lock_is_shared_per_directory() {
        let ctx = RunContext::new(Path::new("/tmp/out"), PathBuf::from("/work"));
        let shared = ctx.build_dir(&spec("uart_tx", "8"));
        let other = ctx.build_dir(&spec("uart_tx", "32"));

        assert!(Arc::ptr_eq(&ctx.build_lock(&shared), &ctx.build_lock(&shared)));
        assert!(!Arc::ptr_eq(&ctx.build_lock(&shared), &ctx.build_lock(&other)));
    }
}
