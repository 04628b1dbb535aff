//! # Matrix Expansion Planner Module / 矩阵展开计划模块
//!
//! This module turns validated test descriptors into the flat, ordered list of
//! jobs for a run: filtering by name and tag, crossing each descriptor with its
//! simulator backends and parameter axes, and optionally splitting the result
//! across several CI runners.
//!
//! 此模块将已验证的测试描述转换为一次运行的扁平有序任务列表：
//! 按名称和标签过滤，将每个描述与其仿真器后端和参数轴做笛卡尔积，
//! 并可选择在多个 CI 运行器之间拆分结果。

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::core::config::{MatrixConfig, Settings, TestDescriptor};
use crate::core::error::ConfigError;
use crate::core::models::{Backend, JobSpec, RuntimeClass};

/// Built-in timeout used when neither the CLI nor `[settings]` sets one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
/// Built-in multiplier applied to `runtime = "slow"` tests.
pub const DEFAULT_SLOW_FACTOR: u32 = 4;

/// Which descriptors take part in a run. Empty lists admit everything.
#[derive(Debug, Clone, Default)]
pub struct MatrixFilter {
    /// Glob patterns matched against the test name; any match admits.
    pub name_globs: Vec<String>,
    /// A descriptor is admitted when it carries at least one of these tags.
    pub tags: Vec<String>,
}

impl MatrixFilter {
    fn compile(&self) -> Result<Option<GlobSet>, ConfigError> {
        if self.name_globs.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.name_globs {
            let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidFilter {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map(Some)
            .map_err(|e| ConfigError::InvalidFilter {
                pattern: self.name_globs.join(","),
                message: e.to_string(),
            })
    }
}

/// How the effective per-job timeout is derived.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    pub default: Duration,
    pub slow_factor: u32,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            slow_factor: DEFAULT_SLOW_FACTOR,
        }
    }
}

impl TimeoutPolicy {
    /// The CLI value wins over `[settings]`, which wins over the built-in defaults.
    pub fn resolve(cli_timeout_secs: Option<u64>, settings: &Settings) -> Self {
        let defaults = Self::default();
        Self {
            default: cli_timeout_secs
                .or(settings.timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.default),
            slow_factor: settings.slow_timeout_factor.unwrap_or(defaults.slow_factor),
        }
    }

    /// A descriptor's own `timeout_secs` wins; otherwise the default applies,
    /// multiplied for slow tests.
    pub fn for_descriptor(&self, descriptor: &TestDescriptor) -> Duration {
        if let Some(secs) = descriptor.timeout_secs {
            return Duration::from_secs(secs);
        }
        match descriptor.runtime {
            RuntimeClass::Fast => self.default,
            RuntimeClass::Slow => self.default.saturating_mul(self.slow_factor.max(1)),
        }
    }
}

/// Expands descriptors into the ordered job list.
///
/// Filters run first so that excluded descriptors are never crossed with
/// their axes. `requested_backends` is intersected with each descriptor's
/// supported set; an empty request keeps all supported backends.
///
/// Jobs are ordered by test name, then backend name, then parameter tuple,
/// so identical inputs always produce the identical list.
///
/// # Errors
/// `ConfigError::EmptyMatrix` when nothing survives filtering and backend
/// selection; `ConfigError::InvalidFilter` for a bad glob.
pub fn expand(
    descriptors: &[TestDescriptor],
    requested_backends: &[Backend],
    filters: &MatrixFilter,
    timeouts: &TimeoutPolicy,
) -> Result<Vec<JobSpec>, ConfigError> {
    let admitted = apply_filters(descriptors, filters)?;
    if admitted.is_empty() {
        return Err(ConfigError::EmptyMatrix);
    }

    let mut jobs = Vec::new();
    for descriptor in admitted {
        let timeout = timeouts.for_descriptor(descriptor);
        let assignments = parameter_assignments(&descriptor.parameters);
        for backend in &descriptor.backends {
            if !requested_backends.is_empty() && !requested_backends.contains(backend) {
                continue;
            }
            for parameters in &assignments {
                jobs.push(JobSpec {
                    id: JobSpec::derive_id(&descriptor.name, *backend, parameters),
                    test: descriptor.name.clone(),
                    path: descriptor.path.clone(),
                    backend: *backend,
                    parameters: parameters.clone(),
                    runtime: descriptor.runtime,
                    tags: descriptor.tags.clone(),
                    env: descriptor.env.clone(),
                    timeout,
                });
            }
        }
    }

    jobs.sort_by(|a, b| {
        a.test
            .cmp(&b.test)
            .then_with(|| a.backend.as_str().cmp(b.backend.as_str()))
            .then_with(|| a.parameters.iter().cmp(b.parameters.iter()))
    });

    let mut seen = HashSet::new();
    jobs.retain(|job| seen.insert(job.id.clone()));

    if jobs.is_empty() {
        return Err(ConfigError::EmptyMatrix);
    }
    Ok(jobs)
}

fn apply_filters<'a>(
    descriptors: &'a [TestDescriptor],
    filters: &MatrixFilter,
) -> Result<Vec<&'a TestDescriptor>, ConfigError> {
    let globs = filters.compile()?;
    Ok(descriptors
        .iter()
        .filter(|d| globs.as_ref().is_none_or(|set| set.is_match(&d.name)))
        .filter(|d| filters.tags.is_empty() || filters.tags.iter().any(|t| d.tags.contains(t)))
        .collect())
}

/// Cross product of every axis. No axes yields a single empty assignment.
fn parameter_assignments(axes: &BTreeMap<String, Vec<String>>) -> Vec<BTreeMap<String, String>> {
    let mut assignments = vec![BTreeMap::new()];
    for (axis, values) in axes {
        let mut next = Vec::with_capacity(assignments.len() * values.len());
        for partial in &assignments {
            for value in values {
                let mut extended = partial.clone();
                extended.insert(axis.clone(), value.clone());
                next.push(extended);
            }
        }
        assignments = next;
    }
    assignments
}

/// Everything the planner needs beyond the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub backends: Vec<Backend>,
    pub filter: MatrixFilter,
    pub timeouts: TimeoutPolicy,
    pub total_runners: Option<usize>,
    pub runner_index: Option<usize>,
}

/// Represents a complete execution plan for a verification matrix.
/// 表示验证矩阵的完整执行计划。
#[derive(Debug)]
pub struct ExecutionPlan {
    /// The jobs this runner executes, in submission order.
    /// 此运行器要执行的任务，按提交顺序排列。
    pub jobs: Vec<JobSpec>,
    /// Jobs in the full matrix before sharding.
    /// 分片前完整矩阵中的任务数。
    pub matrix_size: usize,
    /// Descriptors excluded by name or tag filters.
    /// 被名称或标签过滤器排除的描述数量。
    pub filtered_out: usize,
    /// Jobs in this plan belonging to slow tests.
    pub slow_jobs: usize,
    /// Whether the matrix is split across several runners (CI environment).
    /// 矩阵是否分布在多个运行器上（CI 环境）。
    pub is_distributed: bool,
}

/// Creates the execution plan for a loaded matrix.
///
/// Expansion happens on the full matrix before sharding, so every runner of
/// a split CI job sees the same global order and takes every N-th job.
pub fn plan(config: &MatrixConfig, request: &PlanRequest) -> Result<ExecutionPlan, ConfigError> {
    let jobs = expand(
        &config.descriptors,
        &request.backends,
        &request.filter,
        &request.timeouts,
    )?;
    let matrix_size = jobs.len();
    let admitted = apply_filters(&config.descriptors, &request.filter)?.len();
    let filtered_out = config.descriptors.len() - admitted;

    let (jobs, is_distributed) = match (request.total_runners, request.runner_index) {
        (Some(total), Some(index)) => {
            if total == 0 {
                return Err(ConfigError::InvalidSharding(
                    "--total-runners must be at least 1".to_string(),
                ));
            }
            if index >= total {
                return Err(ConfigError::InvalidSharding(
                    "runner index must be less than total runners".to_string(),
                ));
            }
            let shard: Vec<_> = jobs
                .into_iter()
                .enumerate()
                .filter(|(i, _)| i % total == index)
                .map(|(_, job)| job)
                .collect();
            (shard, true)
        }
        (None, None) => (jobs, false),
        _ => {
            return Err(ConfigError::InvalidSharding(
                "both --total-runners and --runner-index must be provided".to_string(),
            ));
        }
    };

    let slow_jobs = jobs
        .iter()
        .filter(|j| j.runtime == RuntimeClass::Slow)
        .count();

    Ok(ExecutionPlan {
        jobs,
        matrix_size,
        filtered_out,
        slow_jobs,
        is_distributed,
    })
}
