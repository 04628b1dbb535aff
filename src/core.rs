//! # Core Module / 核心模块
//!
//! This module contains the core functionality of verif-matrix: the data
//! model, the matrix store and expander, the job runner, the scheduler and
//! the result aggregator.
//!
//! 此模块包含 verif-matrix 的核心功能：数据模型、矩阵存储与展开、
//! 任务运行器、调度器以及结果聚合器。

pub mod adapters;
pub mod aggregate;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod models;
pub mod planner;
pub mod scheduler;

// Re-exports
pub use aggregate::aggregate;
pub use config::MatrixConfig;
pub use context::RunContext;
pub use error::{AggregationError, ConfigError};
pub use execution::run_job;
pub use models::{JobResult, JobSpec, JobStatus, Verdict};
pub use scheduler::{RetryPolicy, ScheduleOutcome};
