//! # Error Types / 错误类型
//!
//! Only [`ConfigError`] may abort a run, and only before any job is scheduled.
//! Everything that goes wrong inside a job is recorded as data on its
//! `JobResult`; [`AggregationError`] demotes a single result to `ERROR`.
//!
//! 只有 [`ConfigError`] 可以中止运行，并且只会发生在调度任何任务之前。
//! 任务内部发生的错误都作为数据记录在其 `JobResult` 上；
//! [`AggregationError`] 只会将单个结果降级为 `ERROR`。

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration problems. Maps to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read matrix source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse matrix file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("malformed descriptor '{test}': {reason}")]
    MalformedDescriptor { test: String, reason: String },

    #[error("unknown simulator backend '{0}'")]
    UnknownBackend(String),

    #[error("invalid filter pattern '{pattern}': {message}")]
    InvalidFilter { pattern: String, message: String },

    #[error("filters and backends eliminated every test; nothing to run")]
    EmptyMatrix,

    #[error("invalid sharding: {0}")]
    InvalidSharding(String),
}

impl ConfigError {
    pub(crate) fn malformed(test: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::MalformedDescriptor {
            test: test.into(),
            reason: reason.into(),
        }
    }
}

/// A single job's artifacts could not be interpreted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("simulation log {0} is missing or unreadable")]
    MissingLog(PathBuf),

    #[error("exit status 0 but no regression summary found in the log")]
    MissingSummary,

    #[error("exit code {exit_code} contradicts a clean regression summary")]
    ContractMismatch { exit_code: i32 },

    #[error("coverage artifact {path} could not be parsed: {message}")]
    Coverage { path: PathBuf, message: String },
}
