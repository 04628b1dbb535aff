//! # verif-matrix Library / verif-matrix 库
//!
//! This library provides the core functionality for verif-matrix, a
//! configuration-driven runner that expands a declarative verification matrix
//! into simulator jobs, runs them on a bounded worker pool and folds the
//! results into one gating verdict.
//!
//! 此库为 verif-matrix 提供核心功能。它将声明式验证矩阵展开为仿真任务，
//! 在有界工作者池上运行这些任务，并将结果折叠为一个用于门控的结论。
//!
//! ## Modules / 模块
//!
//! - `core` - Data model, matrix expansion, job execution, scheduling and aggregation
//! - `infra` - Infrastructure services like command execution and file system operations
//! - `reporting` - Verdict rendering for the console, JSON and HTML
//! - `cli` - Command-line interface and commands
//!
//! - `core` - 数据模型、矩阵展开、任务执行、调度与聚合
//! - `infra` - 基础设施服务，如命令执行和文件系统操作
//! - `reporting` - 面向控制台、JSON 和 HTML 的结论渲染
//! - `cli` - 命令行接口和命令

pub mod cli;
pub mod core;
pub mod infra;
pub mod reporting;

// Re-export commonly used items
pub use core::config;
pub use core::execution;
pub use core::models;
