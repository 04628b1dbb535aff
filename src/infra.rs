//! # Infrastructure Module / 基础设施模块
//!
//! This module provides infrastructure services for verif-matrix:
//! supervised subprocess execution and file system operations.
//!
//! 此模块为 verif-matrix 提供基础设施服务：
//! 受监管的子进程执行和文件系统操作。

pub mod command;
pub mod fs;
