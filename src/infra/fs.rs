//! # File System Operations Module / 文件系统操作模块
//!
//! This module provides utilities for the per-job artifact directories and
//! for writing report files.
//!
//! 此模块为每个任务的产物目录以及报告文件写入提供实用功能。

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Replaces every character that is not alphanumeric, `.`, `-` or `_`
/// so a job id can be used as a single path component.
pub fn sanitize_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match sanitized.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => sanitized,
    }
}

/// Creates a fresh artifact directory for one attempt of a job.
///
/// Leftovers from an earlier attempt (a retry, or a previous run that reused
/// the same run directory) are removed so stale logs and coverage can never
/// be attributed to this attempt.
pub fn prepare_job_dir(job_dir: &Path) -> Result<PathBuf> {
    if job_dir.exists() {
        fs::remove_dir_all(job_dir).with_context(|| {
            format!("Failed to clean up old job directory: {}", job_dir.display())
        })?;
    }
    fs::create_dir_all(job_dir)
        .with_context(|| format!("Failed to create job directory: {}", job_dir.display()))?;
    Ok(job_dir.to_path_buf())
}

/// Writes `content` to `path`, creating parent directories as needed.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Gets the absolute path from a potentially relative path.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("Failed to resolve path: {}", path.display()))
}

/// Makes `path` absolute against the current directory without requiring it
/// to exist yet.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Failed to resolve path: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize_does_not_require_existence() {
        let resolved = absolutize(Path::new("verif_runs/not_created_yet")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("verif_runs/not_created_yet"));
        assert!(!resolved.exists());
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("uart.icarus.0123abcd"), "uart.icarus.0123abcd");
        assert_eq!(sanitize_component("a/b c"), "a_b_c");
        assert_eq!(sanitize_component(".."), "_");
    }

    #[test]
    fn test_prepare_job_dir_removes_stale_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let job = root.path().join("job");
        fs::create_dir_all(&job).unwrap();
        fs::write(job.join("sim.log"), "stale").unwrap();
        prepare_job_dir(&job).unwrap();
        assert!(job.is_dir());
        assert!(!job.join("sim.log").exists());
    }
}
