//! # Init Command Module / 初始化命令模块
//!
//! This module implements the `init` command, which writes a commented
//! sample matrix file to get a project started.
//!
//! 此模块实现了 `init` 命令，用于写入一个带注释的示例矩阵文件以便快速开始。

use anyhow::{Result, bail};
use colored::*;
use std::path::Path;

use crate::core::config::SAMPLE_MATRIX;
use crate::infra::fs::write_file;

/// Writes [`SAMPLE_MATRIX`] to `path`. An existing file is only replaced
/// when `force` is set.
pub fn execute(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    write_file(path, SAMPLE_MATRIX)?;
    println!(
        "{} {}",
        "✓ Wrote sample matrix to".green(),
        path.display().to_string().cyan()
    );
    println!("  Edit the [[tests]] entries, then run `verif-matrix list` to preview the jobs.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TestMatrix.toml");
        fs::write(&path, "keep me").unwrap();

        assert!(execute(&path, false).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep me");

        execute(&path, true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE_MATRIX);
    }
}
