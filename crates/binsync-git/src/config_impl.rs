//! gix-backed config read/write.
//!
//! Writes go through a local config file snapshot rather than gix's
//! in-memory config, since gix does not yet expose a persisting config
//! writer; we shell out to `git config` for writes and read back through
//! gix's own snapshot so the two stay consistent.

use std::process::Command;

use crate::error::GitError;
use crate::gix_repo::GixRepo;

pub fn read_config(repo: &GixRepo, key: &str) -> Result<Option<String>, GitError> {
    let snapshot = repo.repo.config_snapshot();
    Ok(snapshot.string(key).map(|v| v.to_string()))
}

pub fn write_config(repo: &GixRepo, key: &str, value: &str) -> Result<(), GitError> {
    let output = Command::new("git")
        .arg("--git-dir")
        .arg(repo.repo.git_dir())
        .args(["config", key, value])
        .output()
        .map_err(GitError::IoError)?;

    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::BackendError {
            message: format!(
                "git config {key} {value} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }
}
