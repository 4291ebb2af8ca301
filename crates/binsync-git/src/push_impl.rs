//! Push operations via git CLI fallback.
//!
//! Push is the one operation kept as a CLI subprocess because gix does not
//! yet provide a high-level push API (transport negotiation, credential
//! helpers, and smart-HTTP/SSH handling are left to the system's own git).

use std::process::Command;

use crate::error::GitError;
use crate::gix_repo::GixRepo;

fn git_dir(repo: &GixRepo) -> &std::path::Path {
    repo.repo.git_dir()
}

fn run_git(repo: &GixRepo, args: &[&str]) -> Result<(), GitError> {
    let output = Command::new("git")
        .arg("--git-dir")
        .arg(git_dir(repo))
        .args(args)
        .output()
        .map_err(GitError::IoError)?;

    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::PushFailed {
            remote: args.first().map(|s| (*s).to_owned()).unwrap_or_default(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

pub fn push_branch(
    repo: &GixRepo,
    remote: &str,
    local_ref: &str,
    remote_ref: &str,
    force: bool,
) -> Result<(), GitError> {
    let refspec = format!("{local_ref}:{remote_ref}");
    let mut args = vec!["push"];
    if force {
        args.push("--force");
    }
    args.push(remote);
    args.push(&refspec);
    run_git(repo, &args).map_err(|e| match e {
        GitError::PushFailed { message, .. } => GitError::PushFailed {
            remote: remote.to_owned(),
            message,
        },
        other => other,
    })
}

pub fn push_tag(repo: &GixRepo, remote: &str, tag: &str) -> Result<(), GitError> {
    run_git(repo, &["push", remote, "tag", tag]).map_err(|e| match e {
        GitError::PushFailed { message, .. } => GitError::PushFailed {
            remote: remote.to_owned(),
            message,
        },
        other => other,
    })
}

pub fn fetch_ref(
    repo: &GixRepo,
    remote: &str,
    remote_ref: &str,
    local_ref: &str,
) -> Result<(), GitError> {
    let refspec = format!("{remote_ref}:{local_ref}");
    run_git(repo, &["fetch", remote, &refspec]).map_err(|e| match e {
        GitError::PushFailed { message, .. } => GitError::FetchFailed {
            remote: remote.to_owned(),
            message,
        },
        other => other,
    })
}
