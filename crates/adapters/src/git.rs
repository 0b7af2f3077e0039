// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Git plumbing with in-memory credential injection.
//!
//! Credentials reach git through a short-lived askpass helper plus an
//! environment variable on the spawned process only. They are never
//! embedded in remote URLs, never written into repository config, and the
//! helper file (which contains no secret) is removed on release.

use gantry_core::Secret;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    /// Credential rejected by the remote.
    #[error("git auth: {0}")]
    Unauthorized(String),
    /// Network flake; retryable.
    #[error("git transient: {0}")]
    Transient(String),
    /// Anything else the remote or git itself refused.
    #[error("git failed: {0}")]
    Failed(String),
    #[error("git io: {0}")]
    Io(#[from] std::io::Error),
}

/// Classify git stderr into the retry taxonomy.
pub fn classify_stderr(stderr: &str) -> GitError {
    let lower = stderr.to_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("invalid credentials")
        || lower.contains("401")
        || lower.contains("403")
    {
        return GitError::Unauthorized(first_line(stderr));
    }
    if lower.contains("could not resolve host")
        || lower.contains("connection timed out")
        || lower.contains("connection reset")
        || lower.contains("early eof")
        || lower.contains("rpc failed")
        || lower.contains("transfer closed")
        || lower.contains("operation timed out")
        || lower.contains("temporarily unavailable")
        || lower.contains("503")
        || lower.contains("502")
    {
        return GitError::Transient(first_line(stderr));
    }
    GitError::Failed(first_line(stderr))
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("").trim().to_string()
}

/// Askpass helper answering git's credential prompts from the process
/// environment. The script itself carries no secret.
#[derive(Debug)]
pub struct CredentialHelper {
    script_path: PathBuf,
}

const ASKPASS_SCRIPT: &str = "#!/bin/sh\n\
case \"$1\" in\n\
  *sername*) printf '%s' \"x-access-token\" ;;\n\
  *) printf '%s' \"$GANTRY_GIT_TOKEN\" ;;\n\
esac\n";

impl CredentialHelper {
    /// Write the helper script (mode 0700) into `dir`.
    pub async fn create(dir: &Path) -> Result<Self, GitError> {
        tokio::fs::create_dir_all(dir).await?;
        let script_path = dir.join("askpass.sh");
        tokio::fs::write(&script_path, ASKPASS_SCRIPT).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o700))
                .await?;
        }
        Ok(Self { script_path })
    }

    /// Environment for one git invocation. The token lives only in the
    /// child's environment.
    pub fn env(&self, token: &Secret) -> Vec<(String, String)> {
        vec![
            ("GIT_ASKPASS".into(), self.script_path.display().to_string()),
            ("GANTRY_GIT_TOKEN".into(), token.expose().to_string()),
            ("GIT_TERMINAL_PROMPT".into(), "0".into()),
        ]
    }

    /// Remove the helper from disk.
    pub async fn wipe(self) {
        if let Err(e) = tokio::fs::remove_file(&self.script_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove askpass helper: {e}");
            }
        }
    }
}

async fn run_git(
    cwd: Option<&Path>,
    args: &[&str],
    env: &[(String, String)],
) -> Result<String, GitError> {
    let mut cmd = tokio::process::Command::new("git");
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd.args(args).stdin(std::process::Stdio::null());
    for (key, value) in env {
        cmd.env(key, value);
    }
    let output = cmd.output().await?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)))
    }
}

/// `git clone --depth 1` into `path`.
pub async fn clone_shallow(
    url: &str,
    branch: Option<&str>,
    path: &Path,
    env: &[(String, String)],
) -> Result<(), GitError> {
    let path_str = path.display().to_string();
    let mut args = vec!["clone", "--depth", "1", "--no-tags"];
    if let Some(branch) = branch {
        args.extend(["--branch", branch]);
    }
    args.extend([url, path_str.as_str()]);
    run_git(None, &args, env).await.map(|_| ())
}

/// Fetch a ref (shallow) from origin.
pub async fn fetch(path: &Path, refspec: &str, env: &[(String, String)]) -> Result<(), GitError> {
    run_git(path.into(), &["fetch", "--depth", "1", "origin", refspec], env).await.map(|_| ())
}

/// Fetch a pull request's merge ref and return the local ref name to
/// check out.
pub async fn fetch_pr_merge_ref(
    path: &Path,
    number: u64,
    env: &[(String, String)],
) -> Result<String, GitError> {
    let local = format!("refs/gantry/pr-{number}");
    let refspec = format!("pull/{number}/merge:{local}");
    fetch(path, &refspec, env).await?;
    Ok(local)
}

/// `git reset --hard <target>` after a `git checkout` of the target.
pub async fn checkout_hard(path: &Path, target: &str) -> Result<(), GitError> {
    run_git(path.into(), &["checkout", "--force", target], &[]).await?;
    run_git(path.into(), &["reset", "--hard"], &[]).await?;
    run_git(path.into(), &["clean", "-fd"], &[]).await.map(|_| ())
}

/// Current HEAD commit, or an error for a poisoned checkout.
pub async fn head_commit(path: &Path) -> Result<String, GitError> {
    run_git(path.into(), &["rev-parse", "HEAD"], &[]).await
}

/// Whether `path` looks like a healthy repository (a HEAD that resolves).
pub async fn is_healthy(path: &Path) -> bool {
    head_commit(path).await.is_ok()
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
