//! Version-control reader

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, SourceError};

/// Paths touched between a checkpoint and the current head, relative to the
/// tree root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Make the repository available locally and return the tree root.
    async fn checkout(&self, locator: &str) -> Result<PathBuf>;

    /// Files changed in `tree` since `since_ref`.
    async fn diff(&self, tree: &Path, since_ref: &str) -> Result<ChangeSet>;

    /// Ref of the checked-out head.
    async fn current_ref(&self, tree: &Path) -> Result<String>;
}

/// `git` command-line backend. Remote repositories are cloned under
/// `workspace`, one directory per locator.
pub struct GitCli {
    workspace: PathBuf,
}

impl GitCli {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    fn clone_dir(&self, locator: &str) -> PathBuf {
        let digest = blake3::hash(locator.as_bytes()).to_hex();
        self.workspace.join(&digest.as_str()[..16])
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn checkout(&self, locator: &str) -> Result<PathBuf> {
        let local = Path::new(locator);
        if local.join(".git").exists() {
            debug!(locator, "using local working tree");
            return Ok(local.to_path_buf());
        }

        let dest = self.clone_dir(locator);
        let fail = |reason: String| SourceError::Checkout {
            locator: locator.to_string(),
            reason,
        };

        if dest.join(".git").exists() {
            info!(locator, dest = %dest.display(), "updating clone");
            run_git(Some(&dest), &["pull", "--ff-only", "--quiet"])
                .await
                .map_err(fail)?;
        } else {
            tokio::fs::create_dir_all(&self.workspace).await?;
            info!(locator, dest = %dest.display(), "cloning repository");
            let dest_str = dest.to_string_lossy().to_string();
            run_git(None, &["clone", "--quiet", locator, &dest_str])
                .await
                .map_err(fail)?;
        }
        Ok(dest)
    }

    async fn diff(&self, tree: &Path, since_ref: &str) -> Result<ChangeSet> {
        let range = format!("{since_ref}..HEAD");
        let output = run_git(Some(tree), &["diff", "--name-status", "--no-renames", &range])
            .await
            .map_err(|reason| SourceError::Diff {
                since: since_ref.to_string(),
                reason,
            })?;
        Ok(parse_name_status(&output))
    }

    async fn current_ref(&self, tree: &Path) -> Result<String> {
        let output = run_git(Some(tree), &["rev-parse", "HEAD"])
            .await
            .map_err(|reason| SourceError::Checkout {
                locator: tree.display().to_string(),
                reason,
            })?;
        Ok(output.trim().to_string())
    }
}

/// Run git and return stdout, or stderr as the failure reason.
async fn run_git(dir: Option<&Path>, args: &[&str]) -> std::result::Result<String, String> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.arg("-C").arg(dir);
    }
    cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");

    let output = cmd
        .output()
        .await
        .map_err(|e| format!("failed to run git: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(stderr.trim().to_string());
    }

    String::from_utf8(output.stdout).map_err(|e| format!("invalid UTF-8 in git output: {e}"))
}

/// Parse `git diff --name-status` output.
fn parse_name_status(output: &str) -> ChangeSet {
    let mut set = ChangeSet::default();
    for line in output.lines() {
        let Some((status, path)) = line.split_once('\t') else {
            continue;
        };
        let path = PathBuf::from(path.trim());
        match status.chars().next() {
            Some('D') => set.deleted.push(path),
            Some(_) => set.changed.push(path),
            None => {}
        }
    }
    set
}
