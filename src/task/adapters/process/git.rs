//! Version-control gateway backed by the `git` command-line tool.

use super::command::{CommandOutput, WorkspaceLayout, run_command};
use crate::task::{
    domain::{BranchName, CommitHash},
    ports::{VcsError, VcsErrorKind, VcsResult, VersionControlGateway},
};
use async_trait::async_trait;
use camino::Utf8Path;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// `git` gateway keeping one worktree per task branch.
///
/// New branches start from the main repository's `HEAD` and are published
/// with upstream tracking. Worktree creation is serialized because `git`
/// takes repository-wide locks while adding worktrees.
#[derive(Debug)]
pub struct GitCli {
    layout: WorkspaceLayout,
    remote: String,
    worktree_lock: Mutex<()>,
}

impl GitCli {
    /// Creates a gateway for the repository described by `layout`.
    #[must_use]
    pub fn new(layout: WorkspaceLayout, remote: impl Into<String>) -> Self {
        Self {
            layout,
            remote: remote.into(),
            worktree_lock: Mutex::new(()),
        }
    }

    /// Returns the workspace layout.
    #[must_use]
    pub const fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    async fn git(&self, cwd: &Utf8Path, args: &[&str]) -> VcsResult<CommandOutput> {
        let output = run_command("git", args, cwd)
            .await
            .map_err(|err| VcsError::new(VcsErrorKind::CommandFailed, err.to_string()))?;
        if output.success() {
            Ok(output)
        } else {
            let message = output.diagnostics();
            Err(VcsError::new(classify_git_failure(&message), message))
        }
    }

    async fn local_branch_exists(&self, branch: &BranchName) -> VcsResult<bool> {
        let reference = format!("refs/heads/{branch}");
        let output = run_command(
            "git",
            &["rev-parse", "--verify", "--quiet", &reference],
            self.layout.repository(),
        )
        .await
        .map_err(|err| VcsError::new(VcsErrorKind::CommandFailed, err.to_string()))?;
        Ok(output.success())
    }

    async fn remote_branch_exists(&self, branch: &BranchName) -> VcsResult<bool> {
        let output = self
            .git(
                self.layout.repository(),
                &["ls-remote", "--heads", &self.remote, branch.as_str()],
            )
            .await?;
        Ok(!output.stdout.trim().is_empty())
    }

    /// Makes sure a worktree for `branch` exists, creating it from the local
    /// or remote branch.
    async fn ensure_worktree(&self, branch: &BranchName) -> VcsResult<()> {
        let path = self.layout.worktree_for(branch);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        let _guard = self.worktree_lock.lock().await;
        let repository = self.layout.repository();
        self.git(repository, &["worktree", "prune"]).await?;
        if self.local_branch_exists(branch).await? {
            self.git(repository, &["worktree", "add", path.as_str(), branch.as_str()])
                .await?;
        } else {
            self.git(repository, &["fetch", &self.remote, branch.as_str()])
                .await?;
            let tracking = format!("{}/{branch}", self.remote);
            self.git(
                repository,
                &[
                    "worktree",
                    "add",
                    "--track",
                    "-b",
                    branch.as_str(),
                    path.as_str(),
                    &tracking,
                ],
            )
            .await?;
        }
        debug!(branch = %branch, worktree = %path, "worktree ready");
        Ok(())
    }
}

#[async_trait]
impl VersionControlGateway for GitCli {
    #[instrument(skip(self), fields(branch = %branch))]
    async fn create_and_push_branch(&self, branch: &BranchName) -> VcsResult<()> {
        if self.local_branch_exists(branch).await? || self.remote_branch_exists(branch).await? {
            return Err(VcsError::new(
                VcsErrorKind::BranchExists,
                format!("a branch named '{branch}' already exists"),
            ));
        }

        let path = self.layout.worktree_for(branch);
        {
            let _guard = self.worktree_lock.lock().await;
            tokio::fs::create_dir_all(self.layout.worktrees())
                .await
                .map_err(|err| VcsError::new(VcsErrorKind::CommandFailed, err.to_string()))?;
            self.git(
                self.layout.repository(),
                &["worktree", "add", "-b", branch.as_str(), path.as_str(), "HEAD"],
            )
            .await?;
        }
        self.git(&path, &["push", "--set-upstream", &self.remote, branch.as_str()])
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(branch = %branch))]
    async fn checkout_and_pull(&self, branch: &BranchName) -> VcsResult<()> {
        self.ensure_worktree(branch).await?;
        let path = self.layout.worktree_for(branch);
        self.git(&path, &["pull", "--ff-only", &self.remote, branch.as_str()])
            .await?;
        Ok(())
    }

    async fn has_uncommitted_changes(&self, branch: &BranchName) -> VcsResult<bool> {
        let path = self.layout.worktree_for(branch);
        let output = self.git(&path, &["status", "--porcelain"]).await?;
        Ok(!output.stdout.trim().is_empty())
    }

    #[instrument(skip(self, message), fields(branch = %branch))]
    async fn commit_all(&self, branch: &BranchName, message: &str) -> VcsResult<CommitHash> {
        let path = self.layout.worktree_for(branch);
        self.git(&path, &["add", "--all"]).await?;
        self.git(&path, &["commit", "--message", message]).await?;
        let head = self.git(&path, &["rev-parse", "HEAD"]).await?;
        CommitHash::new(head.stdout.trim()).map_err(|err| {
            warn!(branch = %branch, error = %err, "unexpected rev-parse output");
            VcsError::new(VcsErrorKind::CommandFailed, err.to_string())
        })
    }

    #[instrument(skip(self), fields(branch = %branch))]
    async fn push(&self, branch: &BranchName) -> VcsResult<()> {
        let path = self.layout.worktree_for(branch);
        self.git(&path, &["push", &self.remote, branch.as_str()])
            .await?;
        Ok(())
    }
}

/// Maps `git` diagnostics to a failure category.
fn classify_git_failure(message: &str) -> VcsErrorKind {
    let lower = message.to_ascii_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

    if contains_any(&["not a git repository"]) {
        VcsErrorKind::NotARepository
    } else if contains_any(&["already exists"]) {
        VcsErrorKind::BranchExists
    } else if contains_any(&[
        "does not appear to be a git repository",
        "no such remote",
        "no configured push destination",
    ]) {
        VcsErrorKind::NoRemote
    } else if contains_any(&["[rejected]", "remote rejected", "pre-receive hook declined"]) {
        VcsErrorKind::Rejected
    } else if contains_any(&[
        "conflict",
        "not possible to fast-forward",
        "divergent branches",
        "would be overwritten by merge",
    ]) {
        VcsErrorKind::MergeConflict
    } else if contains_any(&[
        "could not resolve host",
        "unable to access",
        "connection refused",
        "connection timed out",
        "could not read from remote repository",
        "network is unreachable",
    ]) {
        VcsErrorKind::NetworkFailure
    } else {
        VcsErrorKind::CommandFailed
    }
}
