//! Child-process helpers shared by the command-line gateways.

use camino::{Utf8Path, Utf8PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandOutput {
    /// Exit code, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Reports whether the command exited with status zero.
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns standard error, falling back to standard output when empty.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_owned()
        } else {
            stderr.to_owned()
        }
    }
}

/// Runs `program` with `args` in `cwd` and captures its output.
///
/// # Errors
///
/// Returns the spawn error when the program cannot be started.
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Utf8Path,
) -> std::io::Result<CommandOutput> {
    debug!(cwd = %cwd, command = %render_command_line(program, args), "running command");
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;
    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Renders a command line for logs, quoting every argument.
pub(crate) fn render_command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_owned();
    for arg in args {
        line.push(' ');
        line.push_str(&shell_escape(arg));
    }
    line
}

/// Escapes a value for safe inclusion in a POSIX shell command.
///
/// Uses single-quote wrapping and the standard `'\''` sequence for embedded
/// quotes.
#[must_use]
pub fn shell_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

/// Directory layout for per-branch working trees.
///
/// Each task branch is checked out in its own worktree so that concurrent
/// tasks never share a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    repository: Utf8PathBuf,
    worktrees: Utf8PathBuf,
}

impl WorkspaceLayout {
    /// Creates a layout for `repository` with worktrees under `worktrees`.
    #[must_use]
    pub fn new(repository: impl Into<Utf8PathBuf>, worktrees: impl Into<Utf8PathBuf>) -> Self {
        Self {
            repository: repository.into(),
            worktrees: worktrees.into(),
        }
    }

    /// Returns the main repository path.
    #[must_use]
    pub fn repository(&self) -> &Utf8Path {
        &self.repository
    }

    /// Returns the directory holding every worktree.
    #[must_use]
    pub fn worktrees(&self) -> &Utf8Path {
        &self.worktrees
    }

    /// Returns the worktree path for `branch`.
    #[must_use]
    pub fn worktree_for(&self, branch: &crate::task::domain::BranchName) -> Utf8PathBuf {
        self.worktrees.join(branch.to_path_segment())
    }
}
