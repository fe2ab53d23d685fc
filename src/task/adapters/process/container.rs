//! Execution gateway that runs the coding agent in a Docker container.

use super::command::{WorkspaceLayout, render_command_line, run_command};
use crate::task::ports::{
    ExecutionContext, ExecutionError, ExecutionErrorKind, ExecutionGateway, ExecutionOutcome,
    ExecutionResult,
};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mount point of the task worktree inside the container.
const CONTAINER_WORKDIR: &str = "/workspace";

/// Exit status `docker run` reports when the daemon could not start the
/// container.
const DOCKER_DAEMON_FAILURE: i32 = 125;

/// Grace period between SIGTERM and SIGKILL on cancellation.
const TERMINATION_GRACE: Duration = Duration::from_secs(10);

/// Container settings for [`DockerRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    /// Image containing the agent CLI.
    pub image: String,
    /// Model flag passed to the agent CLI.
    pub model: String,
}

/// Execution gateway that launches one throwaway container per run.
///
/// The branch worktree is mounted read-write at `/workspace`; the agent
/// edits files there and the orchestrator commits them afterwards.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    layout: WorkspaceLayout,
    settings: ContainerSettings,
}

impl DockerRunner {
    /// Creates a runner mounting worktrees from `layout`.
    #[must_use]
    pub const fn new(layout: WorkspaceLayout, settings: ContainerSettings) -> Self {
        Self { layout, settings }
    }

    fn docker_args(&self, context: &ExecutionContext, name: &str) -> Vec<String> {
        let worktree = self.layout.worktree_for(&context.branch);
        vec![
            "run".to_owned(),
            "--rm".to_owned(),
            "--name".to_owned(),
            name.to_owned(),
            "--volume".to_owned(),
            format!("{worktree}:{CONTAINER_WORKDIR}"),
            "--workdir".to_owned(),
            CONTAINER_WORKDIR.to_owned(),
            self.settings.image.clone(),
            "claude".to_owned(),
            "--dangerously-skip-permissions".to_owned(),
            "--model".to_owned(),
            self.settings.model.clone(),
            "-p".to_owned(),
            context.prompt.clone(),
        ]
    }

    /// Stops the client process and removes the container it started.
    async fn abort(&self, child: &mut Child, name: &str) {
        terminate(child);
        if tokio::time::timeout(TERMINATION_GRACE, child.wait())
            .await
            .is_err()
        {
            if let Err(err) = child.kill().await {
                warn!(container = name, error = %err, "failed to kill docker client");
            }
        }
        match run_command("docker", &["rm", "--force", name], self.layout.repository()).await {
            Ok(output) if output.success() => debug!(container = name, "removed container"),
            Ok(output) => debug!(
                container = name,
                diagnostics = %output.diagnostics(),
                "container already gone"
            ),
            Err(err) => warn!(container = name, error = %err, "failed to remove container"),
        }
    }
}

#[async_trait]
impl ExecutionGateway for DockerRunner {
    #[instrument(
        skip(self, context, cancel),
        fields(task_id = %context.task_id, run = context.run)
    )]
    async fn run(
        &self,
        context: &ExecutionContext,
        cancel: CancellationToken,
    ) -> ExecutionResult<ExecutionOutcome> {
        let name = format!("taskwright-{}-run-{}", context.task_id.short(), context.run);
        let args = self.docker_args(context, &name);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        debug!(command = %render_command_line("docker", &arg_refs), "starting container");

        let mut child = Command::new("docker")
            .args(&args)
            .current_dir(self.layout.repository())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                ExecutionError::new(ExecutionErrorKind::Unavailable, err.to_string())
            })?;
        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        let waited = tokio::select! {
            status = child.wait() => status,
            () = cancel.cancelled() => {
                info!(container = %name, "cancelling run");
                self.abort(&mut child, &name).await;
                stdout.abort();
                stderr.abort();
                return Err(ExecutionError::cancelled(format!("container {name} was stopped")));
            }
        };
        let status = waited
            .map_err(|err| ExecutionError::new(ExecutionErrorKind::Crashed, err.to_string()))?;

        let mut output_log = stdout.await.unwrap_or_default();
        let errors = stderr.await.unwrap_or_default();
        if !errors.is_empty() {
            if !output_log.is_empty() && !output_log.ends_with('\n') {
                output_log.push('\n');
            }
            output_log.push_str(&errors);
        }
        outcome_from_status(status, output_log)
    }
}

fn outcome_from_status(
    status: ExitStatus,
    output_log: String,
) -> ExecutionResult<ExecutionOutcome> {
    match status.code() {
        Some(0) => Ok(ExecutionOutcome::succeeded(output_log)),
        Some(DOCKER_DAEMON_FAILURE) => Err(ExecutionError::new(
            ExecutionErrorKind::Unavailable,
            output_log,
        )),
        Some(code) => Ok(ExecutionOutcome::failed(output_log, code)),
        None => Err(ExecutionError::new(
            ExecutionErrorKind::Crashed,
            format!("container terminated by signal\n{output_log}"),
        )),
    }
}

async fn read_all<R: AsyncRead + Unpin>(source: Option<R>) -> String {
    let Some(mut reader) = source else {
        return String::new();
    };
    let mut bytes = Vec::new();
    if let Err(err) = reader.read_to_end(&mut bytes).await {
        warn!(error = %err, "failed to read container output");
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Asks the docker client to stop; it forwards the signal to the container.
#[cfg(unix)]
fn terminate(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|raw| i32::try_from(raw).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, error = %err, "SIGTERM not delivered");
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "kill not delivered");
    }
}
