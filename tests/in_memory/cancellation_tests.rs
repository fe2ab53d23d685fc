//! Cancellation, timeouts, shutdown and restart recovery.

use super::helpers::{Harness, harness, with_max_concurrent, with_timeout};
use eyre::{Result, ensure, eyre};
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use taskwright::task::{
    adapters::memory::VcsOperation,
    domain::TaskStatus,
    ports::TaskStore,
    services::{INTERRUPTED_BY_RESTART, OrchestratorSettings},
};

const START_TIMEOUT: Duration = Duration::from_secs(5);

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cancelling_a_running_task_fails_it(harness: Harness) -> Result<()> {
    harness.execution.hold();
    let id = harness.submit("rewrite the scheduler").await?;
    ensure!(harness.execution.wait_for_started(1, START_TIMEOUT).await);

    let cancelled = harness.orchestrator.cancel(&id.to_string()).await?;
    ensure!(cancelled == id);

    let task = harness.settle(id).await?;
    ensure!(task.status() == TaskStatus::Failed);
    ensure!(
        task.error_detail()
            .is_some_and(|detail| detail.contains("cancelled by request")),
        "detail was {:?}",
        task.error_detail()
    );
    ensure!(harness.execution.cancelled_runs() == 1);
    ensure!(harness.vcs.call_count(VcsOperation::CommitAll) == 0);
    ensure!(task.pull_request_ref().is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cancel_is_accepted_as_soon_as_running_is_published(harness: Harness) -> Result<()> {
    let mut events = harness.orchestrator.subscribe();
    harness.execution.hold();
    let id = harness.submit("trim the vendored sources").await?;

    let reached_running = async {
        loop {
            let event = events.recv().await?;
            if event.task_id == id && event.to == TaskStatus::Running {
                return Ok::<_, eyre::Report>(());
            }
        }
    };
    tokio::time::timeout(START_TIMEOUT, reached_running).await??;

    let cancelled = harness.orchestrator.cancel(&id.to_string()).await?;
    ensure!(cancelled == id);

    let task = harness.settle(id).await?;
    ensure!(task.status() == TaskStatus::Failed);
    ensure!(
        task.error_detail()
            .is_some_and(|detail| detail.contains("cancelled by request"))
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn execution_past_the_ceiling_times_out() -> Result<()> {
    let harness = Harness::new(with_timeout(Duration::from_millis(50)));
    harness.execution.hold();
    let id = harness.submit("port the build to nix").await?;

    let task = harness.settle(id).await?;

    ensure!(task.status() == TaskStatus::Failed);
    ensure!(
        task.error_detail()
            .is_some_and(|detail| detail.contains("timed out"))
    );
    ensure!(harness.execution.cancelled_runs() == 1);
    let output = harness.orchestrator.output(&id.to_string(), None).await?;
    ensure!(output.log.contains("timed out"));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn shutdown_fails_running_work_and_keeps_queued_work() -> Result<()> {
    let harness = Harness::new(with_max_concurrent(1));
    harness.execution.hold();
    let running = harness.submit("first change").await?;
    ensure!(harness.execution.wait_for_started(1, START_TIMEOUT).await);
    let queued = harness.submit("second change").await?;

    harness.orchestrator.shutdown().await;

    let stopped = harness
        .store
        .get(running)
        .await?
        .ok_or_else(|| eyre!("running task stored"))?;
    ensure!(stopped.status() == TaskStatus::Failed);
    ensure!(
        stopped
            .error_detail()
            .is_some_and(|detail| detail.contains("shut down"))
    );
    let waiting = harness
        .store
        .get(queued)
        .await?
        .ok_or_else(|| eyre!("queued task stored"))?;
    ensure!(waiting.status() == TaskStatus::Submitted);
    ensure!(harness.orchestrator.active_count() == 0);

    let restarted = Harness::over(Arc::clone(&harness.store), OrchestratorSettings::default());
    let report = restarted.orchestrator.recover().await?;
    ensure!(report.requeued == vec![queued]);
    ensure!(report.interrupted.is_empty());
    let resumed = restarted.settle(queued).await?;
    ensure!(resumed.status() == TaskStatus::Completed);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn restart_marks_mid_flight_tasks_interrupted(harness: Harness) -> Result<()> {
    harness.execution.hold();
    let id = harness.submit("migrate the database layer").await?;
    ensure!(harness.execution.wait_for_started(1, START_TIMEOUT).await);

    // A second daemon over the same records sees the task mid-flight with no
    // worker of its own.
    let restarted = Harness::over(Arc::clone(&harness.store), OrchestratorSettings::default());
    let report = restarted.orchestrator.recover().await?;

    ensure!(report.interrupted == vec![id]);
    let task = restarted.orchestrator.status(&id.to_string()).await?;
    ensure!(task.status() == TaskStatus::Failed);
    ensure!(task.error_detail() == Some(INTERRUPTED_BY_RESTART));

    harness.orchestrator.shutdown().await;
    Ok(())
}
