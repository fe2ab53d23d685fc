//! Per-task exclusivity and the global worker bound.

use super::helpers::{Harness, harness, with_max_concurrent};
use eyre::{Result, ensure, eyre};
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use taskwright::task::{
    domain::TaskStatus,
    services::{ConflictError, ContinueTaskRequest, OrchestratorError},
};

const CONCURRENT_REQUESTS: usize = 8;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_continuations_schedule_exactly_one_run(harness: Harness) -> Result<()> {
    let shared = Arc::new(harness);
    let id = shared.submit("add retry to fetch()").await?;
    shared.settle(id).await?;
    shared.execution.hold();

    let mut handles = Vec::new();
    for index in 0..CONCURRENT_REQUESTS {
        let harness = Arc::clone(&shared);
        handles.push(tokio::spawn(async move {
            harness
                .orchestrator
                .continue_task(ContinueTaskRequest::new(
                    id.to_string(),
                    format!("follow-up number {index}"),
                ))
                .await
        }));
    }
    let mut scheduled = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await? {
            Ok(response) if response.scheduled => scheduled += 1,
            Err(OrchestratorError::Conflict(ConflictError::TaskActive { .. })) => conflicts += 1,
            other => return Err(eyre!("unexpected continuation result: {other:?}")),
        }
    }

    ensure!(scheduled == 1, "expected one scheduled continuation, got {scheduled}");
    ensure!(conflicts == CONCURRENT_REQUESTS - 1);
    shared.execution.release();
    let task = shared.settle(id).await?;
    ensure!(task.feedback_history().len() == 2);
    ensure!(task.continuation_count() == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn worker_bound_caps_simultaneous_runs() -> Result<()> {
    let harness = Harness::new(with_max_concurrent(2));
    harness.execution.hold();
    let mut ids = Vec::new();
    for index in 0..6 {
        ids.push(harness.submit(&format!("independent change {index}")).await?);
    }

    ensure!(
        harness
            .execution
            .wait_for_started(2, Duration::from_secs(5))
            .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    ensure!(harness.execution.contexts().len() == 2);
    let queued = harness
        .orchestrator
        .list(Some(TaskStatus::Submitted))
        .await?;
    ensure!(queued.len() == 4, "expected four queued tasks, got {}", queued.len());

    harness.execution.release();
    for id in ids {
        let task = harness.settle(id).await?;
        ensure!(task.status() == TaskStatus::Completed);
    }
    ensure!(harness.execution.peak_active() <= 2);
    ensure!(harness.execution.contexts().len() == 6);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn purge_is_refused_while_a_worker_holds_the_task(harness: Harness) -> Result<()> {
    harness.execution.hold();
    let id = harness.submit("add retry to fetch()").await?;
    ensure!(
        harness
            .execution
            .wait_for_started(1, Duration::from_secs(5))
            .await
    );

    let result = harness.orchestrator.purge(&id.to_string()).await;
    ensure!(matches!(
        result,
        Err(OrchestratorError::Conflict(ConflictError::NotPurgeable { .. }))
    ));

    harness.execution.release();
    harness.settle(id).await?;
    harness.orchestrator.purge(&id.to_string()).await?;
    ensure!(harness.orchestrator.list(None).await?.is_empty());
    Ok(())
}
