//! Feedback history, idempotent resubmission and reruns.

use super::helpers::{Harness, harness};
use chrono::{TimeZone, Utc};
use eyre::{Result, ensure, eyre};
use rstest::rstest;
use std::time::Duration;
use taskwright::task::{
    adapters::memory::{ScriptedRun, VcsOperation},
    domain::{FeedbackEntry, FeedbackOrigin, PullRequestRef, TaskStatus},
    services::{ConflictError, ContinueTaskRequest, OrchestratorError},
};

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn continuations_append_feedback_in_order(harness: Harness) -> Result<()> {
    let id = harness.submit("add retry to fetch()").await?;
    harness.settle(id).await?;

    for content in ["cap retries at five", "use exponential backoff", "log each retry"] {
        let response = harness
            .orchestrator
            .continue_task(ContinueTaskRequest::new(id.to_string(), content))
            .await?;
        ensure!(response.scheduled);
        let settled = harness.settle(id).await?;
        ensure!(settled.status() == TaskStatus::Completed);
    }

    let task = harness.orchestrator.status(&id.to_string()).await?;
    let contents: Vec<&str> = task
        .feedback_history()
        .iter()
        .map(FeedbackEntry::content)
        .collect();
    ensure!(
        contents
            == [
                "add retry to fetch()",
                "cap retries at five",
                "use exponential backoff",
                "log each retry",
            ]
    );
    ensure!(task.continuation_count() == 3);
    ensure!(task.last_continued_at().is_some());

    let runs: Vec<u32> = harness.execution.contexts().iter().map(|ctx| ctx.run).collect();
    ensure!(runs == [1, 2, 3, 4], "runs were {runs:?}");
    let last = harness
        .execution
        .contexts()
        .pop()
        .ok_or_else(|| eyre!("last context"))?;
    ensure!(last.feedback.len() == 4);
    ensure!(harness.vcs.call_count(VcsOperation::CheckoutAndPull) == 3);
    ensure!(harness.vcs.call_count(VcsOperation::CreateAndPushBranch) == 1);
    ensure!(harness.vcs.commits(task.branch()).len() == 4);
    ensure!(harness.pull_requests.created().len() == 1);

    let third = harness
        .orchestrator
        .output(&id.to_string(), Some(3))
        .await?;
    ensure!(third.log == "completed run 3");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn resubmitted_feedback_is_applied_once(harness: Harness) -> Result<()> {
    let id = harness.submit("add retry to fetch()").await?;
    harness.settle(id).await?;
    let at = Utc
        .with_ymd_and_hms(2026, 6, 1, 8, 30, 0)
        .single()
        .ok_or_else(|| eyre!("valid timestamp"))?;
    let request = ContinueTaskRequest::new(id.to_string(), "cap retries at five")
        .with_timestamp(at)
        .with_origin(FeedbackOrigin::Editor);

    let first = harness.orchestrator.continue_task(request.clone()).await?;
    ensure!(first.scheduled);
    harness.settle(id).await?;
    let runs_after_first = harness.execution.contexts().len();

    let second = harness.orchestrator.continue_task(request).await?;

    ensure!(!second.scheduled);
    ensure!(second.status == TaskStatus::Completed);
    let task = harness.orchestrator.status(&id.to_string()).await?;
    ensure!(task.feedback_history().len() == 2);
    ensure!(task.continuation_count() == 1);
    ensure!(harness.execution.contexts().len() == runs_after_first);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn active_task_rejects_continuation(harness: Harness) -> Result<()> {
    harness.execution.hold();
    let id = harness.submit("add retry to fetch()").await?;
    ensure!(
        harness
            .execution
            .wait_for_started(1, Duration::from_secs(5))
            .await
    );

    let result = harness
        .orchestrator
        .continue_task(ContinueTaskRequest::new(id.to_string(), "also add jitter"))
        .await;

    ensure!(matches!(
        result,
        Err(OrchestratorError::Conflict(ConflictError::TaskActive {
            status: TaskStatus::Running,
            ..
        }))
    ));
    harness.execution.release();
    let task = harness.settle(id).await?;
    ensure!(task.feedback_history().len() == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_task_can_be_continued_to_completion(harness: Harness) -> Result<()> {
    harness.execution.push_script(ScriptedRun::Fail {
        output: "tests failed".to_owned(),
        exit_status: 1,
    });
    let id = harness.submit("make the flaky test deterministic").await?;
    let failed = harness.settle(id).await?;
    ensure!(failed.status() == TaskStatus::Failed);

    harness
        .orchestrator
        .continue_task(ContinueTaskRequest::new(
            id.to_string(),
            "seed the random generator",
        ))
        .await?;
    let task = harness.settle(id).await?;

    ensure!(task.status() == TaskStatus::Completed);
    ensure!(task.error_detail().is_none());
    ensure!(task.commit_hash().is_some());
    ensure!(task.pull_request_ref().is_some());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn continuation_resolves_by_pull_request_and_can_replace_it(harness: Harness) -> Result<()> {
    let id = harness.submit("add retry to fetch()").await?;
    let task = harness.settle(id).await?;
    let original = task
        .pull_request_ref()
        .cloned()
        .ok_or_else(|| eyre!("pull request attached"))?;
    let replacement = "https://example.test/acme/widgets/pull/900";

    let response = harness
        .orchestrator
        .continue_task(
            ContinueTaskRequest::new(original.as_str(), "address review comments")
                .with_pull_request(replacement),
        )
        .await?;
    ensure!(response.task_id == id);
    let continued = harness.settle(id).await?;

    ensure!(continued.pull_request_ref() == Some(&PullRequestRef::new(replacement)?));
    let by_new = harness.orchestrator.status(replacement).await?;
    ensure!(by_new.id() == id);
    ensure!(harness.pull_requests.created().len() == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unknown_identifier_is_not_found(harness: Harness) -> Result<()> {
    let result = harness
        .orchestrator
        .continue_task(ContinueTaskRequest::new("deadbeef", "anything"))
        .await;
    ensure!(matches!(result, Err(OrchestratorError::NotFound(_))));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn pull_request_owned_by_another_task_is_refused(harness: Harness) -> Result<()> {
    let first = harness.submit("add retry to fetch()").await?;
    let second = harness.submit("document the retry policy").await?;
    let owned = harness
        .settle(first)
        .await?
        .pull_request_ref()
        .cloned()
        .ok_or_else(|| eyre!("first task opened a pull request"))?;
    harness.settle(second).await?;

    let result = harness
        .orchestrator
        .continue_task(
            ContinueTaskRequest::new(second.to_string(), "track the other PR")
                .with_pull_request(owned.as_str()),
        )
        .await;

    ensure!(
        matches!(
            &result,
            Err(OrchestratorError::Conflict(ConflictError::PullRequestInUse { owner, .. }))
                if *owner == first
        ),
        "unexpected result: {result:?}"
    );
    let untouched = harness.orchestrator.status(&second.to_string()).await?;
    ensure!(untouched.feedback_history().len() == 1);
    ensure!(untouched.pull_request_ref() != Some(&owned));
    let owner = harness.orchestrator.status(owned.as_str()).await?;
    ensure!(owner.id() == first);

    let own = harness
        .orchestrator
        .continue_task(
            ContinueTaskRequest::new(first.to_string(), "keep the same PR")
                .with_pull_request(owned.as_str()),
        )
        .await?;
    ensure!(own.scheduled);
    harness.settle(first).await?;
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn task_stranded_by_a_store_failure_can_be_continued(harness: Harness) -> Result<()> {
    harness.execution.hold();
    let id = harness.submit("split the config loader").await?;
    ensure!(
        harness
            .execution
            .wait_for_started(1, Duration::from_secs(5))
            .await
    );
    harness.store.fail_writes(true);
    harness.execution.release();

    let worker_gone = async {
        while harness.orchestrator.is_active(id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), worker_gone).await?;
    harness.store.fail_writes(false);
    let stranded = harness.orchestrator.status(&id.to_string()).await?;
    ensure!(stranded.status() == TaskStatus::Running);

    let mut events = harness.orchestrator.subscribe();
    let response = harness
        .orchestrator
        .continue_task(ContinueTaskRequest::new(id.to_string(), "pick it back up"))
        .await?;
    ensure!(response.scheduled);

    let failed = events.recv().await?;
    ensure!(failed.task_id == id);
    ensure!(failed.from == Some(TaskStatus::Running));
    ensure!(failed.to == TaskStatus::Failed);

    let task = harness.settle(id).await?;
    ensure!(task.status() == TaskStatus::Completed);
    ensure!(task.feedback_history().len() == 2);
    ensure!(task.error_detail().is_none());
    Ok(())
}
