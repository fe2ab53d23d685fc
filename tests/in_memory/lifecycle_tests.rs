//! Submission through completion or failure.

use super::helpers::{Harness, harness};
use chrono::{TimeZone, Utc};
use eyre::{Result, ensure, eyre};
use rstest::rstest;
use taskwright::task::{
    adapters::memory::{PullRequestOperation, ScriptedRun, VcsOperation},
    domain::{FeedbackEntry, FeedbackOrigin, PrMode, TaskStatus},
    ports::{PullRequestError, PullRequestErrorKind, VcsError, VcsErrorKind},
    services::{
        ConflictError, ContinueTaskRequest, OrchestratorError, SubmitTaskRequest,
    },
};

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn deferred_task_runs_from_submission_to_pull_request(harness: Harness) -> Result<()> {
    let response = harness
        .orchestrator
        .submit(SubmitTaskRequest::new("add retry to fetch()"))
        .await?;
    ensure!(response.status == TaskStatus::Submitted);

    let task = harness.settle(response.task_id).await?;

    ensure!(task.status() == TaskStatus::Completed);
    ensure!(task.branch() == &response.branch);
    ensure!(harness.vcs.has_branch(task.branch()));
    ensure!(harness.vcs.commits(task.branch()).len() == 1);
    ensure!(harness.vcs.call_count(VcsOperation::CommitAll) == 1);
    ensure!(task.commit_hash() == harness.vcs.commits(task.branch()).last());

    let created = harness.pull_requests.created();
    ensure!(created.len() == 1, "expected one pull request, got {}", created.len());
    let request = created.first().ok_or_else(|| eyre!("pull request request"))?;
    ensure!(request.draft);
    ensure!(request.branch == *task.branch());
    ensure!(request.title == "add retry to fetch()");
    ensure!(task.pull_request_ref().is_some());

    ensure!(task.branch_created_at().is_some());
    ensure!(task.started_at().is_some());
    ensure!(task.completed_at().is_some());
    ensure!(task.error_detail().is_none());

    let output = harness
        .orchestrator
        .output(&task.id().to_string(), None)
        .await?;
    ensure!(output.run == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn eager_task_opens_its_pull_request_before_running(harness: Harness) -> Result<()> {
    let mut events = harness.orchestrator.subscribe();
    let response = harness
        .orchestrator
        .submit(SubmitTaskRequest::new("tighten lints").with_mode(PrMode::EagerPr))
        .await?;
    let task = harness.settle(response.task_id).await?;

    ensure!(task.status() == TaskStatus::Completed);
    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        order.push(event.to);
    }
    ensure!(
        order
            == vec![
                TaskStatus::Submitted,
                TaskStatus::BranchCreated,
                TaskStatus::PrCreated,
                TaskStatus::Running,
                TaskStatus::Committing,
                TaskStatus::Completed,
            ],
        "unexpected transitions: {order:?}"
    );
    ensure!(harness.pull_requests.created().len() == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_run_keeps_the_branch_but_commits_nothing(harness: Harness) -> Result<()> {
    harness.execution.push_script(ScriptedRun::Fail {
        output: "panic: index out of range".to_owned(),
        exit_status: 2,
    });
    let id = harness.submit("fix the crash in the parser").await?;

    let task = harness.settle(id).await?;

    ensure!(task.status() == TaskStatus::Failed);
    ensure!(harness.vcs.has_branch(task.branch()));
    ensure!(harness.vcs.commits(task.branch()).is_empty());
    ensure!(task.commit_hash().is_none());
    ensure!(task.pull_request_ref().is_none());
    ensure!(harness.pull_requests.created().is_empty());
    let detail = task.error_detail().ok_or_else(|| eyre!("error detail"))?;
    ensure!(detail.contains("exit status 2"), "detail was {detail}");
    ensure!(detail.contains("index out of range"));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn run_without_changes_completes_without_a_pull_request(harness: Harness) -> Result<()> {
    harness
        .execution
        .push_script(ScriptedRun::without_changes("already up to date"));
    let id = harness.submit("check the changelog").await?;

    let task = harness.settle(id).await?;

    ensure!(task.status() == TaskStatus::Completed);
    ensure!(task.commit_hash().is_none());
    ensure!(harness.pull_requests.created().is_empty());
    ensure!(harness.pull_requests.lookups() == 0);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn missing_remote_fails_before_the_branch_exists(harness: Harness) -> Result<()> {
    harness.vcs.fail_next(
        VcsOperation::CreateAndPushBranch,
        VcsError::new(VcsErrorKind::NoRemote, "no remote named 'origin'"),
    );
    let id = harness.submit("bump dependencies").await?;

    let task = harness.settle(id).await?;

    ensure!(task.status() == TaskStatus::Failed);
    ensure!(task.branch_created_at().is_none());
    ensure!(
        task.error_detail()
            .is_some_and(|detail| detail.contains("no remote named 'origin'"))
    );
    ensure!(harness.execution.contexts().is_empty());

    let continued = harness
        .orchestrator
        .continue_task(ContinueTaskRequest::new(id.to_string(), "try again"))
        .await;
    ensure!(matches!(
        continued,
        Err(OrchestratorError::Conflict(ConflictError::BranchNeverCreated(task_id)))
            if task_id == id
    ));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn pull_request_failure_is_recorded_with_the_commit(harness: Harness) -> Result<()> {
    harness.pull_requests.fail_next(
        PullRequestOperation::Create,
        PullRequestError::new(PullRequestErrorKind::Unauthenticated, "gh auth login required"),
    );
    let id = harness.submit("document the retry policy").await?;

    let task = harness.settle(id).await?;

    ensure!(task.status() == TaskStatus::Failed);
    ensure!(task.commit_hash().is_some());
    ensure!(task.pull_request_ref().is_none());
    ensure!(
        task.error_detail()
            .is_some_and(|detail| detail.contains("gh auth login required"))
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn submission_feedback_follows_the_description(harness: Harness) -> Result<()> {
    let at = Utc
        .with_ymd_and_hms(2026, 5, 4, 12, 0, 0)
        .single()
        .ok_or_else(|| eyre!("valid timestamp"))?;
    let extra = FeedbackEntry::new(at, "keep the public API stable", FeedbackOrigin::File)?;
    let response = harness
        .orchestrator
        .submit(
            SubmitTaskRequest::new("split the config module")
                .with_branch("refactor/config")
                .with_feedback([extra]),
        )
        .await?;

    let task = harness.settle(response.task_id).await?;

    ensure!(task.branch().as_str() == "refactor/config");
    let contents: Vec<&str> = task
        .feedback_history()
        .iter()
        .map(FeedbackEntry::content)
        .collect();
    ensure!(contents == ["split the config module", "keep the public API stable"]);
    let context = harness
        .execution
        .contexts()
        .pop()
        .ok_or_else(|| eyre!("execution context"))?;
    ensure!(context.feedback.len() == 2);
    ensure!(context.prompt.contains("keep the public API stable"));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_submissions_get_distinct_branches(harness: Harness) -> Result<()> {
    let first = harness.submit("add retry to fetch()").await?;
    let second = harness.submit("add retry to fetch()").await?;

    let one = harness.settle(first).await?;
    let two = harness.settle(second).await?;

    ensure!(one.branch() != two.branch());
    ensure!(one.status() == TaskStatus::Completed && two.status() == TaskStatus::Completed);
    Ok(())
}
