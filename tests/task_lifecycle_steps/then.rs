//! Then steps for task lifecycle BDD scenarios.

use super::world::LifecycleWorld;
use eyre::eyre;
use rstest_bdd_macros::then;
use taskwright::task::{
    domain::{FeedbackEntry, TaskStatus},
    services::{ConflictError, OrchestratorError},
};

#[then(r#"the task status is "{status}""#)]
fn task_status_is(world: &LifecycleWorld, status: String) -> Result<(), eyre::Report> {
    let expected = TaskStatus::try_from(status.as_str())
        .map_err(|err| eyre!("invalid expected status in scenario: {err}"))?;
    let task = world.task()?;
    if task.status() != expected {
        return Err(eyre!(
            "expected status {expected}, found {} ({:?})",
            task.status(),
            task.error_detail()
        ));
    }
    Ok(())
}

#[then("the task branch has one commit")]
fn branch_has_one_commit(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    expect_commits(world, 1)
}

#[then("the task branch has {count:usize} commits")]
fn branch_has_commits(world: &LifecycleWorld, count: usize) -> Result<(), eyre::Report> {
    expect_commits(world, count)
}

fn expect_commits(world: &LifecycleWorld, count: usize) -> Result<(), eyre::Report> {
    let task = world.task()?;
    if !world.vcs.has_branch(task.branch()) {
        return Err(eyre!("branch {} was never created", task.branch()));
    }
    let commits = world.vcs.commits(task.branch()).len();
    if commits != count {
        return Err(eyre!("expected {count} commits, found {commits}"));
    }
    Ok(())
}

#[then("the task has a draft pull request")]
fn task_has_draft_pull_request(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    let task = world.task()?;
    let created = world.pull_requests.created();
    let [request] = created.as_slice() else {
        return Err(eyre!("expected one pull request, found {}", created.len()));
    };
    if !request.draft || request.branch != *task.branch() {
        return Err(eyre!("unexpected pull request request: {request:?}"));
    }
    if task.pull_request_ref().is_none() {
        return Err(eyre!("task has no pull request reference"));
    }
    Ok(())
}

#[then("no pull request was opened")]
fn no_pull_request_opened(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    if !world.pull_requests.created().is_empty() {
        return Err(eyre!("a pull request was opened"));
    }
    Ok(())
}

#[then(r#"the error detail mentions "{fragment}""#)]
fn error_detail_mentions(world: &LifecycleWorld, fragment: String) -> Result<(), eyre::Report> {
    let task = world.task()?;
    let detail = task
        .error_detail()
        .ok_or_else(|| eyre!("task has no error detail"))?;
    if !detail.contains(&fragment) {
        return Err(eyre!("error detail {detail:?} does not mention {fragment:?}"));
    }
    Ok(())
}

#[then(r#"the feedback history reads "{history}""#)]
fn feedback_history_reads(world: &LifecycleWorld, history: String) -> Result<(), eyre::Report> {
    let task = world.task()?;
    let actual: Vec<&str> = task
        .feedback_history()
        .iter()
        .map(FeedbackEntry::content)
        .collect();
    let expected: Vec<&str> = history.split(" | ").collect();
    if actual != expected {
        return Err(eyre!("expected history {expected:?}, found {actual:?}"));
    }
    Ok(())
}

#[then("the feedback history has {count:usize} entries")]
fn feedback_history_has(world: &LifecycleWorld, count: usize) -> Result<(), eyre::Report> {
    let entries = world.task()?.feedback_history().len();
    if entries != count {
        return Err(eyre!("expected {count} feedback entries, found {entries}"));
    }
    Ok(())
}

#[then("the last continuation was not scheduled")]
fn last_continuation_not_scheduled(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    match &world.last_continuation {
        Some(Ok(response)) if !response.scheduled => Ok(()),
        other => Err(eyre!("expected an unscheduled continuation, got {other:?}")),
    }
}

#[then("the continuation is rejected as a conflict")]
fn continuation_rejected(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    match &world.last_continuation {
        Some(Err(OrchestratorError::Conflict(ConflictError::TaskActive { .. }))) => Ok(()),
        other => Err(eyre!("expected a task-active conflict, got {other:?}")),
    }
}
