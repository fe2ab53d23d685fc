//! When steps for task lifecycle BDD scenarios.

use super::world::{LifecycleWorld, run_async};
use chrono::{DateTime, Utc};
use eyre::WrapErr;
use rstest_bdd_macros::when;
use std::time::Duration;
use taskwright::task::services::{ContinueTaskRequest, SubmitTaskRequest};

#[when(r#"a task "{description}" is submitted"#)]
fn task_is_submitted(world: &mut LifecycleWorld, description: String) -> Result<(), eyre::Report> {
    let response = run_async(
        world
            .orchestrator
            .submit(SubmitTaskRequest::new(description)),
    )
    .wrap_err("submit task")?;
    world.task_id = Some(response.task_id);
    Ok(())
}

#[when("the task settles")]
fn task_settles(world: &mut LifecycleWorld) -> Result<(), eyre::Report> {
    world.settle().map(|_| ())
}

#[when("execution has started")]
fn execution_has_started(world: &mut LifecycleWorld) -> Result<(), eyre::Report> {
    let started = run_async(
        world
            .execution
            .wait_for_started(1, Duration::from_secs(5)),
    );
    eyre::ensure!(started, "execution never started");
    Ok(())
}

#[when("execution is released")]
fn execution_is_released(world: &mut LifecycleWorld) {
    world.execution.release();
}

#[when("feedback {content:string} is submitted")]
fn feedback_is_submitted(world: &mut LifecycleWorld, content: String) -> Result<(), eyre::Report> {
    let id = world.task_id()?;
    let request = ContinueTaskRequest::new(id.to_string(), content);
    world.last_continuation = Some(run_async(world.orchestrator.continue_task(request)));
    Ok(())
}

#[when(r#"feedback "{content}" stamped "{timestamp}" is submitted"#)]
fn stamped_feedback_is_submitted(
    world: &mut LifecycleWorld,
    content: String,
    timestamp: String,
) -> Result<(), eyre::Report> {
    let id = world.task_id()?;
    let at: DateTime<Utc> = timestamp
        .parse()
        .wrap_err_with(|| format!("parse timestamp {timestamp}"))?;
    let request = ContinueTaskRequest::new(id.to_string(), content).with_timestamp(at);
    world.last_continuation = Some(run_async(world.orchestrator.continue_task(request)));
    Ok(())
}
