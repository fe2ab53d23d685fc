//! Given steps for task lifecycle BDD scenarios.

use super::world::{LifecycleWorld, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::given;
use taskwright::task::{adapters::memory::ScriptedRun, services::SubmitTaskRequest};

#[given("a task orchestrator")]
fn task_orchestrator(world: &mut LifecycleWorld) {
    world.task_id = None;
}

#[given("the next run fails with exit status {code:i32}")]
fn next_run_fails(world: &mut LifecycleWorld, code: i32) {
    world.execution.push_script(ScriptedRun::Fail {
        output: format!("agent exited with {code}"),
        exit_status: code,
    });
}

#[given("execution is held")]
fn execution_is_held(world: &mut LifecycleWorld) {
    world.execution.hold();
}

#[given(r#"a completed task "{description}""#)]
fn completed_task(world: &mut LifecycleWorld, description: String) -> Result<(), eyre::Report> {
    let response = run_async(
        world
            .orchestrator
            .submit(SubmitTaskRequest::new(description)),
    )
    .wrap_err("submit task for completed-task background")?;
    world.task_id = Some(response.task_id);
    let task = world.settle()?;
    eyre::ensure!(
        task.status().is_terminal(),
        "task did not finish: {}",
        task.status()
    );
    Ok(())
}
