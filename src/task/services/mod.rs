//! Application services for task lifecycle orchestration.

mod error;
mod orchestrator;
pub(crate) mod registry;
mod requests;
mod templates;
pub(crate) mod worker;

pub use error::{
    ConflictError, GatewayError, NotFoundError, OrchestratorError, OrchestratorResult,
    TimeoutError,
};
pub use orchestrator::{
    DEFAULT_MAX_CONCURRENT_TASKS, Gateways, INTERRUPTED_BY_RESTART, Orchestrator,
    OrchestratorSettings, RecoveryReport, RunOutput, WORKER_STOPPED,
};
pub use requests::{
    ContinueTaskRequest, ContinueTaskResponse, SubmitTaskRequest, SubmitTaskResponse,
};
pub use templates::TaskTemplates;
pub use worker::{DEFAULT_EXECUTION_TIMEOUT, TaskEvent, WorkerPolicy};
