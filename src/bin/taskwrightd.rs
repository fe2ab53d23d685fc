//! Task lifecycle daemon.
//!
//! Usage:
//!
//! ```text
//! taskwrightd
//! ```
//!
//! Configuration comes from `TASKWRIGHT_*` environment variables (see
//! [`taskwright::config`]). The daemon opens the task store, fails tasks
//! interrupted by a previous shutdown, requeues tasks that never started,
//! and serves the JSON-lines protocol on the configured socket until
//! Ctrl-C.

#[cfg(unix)]
use mockable::DefaultClock;
#[cfg(unix)]
use std::sync::Arc;
#[cfg(unix)]
use taskwright::{
    config::{Config, ConfigError},
    daemon::server,
    task::{
        adapters::{
            file::FileTaskStore,
            process::{DockerRunner, GhCli, GitCli},
        },
        ports::StoreError,
        services::{Gateways, Orchestrator, OrchestratorError},
    },
    telemetry,
};
#[cfg(unix)]
use thiserror::Error;
#[cfg(unix)]
use tokio::runtime::Builder;
#[cfg(unix)]
use tokio_util::sync::CancellationToken;
#[cfg(unix)]
use tokio::sync::broadcast::error::RecvError;
#[cfg(unix)]
use tracing::{debug, error, info, warn};

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that stop the daemon.
#[cfg(unix)]
#[derive(Debug, Error)]
enum DaemonError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("task store: {0}")]
    Store(#[from] StoreError),
    #[error("recovery: {0}")]
    Recovery(#[from] OrchestratorError),
    #[error("socket: {0}")]
    Socket(#[from] std::io::Error),
}

#[cfg(unix)]
fn main() -> Result<(), BoxError> {
    if !telemetry::init_tracing() {
        return Err("a tracing subscriber is already installed".into());
    }
    let runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run()).map_err(|err| {
        error!(error = %err, "daemon stopped with an error");
        err.into()
    })
}

#[cfg(unix)]
async fn run() -> Result<(), DaemonError> {
    let config = Config::from_env()?;
    info!(
        repository = %config.repository,
        data_dir = %config.data_dir,
        max_concurrent_tasks = config.orchestrator.max_concurrent_tasks,
        "starting taskwrightd"
    );

    let store = FileTaskStore::open(config.data_dir.clone()).await?;
    for corrupt in store.corrupt_records() {
        warn!(error = %corrupt, "skipped unreadable task record");
    }
    let layout = config.workspace_layout();
    let gateways = Gateways {
        vcs: Arc::new(GitCli::new(layout.clone(), config.remote.clone())),
        execution: Arc::new(DockerRunner::new(layout, config.container.clone())),
        pull_requests: Arc::new(GhCli::new(config.repository.clone())),
    };
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(store),
        gateways,
        Arc::new(DefaultClock),
        config.orchestrator,
    ));

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(
                    task_id = %event.task_id,
                    from = ?event.from,
                    to = %event.to,
                    at = %event.at,
                    "task event"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "task event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let report = orchestrator.recover().await?;
    info!(
        requeued = report.requeued.len(),
        interrupted = report.interrupted.len(),
        "recovered persisted tasks"
    );

    let listener = server::bind(&config.socket).await?;
    info!(socket = %config.socket, "listening");
    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server::serve(
        listener,
        Arc::clone(&orchestrator),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received; shutting down");
    shutdown.cancel();
    orchestrator.shutdown().await;
    match server_task.await {
        Ok(result) => result?,
        Err(err) => warn!(error = %err, "socket server task ended abnormally"),
    }
    if let Err(err) = tokio::fs::remove_file(&config.socket).await {
        warn!(error = %err, "could not remove socket file");
    }
    Ok(())
}

#[cfg(not(unix))]
fn main() -> Result<(), BoxError> {
    Err("taskwrightd is not supported on non-Unix platforms".into())
}
