//! Unix socket listener dispatching protocol requests to the orchestrator.

use super::protocol::{
    CancelledView, ErrorKind, Payload, Request, Response, TaskView, continue_request,
    submit_request,
};
use crate::task::{
    ports::{ExecutionGateway, PullRequestGateway, TaskStore, VersionControlGateway},
    services::{Orchestrator, OrchestratorError, OrchestratorResult},
};
use camino::Utf8Path;
use mockable::Clock;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream, unix::OwnedWriteHalf};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

/// Longest request line accepted, newline included.
pub const MAX_REQUEST_BYTES: u64 = 1 << 20;

/// One framed read from a client.
enum Incoming {
    Line(String),
    NotUtf8,
    TooLong,
    Closed,
}

/// Binds the daemon socket, replacing a stale socket file.
///
/// # Errors
///
/// Returns the I/O error when the parent directory cannot be created or the
/// socket cannot be bound.
pub async fn bind(path: &Utf8Path) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::try_exists(path).await? {
        debug!(socket = %path, "removing stale socket");
        tokio::fs::remove_file(path).await?;
    }
    UnixListener::bind(path)
}

/// Accepts connections until `shutdown` fires, then waits for open
/// connections to finish their current request.
///
/// # Errors
///
/// Returns the I/O error when accepting a connection fails.
pub async fn serve<S, V, E, P, C>(
    listener: UnixListener,
    orchestrator: Arc<Orchestrator<S, V, E, P, C>>,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    S: TaskStore + 'static,
    V: VersionControlGateway + 'static,
    E: ExecutionGateway + 'static,
    P: PullRequestGateway + 'static,
    C: Clock + Send + Sync + 'static,
{
    let connections = TaskTracker::new();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = shutdown.cancelled() => break,
        };
        let (stream, _) = accepted?;
        let handler = Arc::clone(&orchestrator);
        let stop = shutdown.clone();
        connections.spawn(async move {
            if let Err(err) = serve_connection(stream, &handler, &stop).await {
                warn!(error = %err, "client connection failed");
            }
        });
    }
    connections.close();
    connections.wait().await;
    info!("socket server stopped");
    Ok(())
}

async fn serve_connection<S, V, E, P, C>(
    stream: UnixStream,
    orchestrator: &Orchestrator<S, V, E, P, C>,
    shutdown: &CancellationToken,
) -> io::Result<()>
where
    S: TaskStore + 'static,
    V: VersionControlGateway + 'static,
    E: ExecutionGateway + 'static,
    P: PullRequestGateway + 'static,
    C: Clock + Send + Sync + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        let incoming = tokio::select! {
            incoming = read_request(&mut reader, &mut buf) => incoming?,
            () = shutdown.cancelled() => Incoming::Closed,
        };
        let line = match incoming {
            Incoming::Closed => return Ok(()),
            Incoming::TooLong => {
                let detail = format!("request line exceeds {MAX_REQUEST_BYTES} bytes");
                send(&mut writer, &Response::error(ErrorKind::InvalidRequest, detail)).await?;
                return Ok(());
            }
            Incoming::NotUtf8 => {
                let detail = "request line is not valid UTF-8".to_owned();
                send(&mut writer, &Response::error(ErrorKind::InvalidRequest, detail)).await?;
                continue;
            }
            Incoming::Line(line) => line,
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(orchestrator, request).await,
            Err(err) => Response::error(ErrorKind::InvalidRequest, err.to_string()),
        };
        send(&mut writer, &response).await?;
    }
}

/// Reads one newline-terminated request of at most [`MAX_REQUEST_BYTES`].
///
/// An oversized line leaves the stream mid-request, so the caller closes
/// the connection after answering it.
async fn read_request<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Incoming>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(MAX_REQUEST_BYTES)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(Incoming::Closed);
    }
    let terminated = buf.last() == Some(&b'\n');
    if !terminated && u64::try_from(buf.len()).unwrap_or(u64::MAX) >= MAX_REQUEST_BYTES {
        return Ok(Incoming::TooLong);
    }
    Ok(String::from_utf8(std::mem::take(buf)).map_or(Incoming::NotUtf8, Incoming::Line))
}

async fn send(writer: &mut OwnedWriteHalf, response: &Response) -> io::Result<()> {
    let mut encoded = serde_json::to_vec(response).map_err(io::Error::other)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// Executes one request against the orchestrator.
pub async fn handle<S, V, E, P, C>(
    orchestrator: &Orchestrator<S, V, E, P, C>,
    request: Request,
) -> Response
where
    S: TaskStore + 'static,
    V: VersionControlGateway + 'static,
    E: ExecutionGateway + 'static,
    P: PullRequestGateway + 'static,
    C: Clock + Send + Sync + 'static,
{
    match dispatch(orchestrator, request).await {
        Ok(payload) => Response::ok(payload),
        Err(err) => {
            debug!(error = %err, "request failed");
            Response::from(&err)
        }
    }
}

async fn dispatch<S, V, E, P, C>(
    orchestrator: &Orchestrator<S, V, E, P, C>,
    request: Request,
) -> OrchestratorResult<Payload>
where
    S: TaskStore + 'static,
    V: VersionControlGateway + 'static,
    E: ExecutionGateway + 'static,
    P: PullRequestGateway + 'static,
    C: Clock + Send + Sync + 'static,
{
    match request {
        Request::Submit {
            description,
            branch,
            mode,
            origin,
            feedback,
        } => {
            let submission =
                submit_request(description, branch, mode, origin, feedback, orchestrator.now())
                    .map_err(OrchestratorError::Domain)?;
            let response = orchestrator.submit(submission).await?;
            Ok(Payload::Submitted(response.into()))
        }
        Request::Continue {
            task,
            content,
            origin,
            timestamp,
            pull_request,
        } => {
            let continuation = continue_request(task, content, origin, timestamp, pull_request);
            let response = orchestrator.continue_task(continuation).await?;
            Ok(Payload::Continued(response.into()))
        }
        Request::Status { task } => {
            let record = orchestrator.status(&task).await?;
            Ok(Payload::Task(Box::new(TaskView::from(&record))))
        }
        Request::List { status } => Ok(Payload::Tasks(orchestrator.list(status).await?)),
        Request::Cancel { task } => {
            let task_id = orchestrator.cancel(&task).await?;
            Ok(Payload::Cancelled(CancelledView { task_id }))
        }
        Request::Output { task, run } => {
            let output = orchestrator.output(&task, run).await?;
            Ok(Payload::Output(output.into()))
        }
        Request::Search { query } => Ok(Payload::Tasks(orchestrator.search(&query).await?)),
        Request::History { branch, limit } => Ok(Payload::Tasks(
            orchestrator.history(branch.as_deref(), limit).await?,
        )),
    }
}
