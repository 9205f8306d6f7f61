//! Plugin executor - runs one plugin process per call.
//!
//! Flow:
//! 1. Spawn the plugin with stdin/stdout/stderr piped and no arguments
//! 2. Concurrently write the request, read the response, drain stderr
//! 3. Wait for exit; anything but status 0 is a transport failure
//! 4. Append stderr to the plugin's log
//!
//! Writing and reading run concurrently because plugins may start writing
//! before they have consumed the whole request. With sequential I/O a full
//! pipe in either direction would deadlock both processes.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::bridge::codec::JsonDocumentCodec;
use crate::bridge::protocol::{ExecRequest, ExecResponse};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("failed to spawn plugin {}: {source}", .plugin.display())]
    Spawn {
        plugin: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("plugin {0} not captured")]
    StreamNotCaptured(&'static str),
    #[error("failed to write request to plugin: {0}")]
    WriteRequest(#[source] std::io::Error),
    #[error("failed to read plugin response: {0}")]
    ReadResponse(#[source] std::io::Error),
    #[error("plugin closed stdout without writing a response")]
    MissingResponse,
    #[error("failed to read plugin stderr: {0}")]
    ReadDiagnostics(#[source] std::io::Error),
    #[error("failed to wait for plugin: {0}")]
    Wait(#[source] std::io::Error),
    /// `stderr` holds everything the plugin wrote; the message quotes only
    /// its tail.
    #[error("plugin exited with {status}: {}", stderr_tail(.stderr))]
    NonZeroExit { status: ExitStatus, stderr: String },
    #[error("plugin invocation cancelled")]
    Cancelled,
    #[error("plugin did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Most stderr bytes quoted in a [`ExecutorError::NonZeroExit`] message.
const STDERR_TAIL_BYTES: usize = 4096;

fn stderr_tail(stderr: &str) -> Cow<'_, str> {
    if stderr.len() <= STDERR_TAIL_BYTES {
        return Cow::Borrowed(stderr);
    }
    let mut start = stderr.len() - STDERR_TAIL_BYTES;
    while !stderr.is_char_boundary(start) {
        start += 1;
    }
    Cow::Owned(format!("[{start} bytes elided] {}", &stderr[start..]))
}

/// Runs a plugin for a single request.
///
/// This abstraction lets the dispatcher be tested without spawning processes.
#[async_trait]
pub trait PluginExecutor: Send + Sync {
    /// Run `plugin` with `request` on stdin and return its decoded response.
    ///
    /// Cancelling `cancel` kills the plugin and returns
    /// [`ExecutorError::Cancelled`].
    async fn execute(
        &self,
        plugin: &Path,
        request: &ExecRequest,
        cancel: CancellationToken,
    ) -> Result<ExecResponse, ExecutorError>;
}

/// Executor that spawns the plugin as a subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill plugins that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl PluginExecutor for CommandRunner {
    async fn execute(
        &self,
        plugin: &Path,
        request: &ExecRequest,
        cancel: CancellationToken,
    ) -> Result<ExecResponse, ExecutorError> {
        let started = Instant::now();

        // kill_on_drop: if the caller goes away mid-call the plugin goes with it
        let mut child = Command::new(plugin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                plugin: plugin.to_path_buf(),
                source,
            })?;

        let pid = child.id();
        tracing::debug!(plugin = %plugin.display(), pid, method = %request.method, "Spawned plugin");

        let stdin = child
            .stdin
            .take()
            .ok_or(ExecutorError::StreamNotCaptured("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ExecutorError::StreamNotCaptured("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ExecutorError::StreamNotCaptured("stderr"))?;

        let limit = self.timeout;
        let deadline = async move {
            match limit {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let interrupted = tokio::select! {
            outcome = exchange(&mut child, request, stdin, stdout, stderr) => {
                tracing::debug!(
                    plugin = %plugin.display(),
                    pid,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = outcome.is_ok(),
                    "Plugin finished"
                );
                return outcome;
            }
            () = cancel.cancelled() => ExecutorError::Cancelled,
            limit = deadline => ExecutorError::TimedOut(limit),
        };

        tracing::warn!(plugin = %plugin.display(), pid, reason = %interrupted, "Killing plugin");
        if let Err(e) = child.kill().await {
            tracing::warn!(plugin = %plugin.display(), pid, error = %e, "Failed to kill plugin");
        }
        Err(interrupted)
    }
}

/// Drive all three streams to completion, then reap the process.
async fn exchange(
    child: &mut Child,
    request: &ExecRequest,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
) -> Result<ExecResponse, ExecutorError> {
    let (written, response, diagnostics) = tokio::join!(
        write_request(stdin, request),
        read_response(stdout),
        read_diagnostics(stderr),
    );

    let status = child.wait().await.map_err(ExecutorError::Wait)?;
    let diagnostics = diagnostics?;

    if !status.success() {
        return Err(ExecutorError::NonZeroExit {
            status,
            stderr: diagnostics.trim_end().to_string(),
        });
    }

    written?;
    let mut response = response?;
    response.log.push_str(&diagnostics);
    Ok(response)
}

async fn write_request(stdin: ChildStdin, request: &ExecRequest) -> Result<(), ExecutorError> {
    let mut writer = FramedWrite::new(stdin, JsonDocumentCodec::<&ExecRequest>::new());
    match writer.send(request).await {
        Ok(()) => {}
        // The plugin may exit without reading its input; exit status and
        // response decide the outcome.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            tracing::debug!("Plugin closed stdin before reading the whole request");
        }
        Err(e) => return Err(ExecutorError::WriteRequest(e)),
    }
    // Dropping the writer closes stdin, signalling end of request
    drop(writer);
    Ok(())
}

async fn read_response(stdout: ChildStdout) -> Result<ExecResponse, ExecutorError> {
    let mut reader = FramedRead::new(stdout, JsonDocumentCodec::<ExecResponse>::new());
    let response = match reader.next().await {
        Some(Ok(response)) => Ok(response),
        Some(Err(e)) => Err(ExecutorError::ReadResponse(e)),
        None => Err(ExecutorError::MissingResponse),
    };

    // Keep draining so the plugin never blocks on a full stdout pipe
    let buffered = reader.read_buffer().len();
    let mut stdout = reader.into_inner();
    match tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await {
        Ok(drained) if buffered as u64 + drained > 0 => {
            tracing::debug!(
                bytes = buffered as u64 + drained,
                "Ignoring plugin output after the response"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "Failed to drain plugin stdout"),
    }

    response
}

async fn read_diagnostics(mut stderr: ChildStderr) -> Result<String, ExecutorError> {
    let mut buf = Vec::new();
    stderr
        .read_to_end(&mut buf)
        .await
        .map_err(ExecutorError::ReadDiagnostics)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
