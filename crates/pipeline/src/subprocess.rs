//! Subprocess execution with captured output.
//!
//! [`run_command`] spawns a prepared [`tokio::process::Command`], drains
//! stdout and stderr concurrently (so a chatty child never blocks on a full
//! pipe), and waits for exit with an optional wall-clock limit.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::tool::ToolError;

/// Maximum stdout or stderr size retained per stream (10 MiB).
///
/// Anything beyond this is read and discarded.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How long the output readers may run on after the child exits.
///
/// A background grandchild can hold the pipes open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawn `cmd`, capture its output, and wait for it to exit.
///
/// The caller sets program and arguments. stdin is closed. When `timeout`
/// elapses the child is killed and [`ToolError::Timeout`] is returned.
/// A non-zero exit is not an error here; callers inspect
/// [`ToolOutput::exit_code`].
pub async fn run_command(
    cmd: &mut Command,
    timeout: Option<Duration>,
) -> Result<ToolOutput, ToolError> {
    // `kill_on_drop(true)` ensures the child is killed when dropped (e.g. on timeout).
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    // Readers stop on every exit path, including timeouts and wait errors.
    let stop_readers = CancellationToken::new();
    let _stop_guard = stop_readers.clone().drop_guard();

    let stdout_task = tokio::spawn(read_stream(child.stdout.take(), stop_readers.clone()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take(), stop_readers.clone()));

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(waited) => waited?,
            Err(_elapsed) => {
                // Dropping `child` kills the process.
                return Err(ToolError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
        },
        None => child.wait().await?,
    };

    let duration_ms = start.elapsed().as_millis() as u64;

    let grace = tokio::spawn({
        let stop = stop_readers.clone();
        async move {
            tokio::time::sleep(OUTPUT_DRAIN_GRACE).await;
            stop.cancel();
        }
    });
    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();
    grace.abort();

    Ok(ToolOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        exit_code: status.code().unwrap_or(-1),
        duration_ms,
    })
}

/// Read a stream until EOF or `stop`, keeping at most [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, stop: CancellationToken) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut h) = handle else {
        return buf;
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = tokio::select! {
            _ = stop.cancelled() => {
                tracing::warn!(captured = buf.len(), "Tool output still open, capture truncated");
                break;
            }
            read = h.read(&mut chunk) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        let room = MAX_OUTPUT_BYTES - buf.len();
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
    buf
}
