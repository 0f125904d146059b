//! Subprocess plumbing for the encode pipeline.
//!
//! ffmpeg writes the container to stdout; we forward it chunk by chunk
//! into a bounded channel so the HTTP response streams while the encode
//! runs. Cancellation kills the child. Output is never buffered whole.

use bytes::Bytes;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CutError;

/// The byte stream every cut produces.
pub type ByteStream = ReceiverStream<Result<Bytes, CutError>>;

pub(crate) type ByteSender = mpsc::Sender<Result<Bytes, CutError>>;

const CHANNEL_DEPTH: usize = 16;
const READ_CHUNK: usize = 64 * 1024;
const STDERR_TAIL: usize = 4 * 1024;

/// Default ffmpeg binary; overridable for odd deployments.
pub fn ffmpeg_path() -> String {
    std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string())
}

/// Base ffmpeg invocation with quiet logging.
pub(crate) fn ffmpeg_command() -> Command {
    let mut cmd = Command::new(ffmpeg_path());
    cmd.args(["-hide_banner", "-nostats", "-loglevel", "error"]);
    cmd.env("LC_ALL", "C");
    cmd
}

/// Create a stream and the sender feeding it.
pub(crate) fn byte_channel() -> (ByteSender, ByteStream) {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    (tx, ReceiverStream::new(rx))
}

/// Run a command, forwarding its stdout into `tx`.
///
/// Returns an error (and kills the child) on cancellation or non-zero
/// exit; the last few KB of stderr are kept for the error message.
pub(crate) async fn pipe_command(
    mut cmd: Command,
    tx: &ByteSender,
    token: &CancellationToken,
) -> Result<(), CutError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(?cmd, "Spawning encode pipeline");
    let mut child = cmd
        .spawn()
        .map_err(|e| CutError::io("spawning ffmpeg", std::path::Path::new("ffmpeg"), e))?;

    let stdout = child.stdout.take().ok_or_else(|| {
        CutError::io(
            "capturing stdout of",
            std::path::Path::new("ffmpeg"),
            std::io::Error::other("stdout not piped"),
        )
    })?;
    let stderr = child.stderr.take();

    // Collect a bounded stderr tail concurrently so a chatty encoder
    // cannot deadlock against a full pipe.
    let stderr_task = tokio::spawn(async move {
        let mut tail: Vec<u8> = Vec::new();
        if let Some(stderr) = stderr {
            let mut reader = BufReader::new(stderr);
            let mut buf = [0u8; 1024];
            while let Ok(n) = reader.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL {
                    let excess = tail.len() - STDERR_TAIL;
                    tail.drain(..excess);
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    });

    let mut reader = BufReader::new(stdout);
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            _ = token.cancelled() => {
                let _ = child.kill().await;
                return Err(CutError::Cancelled);
            }
            read = reader.read(&mut buf) => read.map_err(|e| {
                CutError::io("reading encode output", std::path::Path::new("ffmpeg"), e)
            })?,
        };
        if n == 0 {
            break;
        }
        if tx
            .send(Ok(Bytes::copy_from_slice(&buf[..n])))
            .await
            .is_err()
        {
            // Receiver went away (client disconnected); stop encoding.
            let _ = child.kill().await;
            return Err(CutError::Cancelled);
        }
    }

    let status = tokio::select! {
        _ = token.cancelled() => {
            let _ = child.kill().await;
            return Err(CutError::Cancelled);
        }
        status = child.wait() => status.map_err(|e| {
            CutError::io("waiting for", std::path::Path::new("ffmpeg"), e)
        })?,
    };

    let stderr_text = stderr_task.await.unwrap_or_default();
    if !status.success() {
        warn!(code = status.code(), "Encode pipeline failed");
        return Err(CutError::EncodeFailed {
            status: status.code().unwrap_or(-1),
            stderr: stderr_text,
        });
    }
    Ok(())
}

/// Stream a file's raw bytes into `tx`.
pub(crate) async fn pipe_file(
    path: &std::path::Path,
    tx: &ByteSender,
    token: &CancellationToken,
) -> Result<(), CutError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| CutError::io("opening segment", path, e))?;
    let mut reader = BufReader::new(file);
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = tokio::select! {
            _ = token.cancelled() => return Err(CutError::Cancelled),
            read = reader.read(&mut buf) => {
                read.map_err(|e| CutError::io("reading segment", path, e))?
            }
        };
        if n == 0 {
            return Ok(());
        }
        if tx
            .send(Ok(Bytes::copy_from_slice(&buf[..n])))
            .await
            .is_err()
        {
            return Err(CutError::Cancelled);
        }
    }
}

/// Forward a terminal error to the consumer, best-effort.
pub(crate) async fn send_error(tx: &ByteSender, error: CutError) {
    let _ = tx.send(Err(error)).await;
}
