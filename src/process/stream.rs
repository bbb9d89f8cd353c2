// src/process/stream.rs

//! Line-oriented readers over a child process's stdout and stderr.
//!
//! One reader task per stream; both feed the owning executor's single
//! bounded channel, so the executor observes one serialised sequence of
//! tagged lines. EOF — and any read error, which is demoted to EOF — ends a
//! reader; whether that is fatal is the executor's call.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::types::{ExecutorId, StreamSource};

/// Capacity of the per-executor line channel. Two producers (stdout,
/// stderr), one consumer (the executor loop).
const LINE_CHANNEL_CAPACITY: usize = 64;

/// One event observed on a child's output stream.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    /// A full line, trailing newline stripped. Blank lines are preserved.
    Line { source: StreamSource, text: String },
    /// The stream was closed (or failed; read errors are demoted to EOF).
    Eof { source: StreamSource },
}

pub(crate) fn line_channel() -> (mpsc::Sender<StreamEvent>, mpsc::Receiver<StreamEvent>) {
    mpsc::channel(LINE_CHANNEL_CAPACITY)
}

/// Spawn the two reader tasks for one process. The returned handles are
/// joined by the executor before it reports itself stopped.
pub(crate) fn spawn_stream_readers(
    executor: ExecutorId,
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::Sender<StreamEvent>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let out = tokio::spawn(read_lines(executor, StreamSource::Stdout, stdout, tx.clone()));
    let err = tokio::spawn(read_lines(executor, StreamSource::Stderr, stderr, tx));
    (out, err)
}

async fn read_lines<R>(
    executor: ExecutorId,
    source: StreamSource,
    stream: R,
    tx: mpsc::Sender<StreamEvent>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(text)) => {
                if tx.send(StreamEvent::Line { source, text }).await.is_err() {
                    // Executor gone; nothing left to deliver to.
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(executor = %executor, stream = %source, error = %e,
                    "read error on child stream; treating as EOF");
                break;
            }
        }
    }
    let _ = tx.send(StreamEvent::Eof { source }).await;
}
