// src/process/shell.rs

//! One-executor-scoped shell for running commands outside the normal
//! submission flow.
//!
//! A [`ProcessShell`] borrows an executor's stdin writer and line channel
//! for the duration of a [`ProcessManager`](crate::ProcessManager) hook, so
//! startup initialisation and orderly termination reuse exactly the same
//! command loop as regular submissions.

use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;

use crate::errors::{PoolError, Result};
use crate::process::stream::StreamEvent;
use crate::submission::command::{Command, LineOutcome};
use crate::types::ExecutorId;

/// Shell handed to `ProcessManager::on_startup` and
/// `ProcessManager::terminate`. Commands run synchronously on the hosting
/// process; the executed commands are handed back so their output buffers
/// can be inspected.
pub struct ProcessShell<'a> {
    pub(crate) executor: ExecutorId,
    pub(crate) stdin: &'a mut ChildStdin,
    pub(crate) events: &'a mut mpsc::Receiver<StreamEvent>,
}

impl ProcessShell<'_> {
    /// The executor this shell is scoped to.
    pub fn executor(&self) -> ExecutorId {
        self.executor
    }

    /// Run the commands, in order, on this process.
    pub async fn execute(&mut self, commands: Vec<Command>) -> Result<Vec<Command>> {
        if commands.is_empty() {
            return Err(PoolError::InvalidSubmission(
                "a submission must hold at least one command".to_string(),
            ));
        }
        let mut commands = commands;
        for command in commands.iter_mut() {
            run_command(command, self.stdin, self.events).await?;
        }
        Ok(commands)
    }
}

/// Write one instruction and consume stream events until the command's
/// predicates end it.
///
/// Errors: `WriteFailed` if the instruction cannot be delivered,
/// `ProcessDied` on stdout EOF, `CommandFailed` when the error predicate
/// fires, `CommandTimeout` when a configured deadline passes.
pub(crate) async fn run_command(
    command: &mut Command,
    stdin: &mut ChildStdin,
    events: &mut mpsc::Receiver<StreamEvent>,
) -> Result<()> {
    stdin
        .write_all(command.instruction().as_bytes())
        .await
        .map_err(PoolError::WriteFailed)?;
    stdin.write_all(b"\n").await.map_err(PoolError::WriteFailed)?;
    stdin.flush().await.map_err(PoolError::WriteFailed)?;

    let deadline = command
        .deadline()
        .map(|d| tokio::time::Instant::now() + d);

    loop {
        let event = match deadline {
            Some(at) => match tokio::time::timeout_at(at, events.recv()).await {
                Err(_) => {
                    return Err(PoolError::CommandTimeout(command.instruction().to_string()))
                }
                Ok(event) => event,
            },
            None => events.recv().await,
        };

        match event {
            Some(StreamEvent::Line { source, text }) => {
                match command.receive_line(&text, source) {
                    LineOutcome::Pending => {}
                    LineOutcome::Complete => return Ok(()),
                    LineOutcome::Error => {
                        return Err(PoolError::CommandFailed(
                            command.instruction().to_string(),
                        ))
                    }
                }
            }
            // stderr closing on its own is not fatal; keep reading stdout.
            Some(StreamEvent::Eof { source }) if !source.is_stdout() => {}
            Some(StreamEvent::Eof { .. }) | None => return Err(PoolError::ProcessDied),
        }
    }
}
