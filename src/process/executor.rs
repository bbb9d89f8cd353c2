// src/process/executor.rs

//! Per-process supervisor.
//!
//! Each executor is one tokio task owning one child process, its stdin
//! writer, and the two stream-reader tasks. The pool talks to it over a
//! request channel; the executor reports lifecycle transitions back over the
//! shared pool event channel. At most one submission runs at a time.
//!
//! Lifecycle: *starting* (spawn, verify startup, init hook) → *idle* ⇄
//! *busy* → *stopping* → *stopped*. Keep-alive timing is the dispatcher's
//! job; the executor only ever stops when told to, when a submission marks
//! its process non-reusable, or when the process dies under it.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::errors::{PoolError, Result};
use crate::pool::PoolEvent;
use crate::process::manager::{ProcessManager, ProcessManagerFactory};
use crate::process::shell::{run_command, ProcessShell};
use crate::process::stream::{line_channel, spawn_stream_readers, StreamEvent};
use crate::submission::{ActiveSubmission, SubmissionOutcome};
use crate::types::{ExecutorId, SubmissionId};

/// How long an orderly termination may take before the process is killed.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Requests the pool dispatcher sends to one executor.
#[derive(Debug)]
pub(crate) enum ExecutorRequest {
    /// Execute a submission. Only sent to an idle executor.
    Run(ActiveSubmission),
    /// Forcibly cancel the named submission if it is the one running.
    Cancel { submission: SubmissionId },
    /// Retire in an orderly way. Only sent while idle.
    Stop,
    /// Destroy the process immediately.
    Kill,
}

/// How the executor leaves its serve loop.
#[derive(Debug, Clone, Copy)]
enum StopMode {
    /// Ask the manager's termination protocol first, then fall back to kill.
    Orderly,
    /// Kill without asking.
    Forced,
    /// The process is already gone; just reap and clean up.
    Dead,
}

/// What a finished submission means for the hosting process.
enum SubmissionEnd {
    Reusable,
    Retire,
    ProcessLost,
}

enum CommandEnd {
    Finished(Result<()>),
    Killed,
}

/// Entry point for one executor task.
pub(crate) async fn run_executor(
    id: ExecutorId,
    factory: Arc<dyn ProcessManagerFactory>,
    mut requests: mpsc::Receiver<ExecutorRequest>,
    pool_tx: mpsc::UnboundedSender<PoolEvent>,
    verbose: bool,
) {
    let manager = factory.new_manager();
    let mut executor = match ProcessExecutor::launch(id, manager, verbose).await {
        Ok(executor) => executor,
        Err(error) => {
            let _ = pool_tx.send(PoolEvent::ExecutorStartupFailed {
                id,
                error: startup_error_message(error),
            });
            return;
        }
    };

    // Startup verification and the init hook can be interrupted by a kill
    // (forced shutdown, or a construction that was aborted mid-population).
    let startup = {
        let fut = executor.start_up();
        tokio::pin!(fut);
        loop {
            tokio::select! {
                result = &mut fut => break Some(result),
                request = requests.recv() => match request {
                    Some(ExecutorRequest::Kill) | Some(ExecutorRequest::Stop) | None => break None,
                    // Run/Cancel cannot arrive before Started is reported.
                    Some(_) => continue,
                },
            }
        }
    };

    match startup {
        None => {
            executor.stop(StopMode::Forced).await;
            let _ = pool_tx.send(PoolEvent::ExecutorStopped { id });
        }
        Some(Err(error)) => {
            executor.stop(StopMode::Forced).await;
            let _ = pool_tx.send(PoolEvent::ExecutorStartupFailed {
                id,
                error: startup_error_message(error),
            });
        }
        Some(Ok(())) => {
            let _ = pool_tx.send(PoolEvent::ExecutorStarted { id });
            executor.serve(requests, &pool_tx).await;
        }
    }
}

/// The message reported to the pool; an error that is already a startup
/// failure keeps its inner message instead of gaining a second prefix.
fn startup_error_message(error: PoolError) -> String {
    match error {
        PoolError::StartupFailed(message) => message,
        other => other.to_string(),
    }
}

/// Supervisor state for one child process.
struct ProcessExecutor {
    id: ExecutorId,
    manager: Box<dyn ProcessManager>,
    child: Child,
    stdin: ChildStdin,
    lines: mpsc::Receiver<StreamEvent>,
    readers: (JoinHandle<()>, JoinHandle<()>),
    verbose: bool,
}

impl ProcessExecutor {
    async fn launch(
        id: ExecutorId,
        mut manager: Box<dyn ProcessManager>,
        verbose: bool,
    ) -> Result<Self> {
        let spec = manager.launch_spec();
        if verbose {
            info!(executor = %id, program = %spec.program(), "spawning pool process");
        }
        let mut child = spec.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::StartupFailed("child stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::StartupFailed("child stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PoolError::StartupFailed("child stderr not piped".to_string()))?;

        let (tx, lines) = line_channel();
        let readers = spawn_stream_readers(id, stdout, stderr, tx);

        Ok(Self {
            id,
            manager,
            child,
            stdin,
            lines,
            readers,
            verbose,
        })
    }

    /// Wait for the startup announcement (unless the process starts up
    /// instantly), then run the manager's init hook.
    async fn start_up(&mut self) -> Result<()> {
        if !self.manager.starts_up_instantly() {
            loop {
                match self.lines.recv().await {
                    Some(StreamEvent::Line { source, text }) => {
                        if self.manager.is_started_up(&text, source) {
                            break;
                        }
                    }
                    Some(StreamEvent::Eof { source }) if !source.is_stdout() => {}
                    Some(StreamEvent::Eof { .. }) | None => {
                        return Err(PoolError::StartupFailed(
                            "process exited before completing startup".to_string(),
                        ));
                    }
                }
            }
            if self.verbose {
                info!(executor = %self.id, "startup verified");
            }
        }

        let Self {
            id,
            manager,
            stdin,
            lines,
            ..
        } = self;
        let mut shell = ProcessShell {
            executor: *id,
            stdin,
            events: lines,
        };
        manager.on_startup(&mut shell).await
    }

    /// Idle/busy loop: execute assigned submissions until the pool retires
    /// this executor or the process goes away.
    async fn serve(
        mut self,
        mut requests: mpsc::Receiver<ExecutorRequest>,
        pool_tx: &mpsc::UnboundedSender<PoolEvent>,
    ) {
        let id = self.id;
        let mode = loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(ExecutorRequest::Run(submission)) => {
                        match self.run_submission(submission, &mut requests).await {
                            SubmissionEnd::Reusable => {
                                let _ = pool_tx.send(PoolEvent::ExecutorIdle { id });
                            }
                            SubmissionEnd::Retire => break StopMode::Orderly,
                            SubmissionEnd::ProcessLost => break StopMode::Dead,
                        }
                    }
                    Some(ExecutorRequest::Stop) => break StopMode::Orderly,
                    Some(ExecutorRequest::Kill) | None => break StopMode::Forced,
                    // A cancel for a submission that already finished.
                    Some(ExecutorRequest::Cancel { .. }) => continue,
                },
                event = self.lines.recv() => match event {
                    Some(StreamEvent::Line { source, text }) => {
                        trace!(executor = %id, stream = %source, line = %text,
                            "output while idle; dropped");
                    }
                    Some(StreamEvent::Eof { source }) if !source.is_stdout() => continue,
                    Some(StreamEvent::Eof { .. }) | None => break StopMode::Dead,
                },
            }
        };
        self.stop(mode).await;
        let _ = pool_tx.send(PoolEvent::ExecutorStopped { id });
    }

    async fn run_submission(
        &mut self,
        mut submission: ActiveSubmission,
        requests: &mut mpsc::Receiver<ExecutorRequest>,
    ) -> SubmissionEnd {
        let executor_id = self.id;
        let submission_id = submission.id();
        if self.verbose {
            info!(executor = %executor_id, submission = %submission_id, "submission started");
        }
        submission.mark_started();

        let mut end = SubmissionEnd::Reusable;
        let mut outcome = SubmissionOutcome::Completed;

        for index in 0..submission.commands.len() {
            // Cooperative cancellation: finish the in-flight command, start
            // no further ones.
            if submission.cancel_requested() {
                outcome = SubmissionOutcome::Cancelled;
                break;
            }

            let command_end = {
                let Self { stdin, lines, .. } = &mut *self;
                let command = &mut submission.commands[index];
                let run = run_command(command, stdin, lines);
                tokio::pin!(run);
                loop {
                    tokio::select! {
                        result = &mut run => break CommandEnd::Finished(result),
                        request = requests.recv() => match request {
                            Some(ExecutorRequest::Cancel { submission: cancel_id })
                                if cancel_id == submission_id =>
                            {
                                break CommandEnd::Killed;
                            }
                            Some(ExecutorRequest::Kill) | None => break CommandEnd::Killed,
                            Some(ExecutorRequest::Cancel { .. })
                            | Some(ExecutorRequest::Stop) => continue,
                            Some(ExecutorRequest::Run(_)) => {
                                // Cannot happen: the dispatcher never assigns
                                // to a busy executor. Dropping it fails the
                                // stray submission via its guard.
                                warn!(executor = %executor_id, "assignment received while busy; dropped");
                                continue;
                            }
                        },
                    }
                }
            };

            match command_end {
                CommandEnd::Finished(Ok(())) => {}
                CommandEnd::Finished(Err(error)) => {
                    let fatal = matches!(
                        error,
                        PoolError::ProcessDied
                            | PoolError::WriteFailed(_)
                            | PoolError::CommandTimeout(_)
                    );
                    outcome = SubmissionOutcome::Failed(error);
                    if fatal {
                        end = SubmissionEnd::ProcessLost;
                    }
                    break;
                }
                CommandEnd::Killed => {
                    let _ = self.child.start_kill();
                    outcome = SubmissionOutcome::Cancelled;
                    end = SubmissionEnd::ProcessLost;
                    break;
                }
            }
        }

        // A cooperative cancel that raced the final command still reports
        // the submission as cancelled.
        if matches!(outcome, SubmissionOutcome::Completed) && submission.cancel_requested() {
            outcome = SubmissionOutcome::Cancelled;
        }

        if self.verbose {
            info!(executor = %self.id, submission = %submission_id, outcome = ?outcome,
                "submission finished");
        }
        submission.finish(outcome);

        if matches!(end, SubmissionEnd::Reusable) && submission.terminates_process() {
            end = SubmissionEnd::Retire;
        }
        end
    }

    /// Tear the process down: optional orderly protocol, then kill; close
    /// stdin, reap the child, join both readers.
    async fn stop(self, mode: StopMode) {
        let Self {
            id,
            mut manager,
            mut child,
            mut stdin,
            mut lines,
            readers,
            verbose,
        } = self;

        if verbose {
            info!(executor = %id, mode = ?mode, "stopping process");
        }

        let orderly = matches!(mode, StopMode::Orderly) && {
            let mut shell = ProcessShell {
                executor: id,
                stdin: &mut stdin,
                events: &mut lines,
            };
            manager.terminate(&mut shell).await
        };

        drop(stdin);
        if orderly {
            if tokio::time::timeout(TERMINATION_GRACE, child.wait())
                .await
                .is_err()
            {
                if verbose {
                    warn!(executor = %id, "orderly termination timed out; killing process");
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        } else {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        // Dropping the receiver unblocks any reader still trying to send;
        // both end at EOF now that the process is gone.
        drop(lines);
        let _ = readers.0.await;
        let _ = readers.1.await;

        if verbose {
            info!(executor = %id, "process stopped");
        }
    }
}
