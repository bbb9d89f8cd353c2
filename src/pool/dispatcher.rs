// src/pool/dispatcher.rs

//! Async IO shell around the pure [`PoolCore`].
//!
//! One loop, one logical actor: every state change flows through the event
//! channel, is fed to the core, and the returned commands are executed here
//! (spawning executor tasks, forwarding assignments, resolving the
//! construction barrier, publishing counters). A single `sleep_until` on
//! the earliest idle deadline implements keep-alive without per-executor
//! timers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PoolConfig;
use crate::errors::{PoolError, Result};
use crate::pool::core::PoolCore;
use crate::pool::{PoolCommand, PoolEvent, PoolShared, UnprocessedSubmission};
use crate::process::executor::{run_executor, ExecutorRequest};
use crate::process::manager::ProcessManagerFactory;
use crate::submission::SubmissionOutcome;
use crate::types::ExecutorId;

/// Capacity of each executor's request channel: one assignment plus a few
/// control messages can be in flight.
const REQUEST_CHANNEL_CAPACITY: usize = 4;

pub(crate) struct Dispatcher {
    core: PoolCore,
    factory: Arc<dyn ProcessManagerFactory>,
    event_tx: mpsc::UnboundedSender<PoolEvent>,
    event_rx: mpsc::UnboundedReceiver<PoolEvent>,
    shared: Arc<PoolShared>,
    token: CancellationToken,
    ready: Option<oneshot::Sender<Result<()>>>,
    executors: HashMap<ExecutorId, mpsc::Sender<ExecutorRequest>>,
    interrupted: bool,
    verbose: bool,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: PoolConfig,
        factory: Arc<dyn ProcessManagerFactory>,
        event_tx: mpsc::UnboundedSender<PoolEvent>,
        event_rx: mpsc::UnboundedReceiver<PoolEvent>,
        shared: Arc<PoolShared>,
        token: CancellationToken,
        ready: oneshot::Sender<Result<()>>,
    ) -> Self {
        let verbose = config.verbose;
        Self {
            core: PoolCore::new(config),
            factory,
            event_tx,
            event_rx,
            shared,
            token,
            ready: Some(ready),
            executors: HashMap::new(),
            interrupted: false,
            verbose,
        }
    }

    pub(crate) async fn run(mut self) {
        let commands = self.core.bootstrap();
        self.execute_all(commands).await;
        self.publish();

        loop {
            let deadline = self.core.next_keep_alive_deadline();
            tokio::select! {
                event = self.event_rx.recv() => {
                    // The pool handle owns a sender, so this only closes
                    // once everything else is gone.
                    let Some(event) = event else { break };
                    if self.handle_event(event).await {
                        break;
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.handle_event(PoolEvent::KeepAliveTick).await {
                        break;
                    }
                }
                _ = self.token.cancelled(), if !self.interrupted => {
                    self.interrupted = true;
                    if self.handle_interrupt().await {
                        break;
                    }
                }
            }
        }
    }

    /// Feed one event through the core and execute the resulting commands.
    /// Returns true once the pool has fully terminated.
    async fn handle_event(&mut self, event: PoolEvent) -> bool {
        match event {
            PoolEvent::ForceShutdownRequested { reply } => {
                let (unprocessed, terminated) = self.force_shutdown().await;
                let _ = reply.send(unprocessed);
                if terminated {
                    self.finish();
                }
                terminated
            }
            event => {
                if let PoolEvent::ExecutorStopped { id }
                | PoolEvent::ExecutorStartupFailed { id, .. } = &event
                {
                    self.executors.remove(id);
                }
                let step = self.core.step(event, Instant::now());
                self.execute_all(step.commands).await;
                self.publish();
                if step.terminated {
                    self.finish();
                }
                step.terminated
            }
        }
    }

    /// A cancelled shutdown token: abort construction if it is still
    /// pending, then tear the pool down like a forced shutdown.
    async fn handle_interrupt(&mut self) -> bool {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(PoolError::Interrupted));
        }
        let (_unprocessed, terminated) = self.force_shutdown().await;
        if terminated {
            self.finish();
        }
        terminated
    }

    async fn force_shutdown(&mut self) -> (Vec<UnprocessedSubmission>, bool) {
        if self.verbose {
            info!("forced shutdown: draining queue and destroying processes");
        }
        let (drained, step) = self.core.force_shutdown();
        let mut unprocessed = Vec::with_capacity(drained.len());
        for mut submission in drained {
            submission.finish(SubmissionOutcome::Cancelled);
            unprocessed.push(UnprocessedSubmission {
                id: submission.id(),
                commands: submission.take_commands(),
            });
        }
        self.execute_all(step.commands).await;
        self.publish();
        (unprocessed, step.terminated)
    }

    async fn execute_all(&mut self, commands: Vec<PoolCommand>) {
        for command in commands {
            self.execute(command).await;
        }
    }

    async fn execute(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::SpawnExecutor { id } => {
                let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
                tokio::spawn(run_executor(
                    id,
                    self.factory.clone(),
                    request_rx,
                    self.event_tx.clone(),
                    self.verbose,
                ));
                self.executors.insert(id, request_tx);
            }
            PoolCommand::Assign {
                executor,
                submission,
            } => {
                let Some(request_tx) = self.executors.get(&executor) else {
                    self.core.requeue_front(submission);
                    return;
                };
                if self.verbose {
                    info!(executor = %executor, submission = %submission.id(),
                        "dispatching submission");
                }
                if let Err(mpsc::error::SendError(request)) =
                    request_tx.send(ExecutorRequest::Run(submission)).await
                {
                    // The executor died between reporting idle and receiving
                    // the assignment; its stopped report will re-dispatch.
                    if let ExecutorRequest::Run(submission) = request {
                        warn!(executor = %executor,
                            "assignment undeliverable; requeueing submission");
                        self.core.requeue_front(submission);
                    }
                }
            }
            PoolCommand::StopExecutor { id } => {
                if self.verbose {
                    info!(executor = %id, "retiring executor");
                }
                self.send_request(id, ExecutorRequest::Stop).await;
            }
            PoolCommand::KillExecutor { id } => {
                self.send_request(id, ExecutorRequest::Kill).await;
            }
            PoolCommand::CancelRunning {
                executor,
                submission,
            } => {
                self.send_request(executor, ExecutorRequest::Cancel { submission })
                    .await;
            }
            PoolCommand::FinishSubmission {
                mut submission,
                outcome,
            } => {
                submission.finish(outcome);
            }
            PoolCommand::InitialPopulationReady => {
                if self.verbose {
                    info!(processes = self.core.num_processes(), "initial population ready");
                }
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(()));
                }
            }
            PoolCommand::InitialPopulationFailed { error } => {
                warn!(error = %error, "initial population failed; aborting construction");
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Err(PoolError::StartupFailed(error)));
                }
            }
        }
    }

    async fn send_request(&mut self, id: ExecutorId, request: ExecutorRequest) {
        if let Some(request_tx) = self.executors.get(&id) {
            // A closed channel means the executor task already finished; its
            // stopped report cleans up the bookkeeping.
            let _ = request_tx.send(request).await;
        }
    }

    fn publish(&self) {
        self.shared.publish(
            self.core.num_processes(),
            self.core.num_queued(),
            self.core.num_executing(),
        );
    }

    fn finish(&self) {
        if self.verbose {
            info!("process pool terminated");
        }
        self.shared.mark_terminated();
    }
}
