// src/pool/mod.rs

//! The pool: fleet management and the public submission API.
//!
//! - [`core`] is the pure sizing/dispatch state machine (no IO, no clock).
//! - [`queue`] is the FIFO of submissions waiting for an idle executor.
//! - [`dispatcher`] is the async shell around the core: it owns the event
//!   channel, executes the core's commands, and arms the keep-alive timer.
//!
//! [`ProcessPool`] is the caller-facing handle; everything it does is a
//! message to the dispatcher, which is the single logical actor mutating
//! pool state.

pub mod core;
pub mod dispatcher;
pub mod queue;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::errors::{PoolError, Result};
use crate::process::manager::ProcessManagerFactory;
use crate::submission::handle::create_pair;
use crate::submission::{ActiveSubmission, Command, Submission, SubmissionHandle, SubmissionOutcome};
use crate::types::{ExecutorId, SubmissionId};

use self::dispatcher::Dispatcher;

/// Events flowing into the pool dispatcher from handles, executors, and the
/// public API.
pub(crate) enum PoolEvent {
    /// A submission was accepted by `submit`.
    SubmissionEnqueued(ActiveSubmission),
    /// A handle requested cancellation.
    CancelSubmission { id: SubmissionId, force: bool },
    /// An executor finished starting up and is ready for work.
    ExecutorStarted { id: ExecutorId },
    /// An executor failed before becoming ready.
    ExecutorStartupFailed { id: ExecutorId, error: String },
    /// An executor finished a submission and its process is reusable.
    ExecutorIdle { id: ExecutorId },
    /// An executor's process is gone and its task has cleaned up.
    ExecutorStopped { id: ExecutorId },
    /// The keep-alive timer fired.
    KeepAliveTick,
    /// Orderly shutdown was requested.
    ShutdownRequested,
    /// Forced shutdown; replies with the never-processed submissions.
    ForceShutdownRequested {
        reply: oneshot::Sender<Vec<UnprocessedSubmission>>,
    },
}

impl fmt::Debug for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEvent::SubmissionEnqueued(s) => write!(f, "SubmissionEnqueued({})", s.id()),
            PoolEvent::CancelSubmission { id, force } => {
                write!(f, "CancelSubmission({id}, force: {force})")
            }
            PoolEvent::ExecutorStarted { id } => write!(f, "ExecutorStarted({id})"),
            PoolEvent::ExecutorStartupFailed { id, error } => {
                write!(f, "ExecutorStartupFailed({id}: {error})")
            }
            PoolEvent::ExecutorIdle { id } => write!(f, "ExecutorIdle({id})"),
            PoolEvent::ExecutorStopped { id } => write!(f, "ExecutorStopped({id})"),
            PoolEvent::KeepAliveTick => write!(f, "KeepAliveTick"),
            PoolEvent::ShutdownRequested => write!(f, "ShutdownRequested"),
            PoolEvent::ForceShutdownRequested { .. } => write!(f, "ForceShutdownRequested"),
        }
    }
}

/// Instructions the core state machine hands to the dispatcher shell.
#[derive(Debug)]
pub(crate) enum PoolCommand {
    /// Launch a new executor task.
    SpawnExecutor { id: ExecutorId },
    /// Hand a submission to an idle executor.
    Assign {
        executor: ExecutorId,
        submission: ActiveSubmission,
    },
    /// Retire an executor in an orderly way.
    StopExecutor { id: ExecutorId },
    /// Destroy an executor's process immediately.
    KillExecutor { id: ExecutorId },
    /// Forcibly cancel the submission running on an executor.
    CancelRunning {
        executor: ExecutorId,
        submission: SubmissionId,
    },
    /// Finish a submission that never ran (rejected, cancelled, drained).
    FinishSubmission {
        submission: ActiveSubmission,
        outcome: SubmissionOutcome,
    },
    /// The initial population is fully idle; construction may return.
    InitialPopulationReady,
    /// An initial executor failed; construction fails.
    InitialPopulationFailed { error: String },
}

/// A submission handed back by [`ProcessPool::force_shutdown`] because it
/// was still queued when the pool was torn down. Its handle has been marked
/// cancelled; the commands (with any captured output) are returned to the
/// caller.
#[derive(Debug)]
pub struct UnprocessedSubmission {
    id: SubmissionId,
    commands: Vec<Command>,
}

impl UnprocessedSubmission {
    pub fn id(&self) -> SubmissionId {
        self.id
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// Live counters published by the dispatcher, readable without locking.
pub(crate) struct PoolShared {
    shutdown: AtomicBool,
    num_processes: AtomicUsize,
    num_queued: AtomicUsize,
    num_executing: AtomicUsize,
    terminated_tx: watch::Sender<bool>,
}

impl PoolShared {
    fn new() -> Self {
        let (terminated_tx, _) = watch::channel(false);
        Self {
            shutdown: AtomicBool::new(false),
            num_processes: AtomicUsize::new(0),
            num_queued: AtomicUsize::new(0),
            num_executing: AtomicUsize::new(0),
            terminated_tx,
        }
    }

    pub(crate) fn publish(&self, processes: usize, queued: usize, executing: usize) {
        self.num_processes.store(processes, Ordering::SeqCst);
        self.num_queued.store(queued, Ordering::SeqCst);
        self.num_executing.store(executing, Ordering::SeqCst);
    }

    pub(crate) fn mark_terminated(&self) {
        self.terminated_tx.send_replace(true);
    }
}

/// A pool of long-running interactive processes executing submissions.
///
/// Construction blocks until the initial population (`max(min_size,
/// reserve_size)` processes) is idle; afterwards the pool grows and shrinks
/// between `min_size` and `max_size` with the submission rate. Dropping the
/// pool without shutting it down force-terminates all processes.
pub struct ProcessPool {
    config: PoolConfig,
    event_tx: mpsc::UnboundedSender<PoolEvent>,
    shared: Arc<PoolShared>,
    next_submission: AtomicU64,
    token: CancellationToken,
}

impl ProcessPool {
    /// Build a pool and block until its initial population is ready.
    pub async fn new(
        factory: impl ProcessManagerFactory,
        config: PoolConfig,
    ) -> Result<Self> {
        Self::with_shutdown_token(factory, config, CancellationToken::new()).await
    }

    /// Like [`new`](Self::new), but `token` aborts construction (failing it
    /// with [`PoolError::Interrupted`] and reaping every process spawned so
    /// far) and later interrupts [`await_termination`](Self::await_termination).
    /// Cancelling the token on a running pool behaves like a forced
    /// shutdown.
    pub async fn with_shutdown_token(
        factory: impl ProcessManagerFactory,
        config: PoolConfig,
        token: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let config = config.normalized();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PoolShared::new());
        let (ready_tx, ready_rx) = oneshot::channel();

        let dispatcher = Dispatcher::new(
            config.clone(),
            Arc::new(factory),
            event_tx.clone(),
            event_rx,
            shared.clone(),
            token.clone(),
            ready_tx,
        );
        tokio::spawn(dispatcher.run());

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                config,
                event_tx,
                shared,
                next_submission: AtomicU64::new(0),
                token,
            }),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(PoolError::Interrupted),
        }
    }

    /// Submit a submission for execution. Never blocks; the returned handle
    /// waits, cancels, and reports status.
    pub fn submit<T: Send + 'static>(
        &self,
        submission: Submission<T>,
    ) -> Result<SubmissionHandle<T>> {
        if self.is_shutdown() {
            return Err(PoolError::SubmissionRejected);
        }
        if submission.commands.is_empty() {
            return Err(PoolError::InvalidSubmission(
                "a submission must hold at least one command".to_string(),
            ));
        }
        let id = SubmissionId(self.next_submission.fetch_add(1, Ordering::SeqCst));
        let (active, handle) = create_pair(id, submission, self.event_tx.clone());
        self.event_tx
            .send(PoolEvent::SubmissionEnqueued(active))
            .map_err(|_| PoolError::SubmissionRejected)?;
        Ok(handle)
    }

    /// Initiate orderly shutdown: no new submissions are accepted, queued
    /// and running submissions complete, then every process is retired.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.event_tx.send(PoolEvent::ShutdownRequested);
    }

    /// Immediate shutdown: the queue is drained (those submissions are
    /// handed back, their handles marked cancelled) and every process is
    /// destroyed. Does not wait for full termination; use
    /// [`await_termination`](Self::await_termination) for that.
    pub async fn force_shutdown(&self) -> Vec<UnprocessedSubmission> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        if self
            .event_tx
            .send(PoolEvent::ForceShutdownRequested { reply })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Whether shutdown (orderly or forced) has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst) || self.token.is_cancelled()
    }

    /// Whether the pool has fully terminated: shut down with every process
    /// stopped and reaped.
    pub fn is_terminated(&self) -> bool {
        *self.shared.terminated_tx.borrow()
    }

    /// Block until the pool terminates or `timeout` passes; returns whether
    /// it terminated. A cancelled shutdown token interrupts the wait.
    pub async fn await_termination(&self, timeout: Duration) -> Result<bool> {
        let mut rx = self.shared.terminated_tx.subscribe();
        if *rx.borrow() {
            return Ok(true);
        }
        tokio::select! {
            waited = tokio::time::timeout(timeout, rx.wait_for(|t| *t)) => match waited {
                Ok(Ok(_)) => Ok(true),
                Ok(Err(_)) => Ok(self.is_terminated()),
                Err(_) => Ok(false),
            },
            _ = self.token.cancelled() => Err(PoolError::Interrupted),
        }
    }

    pub fn num_processes(&self) -> usize {
        self.shared.num_processes.load(Ordering::SeqCst)
    }

    pub fn num_queued_submissions(&self) -> usize {
        self.shared.num_queued.load(Ordering::SeqCst)
    }

    pub fn num_executing_submissions(&self) -> usize {
        self.shared.num_executing.load(Ordering::SeqCst)
    }

    pub fn min_size(&self) -> usize {
        self.config.min_size
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    pub fn reserve_size(&self) -> usize {
        self.config.reserve_size
    }

    /// The configured keep-alive, `None` meaning processes never time out.
    pub fn keep_alive(&self) -> Option<Duration> {
        self.config.keep_alive
    }

    pub fn is_verbose(&self) -> bool {
        self.config.verbose
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        // A pool dropped without shutdown still must not leak processes.
        if !self.is_shutdown() {
            self.token.cancel();
        }
    }
}

impl fmt::Debug for ProcessPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessPool")
            .field("config", &self.config)
            .field("num_processes", &self.num_processes())
            .field("num_queued", &self.num_queued_submissions())
            .field("num_executing", &self.num_executing_submissions())
            .field("shutdown", &self.is_shutdown())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
