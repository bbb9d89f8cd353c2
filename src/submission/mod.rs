// src/submission/mod.rs

//! Submissions: ordered, non-empty sequences of [`Command`]s executed on a
//! single pooled process.
//!
//! - [`command`] holds the per-instruction completion/error predicates and
//!   captured output buffers.
//! - [`handle`] is the caller-visible side: waiting, cancellation, status.
//!
//! A submission never migrates between processes, and its commands execute
//! strictly in declaration order. Internally the pool erases the result type
//! at submit time ([`ActiveSubmission`]); the typed result travels back to
//! the caller through its [`SubmissionHandle`].

pub mod command;
pub mod handle;

pub use command::{Command, CommandOutput};
pub use handle::SubmissionHandle;

use std::fmt;
use std::sync::Arc;

use crate::errors::PoolError;
use crate::submission::handle::SubmissionShared;
use crate::types::{SubmissionId, SubmissionStatus};

/// An ordered sequence of commands to run on one process, plus lifecycle
/// hooks and an optional result producer.
///
/// `T` is the type produced by [`with_result`](Submission::with_result) once
/// every command has completed; a plain `Submission` (i.e. `Submission<()>`)
/// produces nothing.
pub struct Submission<T = ()> {
    pub(crate) commands: Vec<Command>,
    pub(crate) terminate_process: bool,
    pub(crate) result: Box<dyn FnOnce(&[Command]) -> T + Send>,
    pub(crate) on_started: Option<Box<dyn FnMut() + Send>>,
    pub(crate) on_finished: Option<Box<dyn FnMut() + Send>>,
}

impl Submission<()> {
    /// Create a submission from the given commands.
    ///
    /// An empty command list is rejected at submit time.
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            terminate_process: false,
            result: Box::new(|_| ()),
            on_started: None,
            on_finished: None,
        }
    }

    /// Create a submission holding a single command.
    pub fn single(command: Command) -> Self {
        Self::new(vec![command])
    }
}

impl<T: Send + 'static> Submission<T> {
    /// Terminate the hosting process once this submission finishes, instead
    /// of returning it to the pool for reuse.
    pub fn terminate_process_after_execution(mut self, terminate: bool) -> Self {
        self.terminate_process = terminate;
        self
    }

    /// Produce the submission's value from the executed commands (their
    /// output buffers are readable at that point).
    pub fn with_result<U, F>(self, result: F) -> Submission<U>
    where
        U: Send + 'static,
        F: FnOnce(&[Command]) -> U + Send + 'static,
    {
        Submission {
            commands: self.commands,
            terminate_process: self.terminate_process,
            result: Box::new(result),
            on_started: self.on_started,
            on_finished: self.on_finished,
        }
    }

    /// Invoked when the submission starts executing on a process.
    pub fn on_started(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_started = Some(Box::new(hook));
        self
    }

    /// Invoked when the submission reaches a terminal state, whatever that
    /// state is.
    pub fn on_finished(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(hook));
        self
    }
}

impl<T> fmt::Debug for Submission<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("commands", &self.commands.len())
            .field("terminate_process", &self.terminate_process)
            .finish_non_exhaustive()
    }
}

/// Terminal outcome of a submission, as decided by the executor (or the
/// pool, for submissions that never started).
pub(crate) enum SubmissionOutcome {
    Completed,
    Failed(PoolError),
    Cancelled,
}

impl fmt::Debug for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionOutcome::Completed => write!(f, "Completed"),
            SubmissionOutcome::Failed(e) => write!(f, "Failed({e})"),
            SubmissionOutcome::Cancelled => write!(f, "Cancelled"),
        }
    }
}

type Finisher = Box<dyn FnOnce(&[Command], SubmissionOutcome) + Send>;

/// Type-erased submission as it travels through the queue and executors.
///
/// The finisher publishes the typed result and the terminal status to the
/// handle; it runs exactly once. If an `ActiveSubmission` is dropped without
/// being finished (an executor bug, a lost dispatch), the drop guard fails
/// it so the caller's wait never hangs.
pub(crate) struct ActiveSubmission {
    id: SubmissionId,
    pub(crate) commands: Vec<Command>,
    terminate_process: bool,
    on_started: Option<Box<dyn FnMut() + Send>>,
    on_finished: Option<Box<dyn FnMut() + Send>>,
    finisher: Option<Finisher>,
    shared: Arc<SubmissionShared>,
}

impl ActiveSubmission {
    pub(crate) fn new(
        id: SubmissionId,
        commands: Vec<Command>,
        terminate_process: bool,
        on_started: Option<Box<dyn FnMut() + Send>>,
        on_finished: Option<Box<dyn FnMut() + Send>>,
        finisher: Finisher,
        shared: Arc<SubmissionShared>,
    ) -> Self {
        Self {
            id,
            commands,
            terminate_process,
            on_started,
            on_finished,
            finisher: Some(finisher),
            shared,
        }
    }

    pub(crate) fn id(&self) -> SubmissionId {
        self.id
    }

    pub(crate) fn terminates_process(&self) -> bool {
        self.terminate_process
    }

    /// Whether the caller requested cancellation (cooperative or forced).
    pub(crate) fn cancel_requested(&self) -> bool {
        self.shared.cancel_requested()
    }

    /// Transition to `Running` and fire the start hook.
    pub(crate) fn mark_started(&mut self) {
        self.shared.try_transition(SubmissionStatus::Running);
        if let Some(hook) = &mut self.on_started {
            hook();
        }
    }

    /// Reach a terminal state: fire the finish hook, publish the outcome.
    pub(crate) fn finish(&mut self, outcome: SubmissionOutcome) {
        let Some(finisher) = self.finisher.take() else {
            return;
        };
        if let Some(hook) = &mut self.on_finished {
            hook();
        }
        finisher(&self.commands, outcome);
    }

    /// Move the commands out, e.g. to hand a never-started submission back
    /// to the caller after a forced shutdown.
    pub(crate) fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }
}

impl Drop for ActiveSubmission {
    fn drop(&mut self) {
        if self.finisher.is_some() {
            self.finish(SubmissionOutcome::Failed(PoolError::Other(anyhow::anyhow!(
                "submission dropped before reaching a terminal state"
            ))));
        }
    }
}

impl fmt::Debug for ActiveSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSubmission")
            .field("id", &self.id)
            .field("commands", &self.commands.len())
            .field("terminate_process", &self.terminate_process)
            .finish_non_exhaustive()
    }
}
