// src/submission/handle.rs

//! Caller-visible handle to a submitted submission.
//!
//! The handle and the pool share a [`SubmissionShared`] record: the status
//! travels over a `tokio::sync::watch` channel (so completion is published
//! happens-before any wait returns), the result value sits in a slot the
//! finisher fills before the terminal status is sent, and cancellation is a
//! flag plus an event to the pool dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::errors::{PoolError, Result};
use crate::pool::PoolEvent;
use crate::submission::{ActiveSubmission, Command, Submission, SubmissionOutcome};
use crate::types::{SubmissionId, SubmissionStatus};

/// State shared between a handle, the queue, and the executor running the
/// submission.
pub(crate) struct SubmissionShared {
    status_tx: watch::Sender<SubmissionStatus>,
    cancel_requested: AtomicBool,
}

impl SubmissionShared {
    fn new() -> Self {
        let (status_tx, _) = watch::channel(SubmissionStatus::Queued);
        Self {
            status_tx,
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// Move to `next` unless a terminal state has already been reached.
    /// Returns whether the transition happened; the first terminal
    /// transition wins.
    pub(crate) fn try_transition(&self, next: SubmissionStatus) -> bool {
        let mut changed = false;
        self.status_tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                false
            } else {
                *current = next;
                changed = true;
                true
            }
        });
        changed
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn status(&self) -> SubmissionStatus {
        *self.status_tx.borrow()
    }
}

/// Build the erased pool-side submission and the typed caller-side handle
/// for one accepted submission.
pub(crate) fn create_pair<T: Send + 'static>(
    id: SubmissionId,
    submission: Submission<T>,
    pool_tx: mpsc::UnboundedSender<PoolEvent>,
) -> (ActiveSubmission, SubmissionHandle<T>) {
    let shared = Arc::new(SubmissionShared::new());
    let status_rx = shared.status_tx.subscribe();
    let result_slot: Arc<Mutex<Option<Result<T>>>> = Arc::new(Mutex::new(None));

    let result_fn = submission.result;
    let finisher_shared = shared.clone();
    let finisher_slot = result_slot.clone();
    let finisher = Box::new(move |commands: &[Command], outcome: SubmissionOutcome| {
        let (stored, status): (Result<T>, SubmissionStatus) = match outcome {
            SubmissionOutcome::Completed => {
                (Ok(result_fn(commands)), SubmissionStatus::Completed)
            }
            SubmissionOutcome::Failed(error) => (Err(error), SubmissionStatus::Failed),
            SubmissionOutcome::Cancelled => {
                (Err(PoolError::Cancelled), SubmissionStatus::Cancelled)
            }
        };
        // The slot is filled before the terminal status is published, so a
        // woken waiter always finds the value.
        *finisher_slot.lock().expect("result slot poisoned") = Some(stored);
        finisher_shared.try_transition(status);
    });

    let active = ActiveSubmission::new(
        id,
        submission.commands,
        submission.terminate_process,
        submission.on_started,
        submission.on_finished,
        finisher,
        shared.clone(),
    );
    let handle = SubmissionHandle {
        id,
        shared,
        status_rx,
        result: result_slot,
        pool_tx,
    };
    (active, handle)
}

/// Handle to a submitted submission: wait for its result, cancel it, query
/// its status.
pub struct SubmissionHandle<T> {
    id: SubmissionId,
    shared: Arc<SubmissionShared>,
    status_rx: watch::Receiver<SubmissionStatus>,
    result: Arc<Mutex<Option<Result<T>>>>,
    pool_tx: mpsc::UnboundedSender<PoolEvent>,
}

impl<T> SubmissionHandle<T> {
    pub fn id(&self) -> SubmissionId {
        self.id
    }

    pub fn status(&self) -> SubmissionStatus {
        self.shared.status()
    }

    /// Whether the submission has reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == SubmissionStatus::Cancelled
    }

    /// Request cancellation. Idempotent; has no effect once the submission
    /// is terminal.
    ///
    /// - `force = false`: cooperative. A queued submission is removed from
    ///   the queue; a running one finishes its current command and skips the
    ///   rest. The hosting process survives.
    /// - `force = true`: the hosting process is destroyed immediately.
    pub fn cancel(&self, force: bool) {
        if self.is_done() {
            return;
        }
        self.shared.cancel_requested.store(true, Ordering::SeqCst);
        let _ = self.pool_tx.send(PoolEvent::CancelSubmission { id: self.id, force });
    }

    /// Wait until the submission reaches a terminal state and return its
    /// result: the produced value on completion, [`PoolError::Cancelled`]
    /// after a cancellation, or the failure that terminated it.
    pub async fn wait(&mut self) -> Result<T> {
        {
            let waited = self
                .status_rx
                .wait_for(|status| status.is_terminal())
                .await;
            if waited.is_err() {
                // The pool side vanished without publishing a terminal state.
                return Err(PoolError::Interrupted);
            }
            // The watch ref must be released before the result is taken.
        }
        self.take_result()
    }

    /// Like [`wait`](Self::wait), but give up after `timeout` with
    /// [`PoolError::WaitTimeout`]. A timeout does not affect execution; the
    /// wait can be retried.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<T> {
        {
            let waited = tokio::time::timeout(
                timeout,
                self.status_rx.wait_for(|status| status.is_terminal()),
            )
            .await;
            match waited {
                Err(_) => return Err(PoolError::WaitTimeout),
                Ok(Err(_)) => return Err(PoolError::Interrupted),
                Ok(Ok(_)) => {}
            }
        }
        self.take_result()
    }

    fn take_result(&self) -> Result<T> {
        let taken = self.result.lock().expect("result slot poisoned").take();
        match taken {
            Some(result) => result,
            // The value was already consumed by an earlier wait.
            None => match self.status() {
                SubmissionStatus::Cancelled => Err(PoolError::Cancelled),
                _ => Err(PoolError::Other(anyhow::anyhow!(
                    "submission result already taken"
                ))),
            },
        }
    }
}

impl<T> std::fmt::Debug for SubmissionHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
