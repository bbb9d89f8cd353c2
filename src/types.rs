// src/types.rs

//! Small shared types used across the pool, executors, and submissions.

use std::fmt;

/// Identifier of one process executor within a pool.
///
/// Ids are assigned by the pool dispatcher and never reused within the
/// lifetime of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorId(pub(crate) u64);

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "executor-{}", self.0)
    }
}

/// Identifier of a submission, assigned at submit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmissionId(pub(crate) u64);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "submission-{}", self.0)
    }
}

/// Which output stream of the child process a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl StreamSource {
    pub fn is_stdout(self) -> bool {
        matches!(self, StreamSource::Stdout)
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Stdout => write!(f, "stdout"),
            StreamSource::Stderr => write!(f, "stderr"),
        }
    }
}

/// Lifecycle of a submission as observed through its handle.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal and sticky: once a
/// submission reaches one of them, no further transition happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    /// Accepted by the pool, waiting for an idle executor.
    Queued,
    /// Currently executing on a process.
    Running,
    /// All commands completed; the result (if any) is available.
    Completed,
    /// Execution failed; the handle reports the error.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Completed | SubmissionStatus::Failed | SubmissionStatus::Cancelled
        )
    }
}
