// src/errors.rs

//! Crate-wide error type and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("the pool has been shut down; submission rejected")]
    SubmissionRejected,

    #[error("process failed to start up: {0}")]
    StartupFailed(String),

    #[error("process exited while a submission was executing")]
    ProcessDied,

    #[error("failed to deliver instruction to process: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("command '{0}' signalled error termination")]
    CommandFailed(String),

    #[error("command '{0}' exceeded its deadline")]
    CommandTimeout(String),

    #[error("submission was cancelled")]
    Cancelled,

    #[error("wait timed out")]
    WaitTimeout,

    #[error("operation interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PoolError>;
