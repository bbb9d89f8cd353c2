// src/lib.rs

//! procpool — a pool executor for long-running interactive OS processes.
//!
//! The pool maintains a fleet of child processes (CLIs, interpreters,
//! solvers) and multiplexes [`Submission`]s — ordered sequences of
//! line-based [`Command`]s — across them over stdin/stdout/stderr. Each
//! process is stateful: it reads an instruction, emits lines until the
//! command's completion predicate fires, then awaits the next instruction.
//!
//! The pool:
//! - grows and shrinks between `min_size` and `max_size`, keeping
//!   `reserve_size` idle processes warm and retiring surplus processes
//!   after an optional keep-alive;
//! - dispatches queued submissions FIFO to idle processes;
//! - supports cooperative and forced cancellation and orderly and forced
//!   shutdown;
//! - releases every spawned process on every exit path.
//!
//! The caller supplies a [`ProcessManager`] per process (how to launch it,
//! how to recognise startup, how to stop it through its own protocol) via a
//! [`ProcessManagerFactory`], and observes each submission through its
//! [`SubmissionHandle`].
//!
//! ```no_run
//! use procpool::{Command, LaunchSpec, PoolConfig, ProcessManager, ProcessPool, Submission};
//!
//! struct Bc;
//!
//! impl ProcessManager for Bc {
//!     fn launch_spec(&mut self) -> LaunchSpec {
//!         LaunchSpec::new("bc").arg("-q")
//!     }
//! }
//!
//! # async fn demo() -> procpool::Result<()> {
//! let pool = ProcessPool::new(
//!     || Box::new(Bc) as Box<dyn ProcessManager>,
//!     PoolConfig::new(1, 4, 1),
//! )
//! .await?;
//!
//! let submission = Submission::single(Command::new("2 + 2", |_, _, _| true))
//!     .with_result(|commands| commands[0].output().joined_stdout());
//! let mut handle = pool.submit(submission)?;
//! let answer = handle.wait().await?;
//! assert_eq!(answer, "4");
//!
//! pool.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod logging;
pub mod pool;
pub mod process;
pub mod submission;
pub mod types;

pub use config::PoolConfig;
pub use errors::{PoolError, Result};
pub use pool::{ProcessPool, UnprocessedSubmission};
pub use process::{LaunchSpec, ProcessManager, ProcessManagerFactory, ProcessShell};
pub use submission::{Command, CommandOutput, Submission, SubmissionHandle};
pub use types::{ExecutorId, StreamSource, SubmissionId, SubmissionStatus};
