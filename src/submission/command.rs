// src/submission/command.rs

//! A single instruction sent to a process, plus the predicates that decide
//! when the process has finished answering it.
//!
//! A [`Command`] does not interpret output; it buffers every line the
//! process prints while the command is active and asks the user-supplied
//! predicates whether a line ends the command (or aborts it). Predicates
//! receive the accumulated [`CommandOutput`] so they can inspect — and, if
//! the command is reused, reset — everything seen so far.

use std::fmt;
use std::time::Duration;

use regex::Regex;

use crate::types::StreamSource;

/// Per-line decision made by a [`Command`] while it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineOutcome {
    /// The command is still running; keep feeding lines.
    Pending,
    /// This line completed the command.
    Complete,
    /// This line signalled error termination; the submission aborts.
    Error,
}

/// Lines captured from the process while a command was active, split by
/// stream.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    stdout: Vec<String>,
    stderr: Vec<String>,
}

impl CommandOutput {
    pub fn stdout_lines(&self) -> &[String] {
        &self.stdout
    }

    pub fn stderr_lines(&self) -> &[String] {
        &self.stderr
    }

    /// All stdout lines joined with `\n`.
    pub fn joined_stdout(&self) -> String {
        self.stdout.join("\n")
    }

    /// All stderr lines joined with `\n`.
    pub fn joined_stderr(&self) -> String {
        self.stderr.join("\n")
    }

    /// Clear both buffers. The executor never calls this; whoever reuses a
    /// command decides when its history stops being interesting.
    pub fn reset(&mut self) {
        self.stdout.clear();
        self.stderr.clear();
    }

    fn push(&mut self, line: &str, source: StreamSource) {
        match source {
            StreamSource::Stdout => self.stdout.push(line.to_string()),
            StreamSource::Stderr => self.stderr.push(line.to_string()),
        }
    }
}

type LinePredicate = Box<dyn FnMut(&mut CommandOutput, &str, StreamSource) -> bool + Send>;

/// One instruction written to a process's stdin, with completion and
/// (optional) error-termination predicates.
///
/// Every line the process prints while this command is active is buffered
/// first and then shown to the predicates exactly once, in arrival order.
/// The error predicate is consulted before the completion predicate; the
/// first `true` from either ends the command.
pub struct Command {
    instruction: String,
    output: CommandOutput,
    complete: LinePredicate,
    error: Option<LinePredicate>,
    deadline: Option<Duration>,
}

impl Command {
    /// Create a command that is complete when `complete` returns true for a
    /// received line.
    pub fn new(
        instruction: impl Into<String>,
        complete: impl FnMut(&mut CommandOutput, &str, StreamSource) -> bool + Send + 'static,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            output: CommandOutput::default(),
            complete: Box::new(complete),
            error: None,
            deadline: None,
        }
    }

    /// Complete when a stdout line matches `pattern`.
    pub fn completes_on(instruction: impl Into<String>, pattern: Regex) -> Self {
        Self::new(instruction, move |_, line, source| {
            source.is_stdout() && pattern.is_match(line)
        })
    }

    /// Complete when a stdout line equals `line` exactly.
    pub fn completes_on_line(instruction: impl Into<String>, line: impl Into<String>) -> Self {
        let expected = line.into();
        Self::new(instruction, move |_, line, source| {
            source.is_stdout() && line == expected
        })
    }

    /// Abort the submission when `error` returns true for a received line.
    pub fn with_error_predicate(
        mut self,
        error: impl FnMut(&mut CommandOutput, &str, StreamSource) -> bool + Send + 'static,
    ) -> Self {
        self.error = Some(Box::new(error));
        self
    }

    /// Abort the submission when any line (either stream) matches `pattern`.
    pub fn errors_on(self, pattern: Regex) -> Self {
        self.with_error_predicate(move |_, line, _| pattern.is_match(line))
    }

    /// Fail the command if it has not completed within `deadline` after its
    /// instruction was written. Off by default.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn output(&self) -> &CommandOutput {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut CommandOutput {
        &mut self.output
    }

    /// Shorthand for resetting the captured output buffers.
    pub fn reset(&mut self) {
        self.output.reset();
    }

    pub(crate) fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Feed one received line: buffer it, then consult the predicates.
    pub(crate) fn receive_line(&mut self, line: &str, source: StreamSource) -> LineOutcome {
        self.output.push(line, source);
        if let Some(error) = &mut self.error {
            if error(&mut self.output, line, source) {
                return LineOutcome::Error;
            }
        }
        if (self.complete)(&mut self.output, line, source) {
            LineOutcome::Complete
        } else {
            LineOutcome::Pending
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("instruction", &self.instruction)
            .field("stdout_lines", &self.output.stdout.len())
            .field("stderr_lines", &self.output.stderr.len())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_lines_in_arrival_order_per_stream() {
        let mut cmd = Command::completes_on_line("run", "done");

        assert_eq!(cmd.receive_line("a", StreamSource::Stdout), LineOutcome::Pending);
        assert_eq!(cmd.receive_line("warn", StreamSource::Stderr), LineOutcome::Pending);
        assert_eq!(cmd.receive_line("b", StreamSource::Stdout), LineOutcome::Pending);
        assert_eq!(cmd.receive_line("done", StreamSource::Stdout), LineOutcome::Complete);

        assert_eq!(cmd.output().stdout_lines(), ["a", "b", "done"]);
        assert_eq!(cmd.output().stderr_lines(), ["warn"]);
        assert_eq!(cmd.output().joined_stdout(), "a\nb\ndone");
    }

    #[test]
    fn line_is_buffered_before_predicates_run() {
        // The completion predicate sees the line it is judging already
        // appended to the buffers.
        let mut cmd = Command::new("run", |output, line, _| {
            output.stdout_lines().last().map(String::as_str) == Some(line)
        });
        assert_eq!(cmd.receive_line("x", StreamSource::Stdout), LineOutcome::Complete);
    }

    #[test]
    fn error_predicate_takes_precedence() {
        let mut cmd = Command::completes_on_line("run", "boom")
            .with_error_predicate(|_, line, _| line == "boom");
        assert_eq!(cmd.receive_line("boom", StreamSource::Stdout), LineOutcome::Error);
    }

    #[test]
    fn blank_lines_are_preserved() {
        let mut cmd = Command::completes_on_line("run", "done");
        cmd.receive_line("", StreamSource::Stdout);
        cmd.receive_line("done", StreamSource::Stdout);
        assert_eq!(cmd.output().stdout_lines(), ["", "done"]);
    }

    #[test]
    fn predicate_may_reset_buffers() {
        let mut cmd = Command::new("run", |output, line, _| {
            if line == "flush" {
                output.reset();
            }
            line == "done"
        });
        cmd.receive_line("a", StreamSource::Stdout);
        cmd.receive_line("flush", StreamSource::Stdout);
        assert!(cmd.output().stdout_lines().is_empty());
        cmd.receive_line("done", StreamSource::Stdout);
        assert_eq!(cmd.output().stdout_lines(), ["done"]);
    }

    #[test]
    fn regex_completion_ignores_stderr() {
        let mut cmd = Command::completes_on("run", Regex::new("^ready$").unwrap());
        assert_eq!(cmd.receive_line("ready", StreamSource::Stderr), LineOutcome::Pending);
        assert_eq!(cmd.receive_line("ready", StreamSource::Stdout), LineOutcome::Complete);
    }
}
