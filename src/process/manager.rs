// src/process/manager.rs

//! User-supplied per-process policy.
//!
//! A [`ProcessManager`] tells the pool how to launch one process, how to
//! recognise that it finished starting up, and how to stop it through its
//! own protocol before the pool falls back to killing it. One manager
//! instance is created per executor through a [`ProcessManagerFactory`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::errors::{PoolError, Result};
use crate::process::shell::ProcessShell;
use crate::types::StreamSource;

/// Launch configuration for one child process: program, argv, environment,
/// working directory.
///
/// A bare program name (no path separator) is resolved through `PATH` at
/// spawn time.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Spawn the child with all three stdio streams piped.
    ///
    /// `kill_on_drop` is set so a process can never outlive the executor
    /// task that owns it.
    pub(crate) fn spawn(&self) -> Result<Child> {
        let program = self.resolve_program()?;

        let mut command = Command::new(program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        command.spawn().map_err(|e| {
            PoolError::StartupFailed(format!("failed to spawn '{}': {e}", self.program))
        })
    }

    fn resolve_program(&self) -> Result<PathBuf> {
        if self.program.contains(std::path::MAIN_SEPARATOR) {
            return Ok(PathBuf::from(&self.program));
        }
        which::which(&self.program).map_err(|e| {
            PoolError::StartupFailed(format!("'{}' not found in PATH: {e}", self.program))
        })
    }
}

/// Per-process lifecycle policy, consumed by the pool.
///
/// The pool calls the methods of one manager instance from a single task;
/// implementations can keep mutable state without synchronisation.
pub trait ProcessManager: Send + 'static {
    /// Launch configuration for a new process.
    fn launch_spec(&mut self) -> LaunchSpec;

    /// Whether the process is ready as soon as it has been spawned. When
    /// true, [`is_started_up`](Self::is_started_up) is never consulted.
    fn starts_up_instantly(&self) -> bool {
        true
    }

    /// Whether `line` (tagged with its stream) announces that the process
    /// finished starting up. Only consulted when
    /// [`starts_up_instantly`](Self::starts_up_instantly) is false.
    fn is_started_up(&mut self, _line: &str, _source: StreamSource) -> bool {
        true
    }

    /// Run once after startup, before the process enters the pool. The shell
    /// executes commands synchronously on this process, so the manager can
    /// initialise interpreter state, load a file, etc.
    fn on_startup<'a, 'b>(
        &'a mut self,
        _shell: &'a mut ProcessShell<'b>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>
    where
        'b: 'a,
    {
        Box::pin(async { Ok(()) })
    }

    /// Attempt an orderly stop through the process's own protocol; return
    /// true on success. When this declines (false) or fails, the pool
    /// destroys the process instead.
    fn terminate<'a, 'b>(
        &'a mut self,
        _shell: &'a mut ProcessShell<'b>,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>
    where
        'b: 'a,
    {
        Box::pin(async { false })
    }
}

/// Produces one [`ProcessManager`] per executor.
///
/// Any `Fn() -> Box<dyn ProcessManager> + Send + Sync` closure is a factory.
pub trait ProcessManagerFactory: Send + Sync + 'static {
    fn new_manager(&self) -> Box<dyn ProcessManager>;
}

impl<F> ProcessManagerFactory for F
where
    F: Fn() -> Box<dyn ProcessManager> + Send + Sync + 'static,
{
    fn new_manager(&self) -> Box<dyn ProcessManager> {
        (self)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_spec_incrementally() {
        let spec = LaunchSpec::new("sh")
            .arg("-c")
            .arg("echo hi")
            .env("LANG", "C")
            .working_dir("/tmp");
        assert_eq!(spec.program(), "sh");
        assert_eq!(spec.args, ["-c", "echo hi"]);
        assert_eq!(spec.envs, [("LANG".to_string(), "C".to_string())]);
        assert_eq!(spec.working_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn explicit_paths_skip_path_lookup() {
        let spec = LaunchSpec::new("/bin/sh");
        assert_eq!(spec.resolve_program().unwrap(), PathBuf::from("/bin/sh"));
    }

    #[test]
    fn unknown_program_reports_startup_failure() {
        let spec = LaunchSpec::new("procpool-no-such-program");
        let err = spec.resolve_program().unwrap_err();
        assert!(matches!(err, PoolError::StartupFailed(_)));
    }
}
