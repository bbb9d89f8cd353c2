#![allow(dead_code)]

//! Shared helpers for the integration tests.
//!
//! The tests drive real `sh` child processes speaking a small line
//! protocol: the worker announces `hi` once it is up, answers
//! `process N` with one `tick` line per simulated work unit followed by
//! `ready`, answers `start` with `ok` (init submission), and answers
//! `stop` with `bye` before exiting (orderly termination).

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Once};
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use procpool::{
    Command, LaunchSpec, ProcessManager, ProcessManagerFactory, ProcessShell, StreamSource,
};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - Enable levels with e.g. `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// One simulated work unit in the worker protocol.
pub const TICK: Duration = Duration::from_millis(250);

pub fn ticks(n: u32) -> Duration {
    TICK * n
}

/// `process N` command: completes when the worker prints `ready`.
pub fn process_command(n: u32) -> Command {
    Command::completes_on_line(format!("process {n}"), "ready")
}

/// Knobs for the scripted worker process.
#[derive(Clone, Default)]
pub struct WorkerOptions {
    /// Gate dispatch on the worker's `hi` announcement.
    pub verify_startup: bool,
    /// Stop via the `stop`/`bye` protocol before falling back to kill.
    pub manual_terminate: bool,
    /// Sleep this long before announcing `hi`.
    pub startup_delay: Option<Duration>,
    /// Exit immediately instead of starting up.
    pub fail_startup: bool,
    /// When set, run a `start`/`ok` init submission and count it here.
    pub init_counter: Option<Arc<AtomicUsize>>,
}

impl WorkerOptions {
    pub fn verified() -> Self {
        Self {
            verify_startup: true,
            ..Self::default()
        }
    }
}

fn worker_script(options: &WorkerOptions) -> String {
    let mut script = String::new();
    if let Some(delay) = options.startup_delay {
        script.push_str(&format!("sleep {}\n", delay.as_secs_f64()));
    }
    if options.fail_startup {
        script.push_str("exit 7\n");
    }
    script.push_str(
        r#"echo hi
while read line; do
  case "$line" in
    "process "*)
      n="${line#process }"
      i=0
      while [ "$i" -lt "$n" ]; do
        sleep 0.25
        echo "tick $i"
        i=$((i+1))
      done
      echo ready
      ;;
    start) echo ok ;;
    stop) echo bye; exit 0 ;;
  esac
done
"#,
    );
    script
}

pub struct ScriptedWorker {
    options: WorkerOptions,
}

impl ProcessManager for ScriptedWorker {
    fn launch_spec(&mut self) -> LaunchSpec {
        LaunchSpec::new("sh")
            .arg("-c")
            .arg(worker_script(&self.options))
    }

    fn starts_up_instantly(&self) -> bool {
        !self.options.verify_startup
    }

    fn is_started_up(&mut self, line: &str, source: StreamSource) -> bool {
        source.is_stdout() && line == "hi"
    }

    fn on_startup<'a, 'b>(
        &'a mut self,
        shell: &'a mut ProcessShell<'b>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = procpool::Result<()>> + Send + 'a>>
    where
        'b: 'a,
    {
        let counter = self.options.init_counter.clone();
        Box::pin(async move {
            if let Some(counter) = counter {
                shell
                    .execute(vec![Command::completes_on_line("start", "ok")])
                    .await?;
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            Ok(())
        })
    }

    fn terminate<'a, 'b>(
        &'a mut self,
        shell: &'a mut ProcessShell<'b>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>>
    where
        'b: 'a,
    {
        let manual = self.options.manual_terminate;
        Box::pin(async move {
            if !manual {
                return false;
            }
            shell
                .execute(vec![Command::completes_on_line("stop", "bye")])
                .await
                .is_ok()
        })
    }
}

pub fn worker_factory(options: WorkerOptions) -> impl ProcessManagerFactory {
    move || {
        Box::new(ScriptedWorker {
            options: options.clone(),
        }) as Box<dyn ProcessManager>
    }
}
