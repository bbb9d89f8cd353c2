// src/pool/core.rs

//! Pure pool-sizing and dispatch state machine.
//!
//! This is a synchronous, deterministic core that consumes [`PoolEvent`]s
//! and produces [`PoolCommand`]s for the async dispatcher shell to execute.
//! It owns the executor table and the submission queue, and it has **no**
//! channels, no tokio resources, and no clock — the current instant is an
//! argument — so the sizing policy can be unit tested exhaustively without
//! spawning a single process.
//!
//! Invariants maintained (once initial population finished, until shutdown):
//! - `min_size ≤ live executors ≤ max_size`
//! - while the pool is not saturated, at least
//!   `min(reserve_size, max_size − busy)` executors are kept ready
//! - an executor is retired on keep-alive expiry only if both bounds still
//!   hold afterwards; otherwise its idle deadline is refreshed

use std::collections::BTreeMap;

use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::pool::{PoolCommand, PoolEvent};
use crate::pool::queue::SubmissionQueue;
use crate::submission::{ActiveSubmission, SubmissionOutcome};
use crate::types::{ExecutorId, SubmissionId};

/// Dispatcher-side view of one executor's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutorState {
    /// Spawned, not yet reported ready.
    Starting,
    /// Ready for a submission since the recorded instant.
    Idle { since: Instant },
    /// Executing the recorded submission.
    Busy { submission: SubmissionId },
    /// Told to stop; waiting for its stopped report.
    Stopping,
}

/// Result of feeding one event into the core.
#[derive(Debug, Default)]
pub(crate) struct PoolStep {
    pub(crate) commands: Vec<PoolCommand>,
    /// Set exactly once, when the pool reaches full termination.
    pub(crate) terminated: bool,
}

#[derive(Debug)]
pub(crate) struct PoolCore {
    config: PoolConfig,
    executors: BTreeMap<ExecutorId, ExecutorState>,
    queue: SubmissionQueue,
    next_executor: u64,
    shutdown: bool,
    terminated: bool,
    /// Executors still owed for the initial population barrier.
    startup_pending: usize,
    startup_done: bool,
}

impl PoolCore {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            config,
            executors: BTreeMap::new(),
            queue: SubmissionQueue::new(),
            next_executor: 0,
            shutdown: false,
            terminated: false,
            startup_pending: 0,
            startup_done: false,
        }
    }

    /// Spawn the initial population: `max(min_size, reserve_size)`
    /// executors. The construction barrier resolves once all of them have
    /// started (or the first of them fails).
    pub(crate) fn bootstrap(&mut self) -> Vec<PoolCommand> {
        let mut commands = Vec::new();
        let initial = self.config.initial_size();
        self.startup_pending = initial;
        if initial == 0 {
            self.startup_done = true;
            commands.push(PoolCommand::InitialPopulationReady);
        }
        for _ in 0..initial {
            commands.push(self.spawn());
        }
        commands
    }

    pub(crate) fn step(&mut self, event: PoolEvent, now: Instant) -> PoolStep {
        let mut step = PoolStep::default();
        match event {
            PoolEvent::SubmissionEnqueued(submission) => {
                if self.shutdown {
                    step.commands.push(PoolCommand::FinishSubmission {
                        submission,
                        outcome: SubmissionOutcome::Failed(
                            crate::errors::PoolError::SubmissionRejected,
                        ),
                    });
                } else {
                    self.queue.push_back(submission);
                    self.dispatch(&mut step.commands);
                }
            }
            PoolEvent::CancelSubmission { id, force } => {
                if let Some(submission) = self.queue.remove(id) {
                    step.commands.push(PoolCommand::FinishSubmission {
                        submission,
                        outcome: SubmissionOutcome::Cancelled,
                    });
                    self.dispatch(&mut step.commands);
                } else if force {
                    if let Some(executor) = self.executor_running(id) {
                        step.commands.push(PoolCommand::CancelRunning {
                            executor,
                            submission: id,
                        });
                    }
                }
                // Cooperative cancel of a running submission needs nothing
                // from the pool: the executor observes the handle's flag.
            }
            PoolEvent::ExecutorStarted { id } => {
                if let Some(state @ ExecutorState::Starting) = self.executors.get_mut(&id) {
                    *state = ExecutorState::Idle { since: now };
                    if self.startup_pending > 0 {
                        self.startup_pending -= 1;
                        if self.startup_pending == 0 && !self.startup_done {
                            self.startup_done = true;
                            step.commands.push(PoolCommand::InitialPopulationReady);
                        }
                    }
                    self.dispatch(&mut step.commands);
                }
            }
            PoolEvent::ExecutorStartupFailed { id, error } => {
                self.executors.remove(&id);
                if !self.startup_done {
                    // Construction fails as a whole; tear everything down
                    // and never rebalance.
                    self.startup_done = true;
                    self.startup_pending = 0;
                    self.shutdown = true;
                    step.commands
                        .push(PoolCommand::InitialPopulationFailed { error });
                    self.abort_all(&mut step.commands);
                } else {
                    self.dispatch(&mut step.commands);
                }
                self.check_terminated(&mut step);
            }
            PoolEvent::ExecutorIdle { id } => {
                if let Some(state) = self.executors.get_mut(&id) {
                    if matches!(state, ExecutorState::Busy { .. }) {
                        *state = ExecutorState::Idle { since: now };
                    }
                }
                self.dispatch(&mut step.commands);
            }
            PoolEvent::ExecutorStopped { id } => {
                self.executors.remove(&id);
                if !self.terminated {
                    self.dispatch(&mut step.commands);
                }
                self.check_terminated(&mut step);
            }
            PoolEvent::KeepAliveTick => {
                self.retire_expired(now, &mut step.commands);
            }
            PoolEvent::ShutdownRequested => {
                self.shutdown = true;
                self.dispatch(&mut step.commands);
                self.check_terminated(&mut step);
            }
            // Intercepted by the dispatcher shell (it needs the reply
            // channel); never reaches the core.
            PoolEvent::ForceShutdownRequested { .. } => {}
        }
        step
    }

    /// Forced shutdown: hand back everything still queued and kill every
    /// process.
    pub(crate) fn force_shutdown(&mut self) -> (Vec<ActiveSubmission>, PoolStep) {
        let mut step = PoolStep::default();
        self.shutdown = true;
        let drained = self.queue.drain();
        self.abort_all(&mut step.commands);
        self.check_terminated(&mut step);
        (drained, step)
    }

    /// Earliest instant at which an idle executor's keep-alive expires.
    pub(crate) fn next_keep_alive_deadline(&self) -> Option<Instant> {
        let keep_alive = self.config.keep_alive?;
        if self.shutdown {
            return None;
        }
        self.executors
            .values()
            .filter_map(|state| match state {
                ExecutorState::Idle { since } => Some(*since + keep_alive),
                _ => None,
            })
            .min()
    }

    pub(crate) fn num_processes(&self) -> usize {
        self.executors.len()
    }

    pub(crate) fn num_queued(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn num_executing(&self) -> usize {
        self.busy_count()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Put an undeliverable assignment back at the head of the queue. The
    /// target executor's stopped report will trigger the re-dispatch.
    pub(crate) fn requeue_front(&mut self, submission: ActiveSubmission) {
        self.queue.push_front(submission);
    }

    /// The dispatch step: pair, grow, replenish — in that order.
    fn dispatch(&mut self, commands: &mut Vec<PoolCommand>) {
        // Orderly-shutdown quiescence: once nothing is queued or running,
        // retire every remaining executor.
        if self.shutdown && self.queue.is_empty() && self.busy_count() == 0 {
            for (id, state) in self.executors.iter_mut() {
                if matches!(state, ExecutorState::Idle { .. }) {
                    *state = ExecutorState::Stopping;
                    commands.push(PoolCommand::StopExecutor { id: *id });
                }
            }
            return;
        }

        // Pair queued submissions with idle executors, FIFO.
        while !self.queue.is_empty() {
            let Some(id) = self.first_idle() else { break };
            let submission = self.queue.pop_front().expect("queue checked non-empty");
            self.executors.insert(
                id,
                ExecutorState::Busy {
                    submission: submission.id(),
                },
            );
            commands.push(PoolCommand::Assign {
                executor: id,
                submission,
            });
        }

        // Grow towards the queued demand; every starting executor already
        // accounts for one queued submission.
        while self.queue.len() > self.starting_count()
            && self.active_count() < self.config.max_size
        {
            commands.push(self.spawn());
        }

        if !self.shutdown {
            // Hold the floor.
            while self.active_count() < self.config.min_size {
                commands.push(self.spawn());
            }
            // Keep the reserve warm while the pool is not saturated.
            while self.ready_count() < self.config.reserve_size
                && self.active_count() < self.config.max_size
            {
                commands.push(self.spawn());
            }
        }
    }

    fn retire_expired(&mut self, now: Instant, commands: &mut Vec<PoolCommand>) {
        let Some(keep_alive) = self.config.keep_alive else {
            return;
        };
        if self.shutdown {
            return;
        }
        let expired: Vec<ExecutorId> = self
            .executors
            .iter()
            .filter_map(|(id, state)| match state {
                ExecutorState::Idle { since } if *since + keep_alive <= now => Some(*id),
                _ => None,
            })
            .collect();

        for id in expired {
            let retirable = self.active_count() > self.config.min_size
                && self.idle_count() > self.config.reserve_size;
            let state = self.executors.get_mut(&id).expect("expired executor present");
            if retirable {
                *state = ExecutorState::Stopping;
                commands.push(PoolCommand::StopExecutor { id });
            } else {
                // Not retirable without violating the floor/reserve; start a
                // fresh keep-alive period instead.
                *state = ExecutorState::Idle { since: now };
            }
        }
    }

    /// Kill everything that is not already on its way out.
    fn abort_all(&mut self, commands: &mut Vec<PoolCommand>) {
        for (id, state) in self.executors.iter_mut() {
            if !matches!(state, ExecutorState::Stopping) {
                *state = ExecutorState::Stopping;
                commands.push(PoolCommand::KillExecutor { id: *id });
            }
        }
    }

    fn check_terminated(&mut self, step: &mut PoolStep) {
        if self.shutdown && !self.terminated && self.executors.is_empty() && self.queue.is_empty()
        {
            self.terminated = true;
            step.terminated = true;
        }
    }

    fn spawn(&mut self) -> PoolCommand {
        let id = ExecutorId(self.next_executor);
        self.next_executor += 1;
        self.executors.insert(id, ExecutorState::Starting);
        PoolCommand::SpawnExecutor { id }
    }

    fn first_idle(&self) -> Option<ExecutorId> {
        self.executors.iter().find_map(|(id, state)| {
            matches!(state, ExecutorState::Idle { .. }).then_some(*id)
        })
    }

    fn executor_running(&self, submission: SubmissionId) -> Option<ExecutorId> {
        self.executors.iter().find_map(|(id, state)| match state {
            ExecutorState::Busy { submission: s } if *s == submission => Some(*id),
            _ => None,
        })
    }

    fn active_count(&self) -> usize {
        self.executors
            .values()
            .filter(|s| !matches!(s, ExecutorState::Stopping))
            .count()
    }

    fn busy_count(&self) -> usize {
        self.executors
            .values()
            .filter(|s| matches!(s, ExecutorState::Busy { .. }))
            .count()
    }

    fn idle_count(&self) -> usize {
        self.executors
            .values()
            .filter(|s| matches!(s, ExecutorState::Idle { .. }))
            .count()
    }

    fn starting_count(&self) -> usize {
        self.executors
            .values()
            .filter(|s| matches!(s, ExecutorState::Starting))
            .count()
    }

    /// Idle or about to be: the pool's warm capacity.
    fn ready_count(&self) -> usize {
        self.executors
            .values()
            .filter(|s| matches!(s, ExecutorState::Idle { .. } | ExecutorState::Starting))
            .count()
    }
}
