// src/pool/queue.rs

//! FIFO queue of submissions waiting for an idle executor.
//!
//! Fairness is plain FIFO across submissions; there are no priorities.
//! Waiting/notification is the dispatcher loop's concern — the queue itself
//! is pure data, owned by the core state machine.

use std::collections::VecDeque;

use crate::submission::ActiveSubmission;
use crate::types::SubmissionId;

#[derive(Debug, Default)]
pub(crate) struct SubmissionQueue {
    entries: VecDeque<ActiveSubmission>,
}

impl SubmissionQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push_back(&mut self, submission: ActiveSubmission) {
        self.entries.push_back(submission);
    }

    /// Put a submission back at the head, ahead of everything queued after
    /// it. Used when a dispatch could not be delivered.
    pub(crate) fn push_front(&mut self, submission: ActiveSubmission) {
        self.entries.push_front(submission);
    }

    pub(crate) fn pop_front(&mut self) -> Option<ActiveSubmission> {
        self.entries.pop_front()
    }

    /// Remove a queued submission by id (queued-cancel path).
    pub(crate) fn remove(&mut self, id: SubmissionId) -> Option<ActiveSubmission> {
        let index = self.entries.iter().position(|s| s.id() == id)?;
        self.entries.remove(index)
    }

    /// Extract everything still pending (forced shutdown).
    pub(crate) fn drain(&mut self) -> Vec<ActiveSubmission> {
        self.entries.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolEvent;
    use crate::submission::handle::create_pair;
    use crate::submission::{Command, Submission};
    use tokio::sync::mpsc;

    fn submission(id: u64) -> ActiveSubmission {
        let (tx, _rx) = mpsc::unbounded_channel::<PoolEvent>();
        let commands = vec![Command::completes_on_line("run", "done")];
        let (active, _handle) = create_pair(SubmissionId(id), Submission::new(commands), tx);
        active
    }

    #[test]
    fn pops_in_fifo_order() {
        let mut queue = SubmissionQueue::new();
        queue.push_back(submission(1));
        queue.push_back(submission(2));
        queue.push_back(submission(3));

        assert_eq!(queue.pop_front().unwrap().id(), SubmissionId(1));
        assert_eq!(queue.pop_front().unwrap().id(), SubmissionId(2));
        assert_eq!(queue.pop_front().unwrap().id(), SubmissionId(3));
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn removes_by_id_preserving_order() {
        let mut queue = SubmissionQueue::new();
        queue.push_back(submission(1));
        queue.push_back(submission(2));
        queue.push_back(submission(3));

        assert_eq!(queue.remove(SubmissionId(2)).unwrap().id(), SubmissionId(2));
        assert!(queue.remove(SubmissionId(2)).is_none());
        assert_eq!(queue.pop_front().unwrap().id(), SubmissionId(1));
        assert_eq!(queue.pop_front().unwrap().id(), SubmissionId(3));
    }

    #[test]
    fn requeued_submission_goes_first() {
        let mut queue = SubmissionQueue::new();
        queue.push_back(submission(1));
        queue.push_back(submission(2));

        let head = queue.pop_front().unwrap();
        queue.push_front(head);
        assert_eq!(queue.pop_front().unwrap().id(), SubmissionId(1));
    }

    #[test]
    fn drain_empties_the_queue() {
        let mut queue = SubmissionQueue::new();
        queue.push_back(submission(1));
        queue.push_back(submission(2));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }
}
