//! Single-flight evaluation queue.
//!
//! Commands are evaluated strictly in submission order and at most one is
//! outstanding at a time: the engine's output carries no correlation ids, so
//! the only way to attribute a response to a command is to never have two
//! in flight. The in-flight command stays at the front of the queue until it
//! is acknowledged or abandoned.

use std::collections::VecDeque;

use tracing::debug;

use crate::session::SessionState;

/// A command waiting for, or undergoing, evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Command text as submitted.
    pub text: String,
    /// Whether the command belongs in the user-visible history.
    pub record_in_history: bool,
    /// Position in submission order; strictly increasing.
    pub sequence: u64,
}

/// FIFO queue with single-flight admission control.
#[derive(Debug, Default)]
pub struct EvaluationQueue {
    entries: VecDeque<PendingCommand>,
    next_sequence: u64,
    in_flight: bool,
}

impl EvaluationQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command and return its sequence number.
    pub fn enqueue(&mut self, text: impl Into<String>, record_in_history: bool) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push_back(PendingCommand {
            text: text.into(),
            record_in_history,
            sequence,
        });
        debug!(sequence, depth = self.entries.len(), "queue: command enqueued");
        sequence
    }

    /// Hand out the front command if the engine may receive it now.
    ///
    /// Returns `None` while another command is in flight, when the session
    /// is not `Ready`, or when the queue is empty. A returned command is
    /// marked in flight and must not be handed out again.
    pub fn try_dispatch(&mut self, state: SessionState) -> Option<PendingCommand> {
        if self.in_flight || state != SessionState::Ready {
            return None;
        }
        let front = self.entries.front()?.clone();
        self.in_flight = true;
        debug!(sequence = front.sequence, "queue: command dispatched");
        Some(front)
    }

    /// The in-flight command's response is complete; pop it.
    pub fn acknowledge_complete(&mut self) -> Option<PendingCommand> {
        self.pop_in_flight("acknowledged")
    }

    /// The in-flight command was interrupted; pop it without completing.
    pub fn abandon(&mut self) -> Option<PendingCommand> {
        self.pop_in_flight("abandoned")
    }

    /// Drop every entry, in flight or not. Used when the engine restarts.
    pub fn clear(&mut self) -> Vec<PendingCommand> {
        self.in_flight = false;
        let dropped: Vec<_> = self.entries.drain(..).collect();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "queue: cleared");
        }
        dropped
    }

    /// The command currently being evaluated.
    #[must_use]
    pub fn in_flight(&self) -> Option<&PendingCommand> {
        if self.in_flight {
            self.entries.front()
        } else {
            None
        }
    }

    /// Number of in-flight commands: always 0 or 1.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        usize::from(self.in_flight)
    }

    /// Entries not yet acknowledged, including the in-flight one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sequence number the next enqueued command will receive.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn pop_in_flight(&mut self, outcome: &str) -> Option<PendingCommand> {
        if !self.in_flight {
            return None;
        }
        self.in_flight = false;
        let command = self.entries.pop_front();
        if let Some(ref cmd) = command {
            debug!(sequence = cmd.sequence, outcome, "queue: in-flight command retired");
        }
        command
    }
}
