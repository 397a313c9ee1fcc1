//! Ordered holding area for outbound envelopes produced while offline.
//!
//! # Invariants
//!
//! - Order is FIFO and preserved across a reconnect cycle.
//! - No envelope is ever dropped silently: a failed send during a flush is
//!   reinserted at the head and the flush stops, so later envelopes are
//!   never sent out of turn.

use std::collections::VecDeque;

use livepulse_proto::Envelope;

/// An envelope plus the time it was parked.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEnvelope {
    /// The parked envelope.
    pub envelope: Envelope,
    /// When it was enqueued, epoch milliseconds.
    pub enqueued_at: u64,
}

/// What a flush cycle accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Envelopes handed to the sender successfully.
    pub sent: usize,
    /// Whether the cycle stopped early on a send failure.
    pub stalled: bool,
}

/// FIFO queue of offline traffic.
#[derive(Debug, Default)]
pub struct MessageQueue {
    entries: VecDeque<QueuedEnvelope>,
}

impl MessageQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail.
    pub fn enqueue(&mut self, envelope: Envelope, now_millis: u64) {
        self.entries.push_back(QueuedEnvelope { envelope, enqueued_at: now_millis });
    }

    /// Drain head-to-tail, invoking `sender` for each envelope.
    ///
    /// A `false` from `sender` reinserts that envelope at the head and ends
    /// the cycle; the remaining entries stay queued in order for the next
    /// flush.
    pub fn flush(&mut self, mut sender: impl FnMut(&Envelope) -> bool) -> FlushReport {
        let mut sent = 0;
        while let Some(entry) = self.entries.pop_front() {
            if sender(&entry.envelope) {
                sent += 1;
            } else {
                self.entries.push_front(entry);
                return FlushReport { sent, stalled: true };
            }
        }
        FlushReport { sent, stalled: false }
    }

    /// Oldest parked entry, if any.
    #[must_use]
    pub fn front(&self) -> Option<&QueuedEnvelope> {
        self.entries.front()
    }

    /// Number of parked envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything. Used by session teardown only; a flush never
    /// discards.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
