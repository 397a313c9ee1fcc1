//! Property-based coverage for the offline queue.
//!
//! The example-sized unit tests pin the three-envelope cases; these hold the
//! FIFO and no-silent-loss invariants under arbitrary volumes and arbitrary
//! transport accept/refuse patterns.

use livepulse_core::MessageQueue;
use livepulse_proto::{Envelope, EventKind};
use proptest::prelude::*;

fn envelope(n: usize) -> Envelope {
    Envelope::new(
        format!("m{n}"),
        EventKind::Chat,
        serde_json::json!({ "message": format!("m{n}") }),
        n as u64 + 1,
    )
}

proptest! {
    /// Across any number of flush cycles with any accept/refuse pattern,
    /// everything the transport accepted plus everything still queued is
    /// exactly the enqueue order. Nothing lost, duplicated, or reordered.
    #[test]
    fn arbitrary_stall_patterns_preserve_fifo(
        count in 0usize..32,
        pattern in proptest::collection::vec(any::<bool>(), 0..64),
    ) {
        let mut queue = MessageQueue::new();
        for n in 0..count {
            queue.enqueue(envelope(n), n as u64 + 1);
        }

        let mut accepted = Vec::new();
        let mut outcomes = pattern.into_iter();
        for _ in 0..4 {
            queue.flush(|e| {
                if outcomes.next().unwrap_or(false) {
                    accepted.push(e.id.clone());
                    true
                } else {
                    false
                }
            });
        }

        // A final healthy cycle drains whatever is left.
        queue.flush(|e| {
            accepted.push(e.id.clone());
            true
        });

        let expected: Vec<String> = (0..count).map(|n| format!("m{n}")).collect();
        prop_assert_eq!(accepted, expected);
        prop_assert!(queue.is_empty());
    }

    /// A refusal mid-cycle stops the flush there: the report counts the
    /// accepted prefix and the refused envelope stays at the head.
    #[test]
    fn flush_report_matches_observed_sends(
        count in 1usize..16,
        refuse_at in 0usize..20,
    ) {
        let mut queue = MessageQueue::new();
        for n in 0..count {
            queue.enqueue(envelope(n), 1);
        }

        let mut calls = 0;
        let report = queue.flush(|_| {
            let ok = calls != refuse_at;
            calls += 1;
            ok
        });

        if refuse_at < count {
            prop_assert!(report.stalled);
            prop_assert_eq!(report.sent, refuse_at);
            prop_assert_eq!(queue.len(), count - refuse_at);
            prop_assert_eq!(queue.front().map(|q| q.envelope.id.clone()),
                Some(format!("m{refuse_at}")));
        } else {
            prop_assert!(!report.stalled);
            prop_assert_eq!(report.sent, count);
            prop_assert!(queue.is_empty());
        }
    }
}
