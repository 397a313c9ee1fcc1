//! Property-based tests for the envelope wire contract.
//!
//! Verifies the contract holds for arbitrary inputs, not just examples: any
//! valid envelope survives the wire unchanged, and unknown `type` tags from a
//! newer server are tolerated rather than rejected.

use livepulse_proto::{Envelope, EventKind};
use proptest::prelude::*;

/// Strategy covering every known kind plus arbitrary unknown tags.
fn arbitrary_kind() -> impl Strategy<Value = EventKind> {
    prop_oneof![
        Just(EventKind::Chat),
        Just(EventKind::EventUpdate),
        Just(EventKind::Notification),
        Just(EventKind::UserAction),
        Just(EventKind::SystemAlert),
        Just(EventKind::Poll),
        Just(EventKind::Qa),
        "[a-z_]{1,24}".prop_map(|tag| EventKind::from_tag(&tag)),
    ]
}

fn arbitrary_envelope() -> impl Strategy<Value = Envelope> {
    (
        "[a-zA-Z0-9-]{1,36}",
        arbitrary_kind(),
        1u64..u64::MAX,
        proptest::option::of("[a-z0-9]{1,16}"),
        proptest::option::of("[a-z0-9]{1,16}"),
        proptest::option::of("[a-z0-9]{1,16}"),
    )
        .prop_map(|(id, kind, timestamp, user_id, event_id, room_id)| {
            let data = serde_json::json!({"n": timestamp % 7, "s": id.clone()});
            let mut envelope = Envelope::new(id, kind, data, timestamp);
            if let Some(u) = user_id {
                envelope = envelope.with_user(u);
            }
            if let Some(e) = event_id {
                envelope = envelope.with_event(e);
            }
            if let Some(r) = room_id {
                envelope = envelope.with_room(r);
            }
            envelope
        })
}

proptest! {
    /// Any contract-conforming envelope survives encode/decode unchanged,
    /// including unknown type tags.
    #[test]
    fn wire_trip_preserves_envelope(envelope in arbitrary_envelope()) {
        let raw = envelope.encode().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let back = Envelope::decode(&raw).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(back, envelope);
    }

    /// An unknown tag re-serializes byte-identically, so forwarding a newer
    /// server's envelope does not corrupt it.
    #[test]
    fn unknown_tags_round_trip_verbatim(tag in "[a-z_]{1,24}") {
        let kind = EventKind::from_tag(&tag);
        prop_assert_eq!(kind.as_str(), tag.as_str());
    }

    /// Zero timestamps never pass validation regardless of other fields.
    #[test]
    fn zero_timestamp_is_rejected(id in "[a-z0-9]{1,16}") {
        let envelope = Envelope::new(id, EventKind::Chat, serde_json::json!({}), 0);
        prop_assert!(envelope.validate().is_err());
    }
}
