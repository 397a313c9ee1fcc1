//! The uniform message container exchanged over the bus.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProtocolError;

/// Message category tag.
///
/// Determines how the envelope's `data` payload is interpreted. The core
/// routes on this tag only; sub-protocol semantics (poll actions, Q&A
/// actions, ...) live inside `data` and are decoded by consumers.
///
/// Tags arriving from a newer server that this build does not recognize are
/// preserved as [`EventKind::Unknown`] so they can still be routed to the
/// catch-all subscription and re-serialized unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Room-scoped chat message.
    Chat,
    /// Domain change on an event listing (registration, cancellation, ...).
    EventUpdate,
    /// Out-of-band user notification.
    Notification,
    /// Presence and typing signals (`join_room`, `typing_start`, ...).
    UserAction,
    /// Operational alerts, including heartbeats.
    SystemAlert,
    /// Live poll lifecycle (`create`, `vote`, `close`).
    Poll,
    /// Q&A lifecycle (`ask`, `upvote`, `answer`).
    Qa,
    /// Forward-compatible fallback for tags this build does not know.
    Unknown(String),
}

impl EventKind {
    /// Wire tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::EventUpdate => "event_update",
            Self::Notification => "notification",
            Self::UserAction => "user_action",
            Self::SystemAlert => "system_alert",
            Self::Poll => "poll",
            Self::Qa => "qa",
            Self::Unknown(tag) => tag,
        }
    }

    /// Parse a wire tag. Never fails: unrecognized tags become `Unknown`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "chat" => Self::Chat,
            "event_update" => Self::EventUpdate,
            "notification" => Self::Notification,
            "user_action" => Self::UserAction,
            "system_alert" => Self::SystemAlert,
            "poll" => Self::Poll,
            "qa" => Self::Qa,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atomic unit of communication.
///
/// Wire layout (JSON):
///
/// ```json
/// { "id": "...", "type": "chat", "data": {...}, "timestamp": 1700000000000,
///   "userId": "...", "eventId": "...", "roomId": "..." }
/// ```
///
/// # Invariants
///
/// - `id` is unique per envelope.
/// - An envelope is immutable once created; builders consume `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique envelope identifier.
    pub id: String,

    /// Message category; decides how `data` is interpreted.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Opaque payload; shape depends on `kind`.
    pub data: serde_json::Value,

    /// Creation time, epoch milliseconds.
    pub timestamp: u64,

    /// Originating user, if any.
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Event listing this envelope concerns, if any.
    #[serde(rename = "eventId", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    /// Room scope, if any.
    #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl Envelope {
    /// Create an envelope with the required fields.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: EventKind,
        data: serde_json::Value,
        timestamp: u64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            data,
            timestamp,
            user_id: None,
            event_id: None,
            room_id: None,
        }
    }

    /// Stamp the originating user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Scope to an event listing.
    #[must_use]
    pub fn with_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Scope to a room.
    #[must_use]
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    /// Check the envelope contract.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Invalid` for an empty `id`, an empty `type` tag, or
    ///   a zero `timestamp`.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.id.is_empty() {
            return Err(ProtocolError::Invalid { reason: "empty envelope id".to_string() });
        }
        if self.kind.as_str().is_empty() {
            return Err(ProtocolError::Invalid { reason: "empty type tag".to_string() });
        }
        if self.timestamp == 0 {
            return Err(ProtocolError::Invalid { reason: "zero timestamp".to_string() });
        }
        Ok(())
    }

    /// Serialize to the JSON wire form.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if serialization fails (non-string map keys
    ///   in `data`, which well-formed payloads never contain).
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse and validate an envelope from its JSON wire form.
    ///
    /// Validation happens here, before anything downstream sees the
    /// envelope; a parseable but contract-violating message is rejected.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Decode` if the JSON is malformed or missing fields.
    /// - `ProtocolError::Invalid` if the envelope violates the contract.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let envelope: Self =
            serde_json::from_str(raw).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }
}
