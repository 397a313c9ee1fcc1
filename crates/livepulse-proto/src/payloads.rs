//! Typed sub-protocol bodies layered on the envelope `data` field.
//!
//! These are payload conventions, not separate transports: every one of them
//! travels inside an [`Envelope`](crate::Envelope) whose `type` tag names the
//! sub-protocol. The core never decodes them; consumers subscribe to the
//! kind-scoped topic and branch on `action`/`type` themselves.
//!
//! Consumers should build payloads through these structs rather than
//! hand-assembling JSON; [`to_data`] and [`from_data`] bridge to the opaque
//! `data` value.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::ProtocolError;

/// Serialize a typed body into an envelope `data` value.
///
/// # Errors
///
/// - `ProtocolError::Encode` if serialization fails.
pub fn to_data<T: Serialize>(body: &T) -> Result<serde_json::Value, ProtocolError> {
    serde_json::to_value(body).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a typed body from an envelope `data` value.
///
/// # Errors
///
/// - `ProtocolError::Decode` if the value does not match the body shape.
pub fn from_data<T: DeserializeOwned>(data: &serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data.clone()).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Chat message content variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// Plain text.
    Text,
    /// Image attachment reference.
    Image,
    /// File attachment reference.
    File,
}

/// `data` body for `chat` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatBody {
    /// Room the message belongs to.
    #[serde(rename = "roomId")]
    pub room_id: String,
    /// Author.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Message text or attachment reference.
    pub message: String,
    /// Content variant.
    #[serde(rename = "type")]
    pub kind: ChatKind,
    /// Author-side creation time, epoch milliseconds.
    pub timestamp: u64,
}

/// Presence and typing signals carried by `user_action` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserActionKind {
    /// Announce entry into a room.
    JoinRoom,
    /// Announce departure from a room.
    LeaveRoom,
    /// Typing indicator on.
    TypingStart,
    /// Typing indicator off.
    TypingStop,
}

/// `data` body for `user_action` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActionBody {
    /// Which signal this is.
    pub action: UserActionKind,
    /// Room the signal is scoped to.
    #[serde(rename = "roomId")]
    pub room_id: String,
}

/// Poll lifecycle verbs carried by `poll` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollActionKind {
    /// Open a new poll.
    Create,
    /// Cast a vote.
    Vote,
    /// Close voting.
    Close,
}

/// One selectable poll option with its running tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    /// Option identifier, unique within the poll.
    pub id: String,
    /// Display text.
    pub text: String,
    /// Current vote count (authoritative value comes from the server echo).
    #[serde(default)]
    pub votes: u64,
}

/// `data` body for `poll` envelopes.
///
/// Only the fields relevant to the `action` are present: `create` carries the
/// question and options, `vote` carries the option id, `close` only the poll
/// id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollBody {
    /// Which lifecycle verb this is.
    pub action: PollActionKind,
    /// Poll identifier.
    #[serde(rename = "pollId")]
    pub poll_id: String,
    /// Question text (`create` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Options with tallies (`create` and authoritative echoes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<PollOption>>,
    /// Voted option (`vote` only).
    #[serde(rename = "optionId", default, skip_serializing_if = "Option::is_none")]
    pub option_id: Option<String>,
}

/// Q&A lifecycle verbs carried by `qa` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaActionKind {
    /// Submit a question.
    Ask,
    /// Upvote an existing question.
    Upvote,
    /// Answer a question.
    Answer,
}

/// `data` body for `qa` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaBody {
    /// Which lifecycle verb this is.
    pub action: QaActionKind,
    /// Question identifier.
    #[serde(rename = "questionId")]
    pub question_id: String,
    /// Question text (`ask` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Answer text (`answer` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Running upvote tally (authoritative value comes from the server echo).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<u64>,
}

/// `data` body for `event_update` envelopes.
///
/// The `type` field names the domain change (`new_registration`,
/// `cancellation`, ...); the rest of the payload is change-specific and kept
/// opaque here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventUpdateBody {
    /// Domain change name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Change-specific detail.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

/// `data` body for heartbeat `system_alert` envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatBody {
    /// Always `"heartbeat"`.
    #[serde(rename = "type")]
    pub kind: String,
}

impl HeartbeatBody {
    /// Wire value of the heartbeat alert type.
    pub const TAG: &'static str = "heartbeat";

    /// Build a heartbeat body.
    #[must_use]
    pub fn new() -> Self {
        Self { kind: Self::TAG.to_string() }
    }

    /// Whether a `system_alert` data value is a heartbeat.
    #[must_use]
    pub fn matches(data: &serde_json::Value) -> bool {
        data.get("type").and_then(serde_json::Value::as_str) == Some(Self::TAG)
    }
}

impl Default for HeartbeatBody {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_uses_wire_field_names() {
        let body = ChatBody {
            room_id: "r1".to_string(),
            user_id: "u1".to_string(),
            message: "hi".to_string(),
            kind: ChatKind::Text,
            timestamp: 7,
        };

        let data = to_data(&body).unwrap();
        assert_eq!(data["roomId"], "r1");
        assert_eq!(data["type"], "text");

        let back: ChatBody = from_data(&data).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn poll_vote_omits_create_fields() {
        let vote = PollBody {
            action: PollActionKind::Vote,
            poll_id: "p1".to_string(),
            question: None,
            options: None,
            option_id: Some("o2".to_string()),
        };

        let data = to_data(&vote).unwrap();
        assert_eq!(data["action"], "vote");
        assert_eq!(data["optionId"], "o2");
        assert!(data.get("question").is_none());
        assert!(data.get("options").is_none());
    }

    #[test]
    fn heartbeat_matches_its_own_data() {
        let data = to_data(&HeartbeatBody::new()).unwrap();
        assert!(HeartbeatBody::matches(&data));
        assert!(!HeartbeatBody::matches(&serde_json::json!({"type": "shutdown"})));
    }

    #[test]
    fn user_action_round_trip() {
        let body =
            UserActionBody { action: UserActionKind::TypingStart, room_id: "r9".to_string() };
        let data = to_data(&body).unwrap();
        assert_eq!(data["action"], "typing_start");
        let back: UserActionBody = from_data(&data).unwrap();
        assert_eq!(back, body);
    }
}
