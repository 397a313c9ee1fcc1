//! Room descriptor types.
//!
//! A room is a named topic a session joins to scope message delivery. The
//! descriptor mirrors what the server reports; the local registry caches it
//! but is never the authoritative room directory.

use serde::{Deserialize, Serialize};

/// Room category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Tied to a specific event listing.
    Event,
    /// Open discussion.
    General,
    /// Support channel.
    Support,
    /// Invite-only.
    Private,
}

/// Per-room behavior switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSettings {
    /// Whether file attachments are allowed.
    #[serde(rename = "allowFileSharing")]
    pub allow_file_sharing: bool,
    /// Whether image attachments are allowed.
    #[serde(rename = "allowImages")]
    pub allow_images: bool,
    /// Whether outgoing chat passes through moderation.
    #[serde(rename = "moderationEnabled")]
    pub moderation_enabled: bool,
    /// Minimum seconds between messages per user, if enforced.
    #[serde(rename = "slowMode", default, skip_serializing_if = "Option::is_none")]
    pub slow_mode: Option<u32>,
    /// Participant cap, if enforced.
    #[serde(rename = "maxParticipants", default, skip_serializing_if = "Option::is_none")]
    pub max_participants: Option<u32>,
}

/// Server-reported room descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Room identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Room category.
    #[serde(rename = "type")]
    pub kind: RoomKind,
    /// Event listing this room belongs to, for `event` rooms.
    #[serde(rename = "eventId", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Current participants (unique user ids).
    pub participants: Vec<String>,
    /// Moderators (unique user ids).
    pub moderators: Vec<String>,
    /// Behavior switches.
    pub settings: RoomSettings,
    /// Creation time, epoch milliseconds.
    #[serde(rename = "createdAt")]
    pub created_at: u64,
    /// Last message or membership change, epoch milliseconds.
    #[serde(rename = "lastActivity")]
    pub last_activity: u64,
}
