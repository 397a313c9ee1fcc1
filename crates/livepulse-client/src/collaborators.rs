//! Contracts toward the embedding application.
//!
//! The driver does not decide moderation outcomes, persist history, or render
//! alerts. It calls these seams at the right moments and ships with inert
//! defaults so a bare [`crate::ConnectionManager`] works out of the box.

use livepulse_proto::Envelope;

/// Verdict from a [`ModerationService`] review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationVerdict {
    /// Whether the content may be sent.
    pub approved: bool,
    /// Labels the reviewer attached, empty when clean.
    pub flags: Vec<String>,
}

impl ModerationVerdict {
    /// A clean approval.
    #[must_use]
    pub fn approved() -> Self {
        Self { approved: true, flags: Vec::new() }
    }
}

/// Reviews outbound chat content before it is sent or queued.
pub trait ModerationService: Send + Sync {
    /// Review one message body.
    fn review(&self, text: &str) -> ModerationVerdict;
}

/// Persists chat history and seeds a room's backlog on join.
pub trait HistoryStore: Send + Sync {
    /// Record a delivered chat envelope.
    fn record(&self, envelope: &Envelope);

    /// Backlog for a room, oldest first. Seeds the in-memory cache on join.
    fn recent(&self, room_id: &str) -> Vec<Envelope>;
}

/// Receives out-of-band alerts for `notification` envelopes.
pub trait NotificationSink: Send + Sync {
    /// Surface one notification to the user.
    fn notify(&self, envelope: &Envelope);
}

/// Moderation that approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl ModerationService for ApproveAll {
    fn review(&self, _text: &str) -> ModerationVerdict {
        ModerationVerdict::approved()
    }
}

/// History store with no persistence and no backlog.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl HistoryStore for NoHistory {
    fn record(&self, _envelope: &Envelope) {}

    fn recent(&self, _room_id: &str) -> Vec<Envelope> {
        Vec::new()
    }
}

/// Notification sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn notify(&self, _envelope: &Envelope) {}
}
