//! In-process publish/subscribe dispatcher.
//!
//! Fans one event out to every consumer subscribed to its topic, in
//! registration order, synchronously. A faulting handler is isolated: the
//! fault is logged and the remaining handlers for that emission still run.
//! The bus is owned by a single writer (the session driver) so emissions
//! never race.

use std::{collections::HashMap, time::Duration};

use livepulse_proto::{Envelope, EventKind};

/// Subscription topics.
///
/// Lifecycle topics mirror the session state machine; envelope topics carry
/// inbound traffic. Every inbound envelope fires both the catch-all
/// [`Topic::Message`] and the kind-scoped [`Topic::MessageKind`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Session entered Connected.
    Connected,
    /// Session left Connected (drop, heartbeat timeout, or teardown).
    Disconnected,
    /// A reconnection attempt was scheduled.
    Reconnecting,
    /// The attempt cap was hit; the session is terminally failed.
    ReconnectionFailed,
    /// A room was joined (or re-announced on rejoin).
    RoomJoined,
    /// A room was left.
    RoomLeft,
    /// An outbound envelope was handed to the transport.
    MessageSent,
    /// Catch-all: every inbound envelope, regardless of kind.
    Message,
    /// Inbound envelopes of one kind.
    MessageKind(EventKind),
}

/// Payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum BusPayload {
    /// An inbound envelope.
    Envelope(Envelope),
    /// A room membership change.
    Room {
        /// Room the change concerns.
        room_id: String,
    },
    /// A scheduled reconnection attempt.
    Retry {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt is dialed.
        delay: Duration,
    },
    /// Reconnection gave up.
    Exhausted {
        /// Total attempts made.
        attempts: u32,
    },
    /// An outbound envelope left the session.
    Delivery {
        /// Envelope id that was sent.
        id: String,
    },
    /// No payload beyond the topic itself.
    Empty,
}

/// What a subscriber may return; an `Err` is isolated and logged.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler = Box<dyn FnMut(&BusPayload) -> HandlerResult + Send>;

/// Token identifying one registration, returned by [`EventBus::on`].
///
/// Closures are not comparable in Rust, so unsubscription goes through this
/// token rather than a handler reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous fan-out dispatcher keyed by topic.
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<Topic, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic. Handlers fire in registration order.
    pub fn on(
        &mut self,
        topic: Topic,
        handler: impl FnMut(&BusPayload) -> HandlerResult + Send + 'static,
    ) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscribers.entry(topic).or_default().push((id, Box::new(handler)));
        id
    }

    /// Remove exactly the registration identified by `id`.
    ///
    /// Returns whether anything was removed.
    pub fn off(&mut self, topic: &Topic, id: SubscriptionId) -> bool {
        let Some(handlers) = self.subscribers.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(sub_id, _)| *sub_id != id);
        handlers.len() != before
    }

    /// Invoke every handler currently registered for `topic`, in order.
    ///
    /// A handler fault is logged and does not stop its siblings or reach the
    /// emitter.
    pub fn emit(&mut self, topic: &Topic, payload: &BusPayload) {
        let Some(handlers) = self.subscribers.get_mut(topic) else {
            return;
        };
        for (id, handler) in handlers.iter_mut() {
            if let Err(fault) = handler(payload) {
                tracing::warn!(?topic, subscription = id.0, %fault, "subscriber fault isolated");
            }
        }
    }

    /// Fan an inbound envelope out to the catch-all topic and its
    /// kind-scoped topic, in that order.
    pub fn emit_envelope(&mut self, envelope: &Envelope) {
        let payload = BusPayload::Envelope(envelope.clone());
        self.emit(&Topic::Message, &payload);
        self.emit(&Topic::MessageKind(envelope.kind.clone()), &payload);
    }

    /// Drop every subscription. Used by session teardown.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    /// Number of handlers registered for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.subscribers.get(topic).map_or(0, Vec::len)
    }
}
