//! Tokio driver for the livepulse realtime core.
//!
//! Pairs the sans-io session state machine from `livepulse-core` with a real
//! transport and real timers. The [`ConnectionManager`] is the public entry
//! point: initialize a session, join rooms, send chat/poll/Q&A traffic, and
//! subscribe to lifecycle and message events. Network failure is never an
//! error at this API; it is queueing plus backoff plus bus events.
//!
//! The [`Transport`] trait is the only seam toward the wire; the bundled
//! [`ChannelTransport`] runs the whole stack in-memory, which is also how the
//! integration tests script connectivity.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod collaborators;
mod error;
mod manager;
mod transport;

pub use collaborators::{
    ApproveAll, HistoryStore, ModerationService, ModerationVerdict, NoHistory, NotificationSink,
    NullNotifier,
};
pub use error::{ClientError, TransportError};
pub use manager::ConnectionManager;
pub use transport::{ChannelTransport, PeerLink, Transport, TransportLink};
