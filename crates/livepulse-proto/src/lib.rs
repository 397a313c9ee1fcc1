//! Wire types for the livepulse realtime core.
//!
//! Every message exchanged with the bus is a JSON [`Envelope`]: a uniform
//! container whose `type` tag determines how the opaque `data` payload is
//! interpreted downstream. Higher-level features (chat, polls, Q&A, typing,
//! presence) are payload conventions layered on this single shape, not
//! separate transports; see the [`payloads`] module.
//!
//! # Invariants
//!
//! - An envelope is immutable once created; its `id` is unique.
//! - The `type` tag is a closed set with a forward-compatible fallback:
//!   unrecognized tags from a newer server round-trip as
//!   [`EventKind::Unknown`] instead of failing to parse.
//! - Decoding validates the envelope contract before anything downstream
//!   sees it; malformed envelopes never reach subscribers.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod envelope;
mod error;
pub mod payloads;
mod room;

pub use envelope::{Envelope, EventKind};
pub use error::ProtocolError;
pub use room::{Room, RoomKind, RoomSettings};
