//! Sans-IO core of the livepulse realtime client.
//!
//! One logical session against the message bus, modeled as pure state
//! machines in the action pattern: events and the current time go in,
//! `Vec<SessionAction>` comes out, and a driver (see `livepulse-client`)
//! executes the actions against a real transport and timers. No I/O happens
//! here, which keeps every ordering and backoff property deterministic to
//! test.
//!
//! # Components
//!
//! - [`Session`]: connection lifecycle, reconnection backoff, heartbeat
//!   liveness, offline queueing, and room rejoin
//! - [`EventBus`]: in-process fan-out of envelopes and lifecycle events to
//!   independent consumers
//! - [`MessageQueue`]: FIFO holding area for traffic produced while offline
//! - [`RoomRegistry`]: cache of rooms this session has joined
//! - [`Environment`]: time and randomness seam for deterministic tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod bus;
pub mod env;
mod error;
mod queue;
mod rooms;
mod session;

pub use bus::{BusPayload, EventBus, HandlerResult, SubscriptionId, Topic};
pub use env::Environment;
pub use error::SessionError;
pub use queue::{FlushReport, MessageQueue, QueuedEnvelope};
pub use rooms::RoomRegistry;
pub use session::{ConnectionStatus, Session, SessionAction, SessionConfig, SessionState};
