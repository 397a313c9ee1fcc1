//! Transport seam between the session driver and the wire.
//!
//! A transport hands out one [`TransportLink`] per successful connection
//! attempt. The driver writes outbound envelopes into `outbound` and reads
//! inbound envelopes from `inbound`; the inbound channel closing is the
//! transport-drop signal. The driver never touches a socket directly, so
//! tests script connectivity through [`ChannelTransport`] instead of a
//! network.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use livepulse_proto::Envelope;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Channel depth per link direction.
const LINK_CAPACITY: usize = 64;

/// One established connection.
#[derive(Debug)]
pub struct TransportLink {
    /// Driver-to-wire envelopes.
    pub outbound: mpsc::Sender<Envelope>,
    /// Wire-to-driver envelopes. Closure of this channel means the link died.
    pub inbound: mpsc::Receiver<Envelope>,
}

/// Connection factory.
///
/// `connect` is called once per attempt; each success yields a fresh link.
/// Refusals feed the session's backoff path, so implementations report them
/// as errors rather than hanging.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Attempt to establish a link for `user_id`.
    async fn connect(&self, user_id: &str) -> Result<TransportLink, TransportError>;
}

/// The far side of a [`ChannelTransport`] link, held by tests.
///
/// Dropping it closes both directions, which the driver observes as a
/// transport drop.
#[derive(Debug)]
pub struct PeerLink {
    /// Inject inbound envelopes toward the driver.
    pub to_client: mpsc::Sender<Envelope>,
    /// Observe envelopes the driver transmitted.
    pub from_client: mpsc::Receiver<Envelope>,
}

#[derive(Default)]
struct ChannelState {
    refusals: u32,
    attempts: usize,
    peers: VecDeque<PeerLink>,
}

/// In-memory transport over paired channels.
///
/// Connectivity is scriptable: queue up refusals with
/// [`ChannelTransport::refuse_next`], then claim the far side of each
/// established link with [`ChannelTransport::take_peer`] to inject inbound
/// traffic, observe outbound traffic, or kill the link by dropping the peer.
#[derive(Clone, Default)]
pub struct ChannelTransport {
    state: Arc<Mutex<ChannelState>>,
}

impl ChannelTransport {
    /// Create a transport that accepts every connection attempt.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.refusals += n;
        }
    }

    /// Total connection attempts observed, refused ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().map_or(0, |s| s.attempts)
    }

    /// Claim the far side of the oldest unclaimed link.
    #[must_use]
    pub fn take_peer(&self) -> Option<PeerLink> {
        self.state.lock().ok().and_then(|mut s| s.peers.pop_front())
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self, _user_id: &str) -> Result<TransportLink, TransportError> {
        let Ok(mut state) = self.state.lock() else {
            return Err(TransportError::Closed);
        };
        state.attempts += 1;
        if state.refusals > 0 {
            state.refusals -= 1;
            return Err(TransportError::Refused("scripted refusal".to_string()));
        }

        let (to_client, inbound) = mpsc::channel(LINK_CAPACITY);
        let (outbound, from_client) = mpsc::channel(LINK_CAPACITY);
        state.peers.push_back(PeerLink { to_client, from_client });
        Ok(TransportLink { outbound, inbound })
    }
}
