//! Error taxonomy for the driver layer.

use livepulse_core::SessionError;
use thiserror::Error;

/// Errors raised by a [`crate::Transport`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote side refused the connection attempt.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The transport is no longer usable at all.
    #[error("transport closed")]
    Closed,
}

/// Driver-level errors.
///
/// These never cross the public API as `Err`: operations degrade per the
/// session rules (queueing, backoff) and callers observe state plus bus
/// events. The taxonomy exists for logging and for `From` conversions at the
/// transport boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The transport failed to connect or deliver.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session core rejected an operation.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ClientError {
    /// Whether the backoff path retries this failure automatically.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(TransportError::Refused(_)) => true,
            Self::Transport(TransportError::Closed) => false,
            Self::Session(e) => e.is_transient(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connections_are_retried() {
        let err = ClientError::from(TransportError::Refused("busy".to_string()));
        assert!(err.is_transient());
        assert!(!ClientError::from(TransportError::Closed).is_transient());
    }

    #[test]
    fn session_classification_passes_through() {
        let err = ClientError::from(SessionError::Transport("reset".to_string()));
        assert!(err.is_transient());
        assert!(!ClientError::from(SessionError::ReconnectExhausted { attempts: 5 }).is_transient());
    }
}
