//! Error taxonomy for the session core.
//!
//! Nothing in the public API returns an error for ordinary network
//! conditions; those surface as state plus bus events. These types classify
//! what went wrong for logging and for the few genuinely invalid calls
//! (programmer errors like initializing twice).

use std::time::Duration;

use livepulse_proto::ProtocolError;
use thiserror::Error;

use crate::session::SessionState;

/// Errors in the session layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation not valid in the current state.
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when the error occurred.
        state: SessionState,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// Underlying transport dropped or refused the connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// No liveness observed within the timeout window.
    #[error("heartbeat timeout after {elapsed:?}")]
    HeartbeatTimeout {
        /// Silence duration when the session was declared dead.
        elapsed: Duration,
    },

    /// Reconnection attempts hit the cap; the session is terminally failed.
    #[error("reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// How many attempts were made.
        attempts: u32,
    },

    /// Malformed envelope on the wire. Dropped and logged, never delivered.
    #[error("validation error: {0}")]
    Validation(#[from] ProtocolError),
}

impl SessionError {
    /// Whether this failure is retried automatically.
    ///
    /// Transport drops and heartbeat timeouts feed the backoff path.
    /// Exhaustion is terminal; validation and state errors indicate a broken
    /// peer or caller and are never retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::HeartbeatTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_faults_are_transient() {
        assert!(SessionError::Transport("reset".to_string()).is_transient());
        assert!(
            SessionError::HeartbeatTimeout { elapsed: Duration::from_secs(75) }.is_transient()
        );
    }

    #[test]
    fn terminal_and_caller_errors_are_not() {
        assert!(!SessionError::ReconnectExhausted { attempts: 5 }.is_transient());
        assert!(
            !SessionError::InvalidState {
                state: SessionState::Connected,
                operation: "initialize",
            }
            .is_transient()
        );
        assert!(
            !SessionError::Validation(ProtocolError::Invalid {
                reason: "empty envelope id".to_string()
            })
            .is_transient()
        );
    }
}
