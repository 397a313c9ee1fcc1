//! Wire-level error types.

use thiserror::Error;

/// Errors raised while encoding, decoding, or validating wire messages.
///
/// These are per-message faults: the session drops and logs the offending
/// envelope, they never tear down the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// JSON serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// JSON deserialization failed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Parsed but violates the envelope contract.
    #[error("invalid envelope: {reason}")]
    Invalid {
        /// Which part of the contract was violated.
        reason: String,
    },
}
