//! Error types for airwave audio rooms.

use thiserror::Error;

/// Result type alias for airwave operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while orchestrating an audio room.
///
/// Variants are structured so callers can distinguish "retry the same
/// call", "the room is gone", and "you asked for something invalid"
/// without string matching.
#[derive(Debug, Error)]
pub enum Error {
    /// A gateway or platform REST call returned a non-success status.
    /// Fatal to the operation; never auto-retried by this crate.
    #[error("signaling error in {context}: {message}")]
    Signaling {
        /// The operation that failed (endpoint or gateway request)
        context: String,
        /// Failure detail reported by the remote side
        message: String,
    },

    /// An expected gateway event did not arrive within its bound.
    #[error("timed out after {timeout_ms}ms waiting for {event}")]
    ProtocolTimeout {
        /// Human-readable description of the awaited event
        event: String,
        /// The bound that expired, in milliseconds
        timeout_ms: u64,
    },

    /// An operation was requested in an invalid local state. Raised
    /// before any network call, guaranteeing no side effects.
    #[error("capability error: {0}")]
    Capability(String),

    /// ICE/SDP negotiation failure.
    #[error("media negotiation failed: {0}")]
    MediaNegotiation(String),

    /// Control-channel transport failure. A clean channel close is
    /// reported as an event, not through this variant.
    #[error("control channel error: {0}")]
    Channel(String),

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for [`Error::Signaling`].
    pub fn signaling(context: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Signaling {
            context: context.into(),
            message: message.into(),
        }
    }

    /// True if the operation failed because an event missed its bound.
    /// The caller decides whether to retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ProtocolTimeout { .. })
    }

    /// True if the request was invalid in the current local state and
    /// produced no side effects.
    pub fn is_capability(&self) -> bool {
        matches!(self, Error::Capability(_))
    }

    /// True if the remote side rejected the operation.
    pub fn is_signaling(&self) -> bool {
        matches!(self, Error::Signaling { .. })
    }
}
