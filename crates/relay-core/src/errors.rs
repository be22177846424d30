//! Error taxonomy for the relay.
//!
//! Every failure the relay core can observe falls into one of five classes.
//! Per-connection failures ([`RelayError::Transport`],
//! [`RelayError::CapacityExceeded`]) only ever terminate the connection they
//! occurred on; admin-facing failures ([`RelayError::TargetNotFound`],
//! [`RelayError::Validation`]) never mutate the registry.

use thiserror::Error;

/// Errors produced by the relay core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Read or write failure on a single peer connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer's outbound queue was full; the payload was dropped.
    #[error("outbound queue full for peer {peer_id}")]
    CapacityExceeded {
        /// Peer whose queue overflowed.
        peer_id: String,
    },

    /// An admin delivery named a peer that is not connected.
    #[error("target not found: {target}")]
    TargetNotFound {
        /// The requested target.
        target: String,
    },

    /// A malformed administrative request.
    #[error("{0}")]
    Validation(String),

    /// The relay has begun shutting down and accepts no new work.
    #[error("relay shutting down")]
    ShuttingDown,
}

impl RelayError {
    /// Build a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::TargetNotFound { .. } => "TARGET_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
