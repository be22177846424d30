//! Peer identifiers and delivery targets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{RelayError, Result};

/// Target string meaning "every currently registered peer".
pub const WILDCARD: &str = "*";

/// Externally supplied peer identifier.
///
/// Unique among currently registered peers, but not over time: a peer may
/// reconnect under the same id after a disconnect.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id. The value is kept verbatim.
    ///
    /// Empty or whitespace-only values are rejected with `"id required"`.
    /// Surrounding whitespace is rejected rather than stripped, so `" A"` and
    /// `"A"` can never be confused for one another.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(RelayError::validation("id required"));
        }
        if trimmed.len() != id.len() {
            return Err(RelayError::validation("id must not have surrounding whitespace"));
        }
        Ok(Self(id))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where an admin message should go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Every peer registered at dispatch time.
    All,
    /// One named peer.
    Peer(PeerId),
}

impl Target {
    /// Parse a raw target string.
    ///
    /// Empty targets are rejected with `"target required"`; they are never
    /// treated as a broadcast.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RelayError::validation("target required"));
        }
        if trimmed == WILDCARD {
            return Ok(Self::All);
        }
        PeerId::new(trimmed).map(Self::Peer)
    }

    /// Whether this is the wildcard target.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(WILDCARD),
            Self::Peer(id) => id.fmt(f),
        }
    }
}
