//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - [`ids`]: [`PeerId`] and delivery [`Target`] (specific peer or wildcard)
//! - [`envelope`]: admin request/ack and peer-facing wire envelopes
//! - [`errors`]: the [`RelayError`] taxonomy
//! - [`logging`]: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use envelope::{AdminAck, AdminMessage, AdminRequest, PeerEnvelope};
pub use errors::{RelayError, Result};
pub use ids::{PeerId, Target, WILDCARD};
