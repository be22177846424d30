//! Wire envelopes at the admin and peer boundaries.
//!
//! Inbound admin frames: `{"target": "<peer id or \"*\">", "message": "<string>"}`.
//! Outbound peer frames: `{"from": "admin", "message": "<string>"}`.
//! Admin acknowledgements: `{"status": "ok", "target": ...}` or
//! `{"status": "error", "error": ...}`.

use serde::{Deserialize, Serialize};

use crate::errors::{RelayError, Result};
use crate::ids::Target;

/// Sender name stamped on every admin-originated peer envelope.
pub const ADMIN_SENDER: &str = "admin";

/// Raw admin request as it arrives on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRequest {
    /// Peer id or `"*"`.
    pub target: String,
    /// Opaque payload forwarded to the peer(s).
    pub message: String,
}

/// A validated admin message, ready for the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminMessage {
    /// Where the message goes.
    pub target: Target,
    /// Opaque payload.
    pub message: String,
}

impl AdminMessage {
    /// Build an admin message from already-validated parts.
    pub fn new(target: Target, message: impl Into<String>) -> Self {
        Self {
            target,
            message: message.into(),
        }
    }

    /// Parse and validate a raw admin frame.
    ///
    /// Invalid JSON or missing fields yield `"invalid json"`; an empty target
    /// yields `"target required"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let request: AdminRequest =
            serde_json::from_str(raw).map_err(|_| RelayError::validation("invalid json"))?;
        Self::try_from(request)
    }
}

impl TryFrom<AdminRequest> for AdminMessage {
    type Error = RelayError;

    fn try_from(request: AdminRequest) -> Result<Self> {
        let target = Target::parse(&request.target)?;
        Ok(Self {
            target,
            message: request.message,
        })
    }
}

/// Envelope written to a peer's connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEnvelope {
    /// Originator of the message.
    pub from: String,
    /// Opaque payload.
    pub message: String,
}

impl PeerEnvelope {
    /// Envelope for an admin-originated message.
    pub fn admin(message: impl Into<String>) -> Self {
        Self {
            from: ADMIN_SENDER.to_owned(),
            message: message.into(),
        }
    }

    /// Serialize to the JSON text written to the wire.
    pub fn to_json(&self) -> String {
        // Two string fields cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Per-request acknowledgement sent back on the admin channel.
///
/// Acknowledges acceptance, not delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AdminAck {
    /// The message was handed to the registry.
    Ok {
        /// Normalized target.
        target: String,
    },
    /// The request was rejected.
    Error {
        /// Reason for rejection.
        error: String,
    },
}

impl AdminAck {
    /// Acceptance acknowledgement.
    pub fn accepted(target: &Target) -> Self {
        Self::Ok {
            target: target.to_string(),
        }
    }

    /// Rejection acknowledgement.
    pub fn rejected(err: &RelayError) -> Self {
        Self::Error {
            error: err.to_string(),
        }
    }

    /// Whether the request was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PeerId;
    use assert_matches::assert_matches;

    #[test]
    fn parse_named_target() {
        let msg = AdminMessage::parse(r#"{"target":"A","message":"hello"}"#).unwrap();
        assert_eq!(msg.target, Target::Peer(PeerId::new("A").unwrap()));
        assert_eq!(msg.message, "hello");
    }

    #[test]
    fn parse_wildcard_target() {
        let msg = AdminMessage::parse(r#"{"target":"*","message":"hi"}"#).unwrap();
        assert!(msg.target.is_all());
    }

    #[test]
    fn empty_target_rejected() {
        let err = AdminMessage::parse(r#"{"target":"","message":"hi"}"#).unwrap_err();
        assert_eq!(err, RelayError::validation("target required"));
    }

    #[test]
    fn invalid_json_rejected() {
        assert_matches!(
            AdminMessage::parse("not json"),
            Err(RelayError::Validation(m)) if m == "invalid json"
        );
    }

    #[test]
    fn missing_message_field_rejected() {
        assert_matches!(
            AdminMessage::parse(r#"{"target":"A"}"#),
            Err(RelayError::Validation(m)) if m == "invalid json"
        );
    }

    #[test]
    fn non_string_message_rejected() {
        assert_matches!(
            AdminMessage::parse(r#"{"target":"A","message":42}"#),
            Err(RelayError::Validation(_))
        );
    }

    #[test]
    fn empty_message_is_allowed() {
        let msg = AdminMessage::parse(r#"{"target":"A","message":""}"#).unwrap();
        assert!(msg.message.is_empty());
    }

    #[test]
    fn peer_envelope_wire_shape() {
        let json = PeerEnvelope::admin("hi").to_json();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, serde_json::json!({"from": "admin", "message": "hi"}));
    }

    #[test]
    fn peer_envelope_escapes_payload() {
        let json = PeerEnvelope::admin("say \"hi\"\n").to_json();
        let back: PeerEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, "say \"hi\"\n");
    }

    #[test]
    fn ack_ok_wire_shape() {
        let ack = AdminAck::accepted(&Target::All);
        let parsed: serde_json::Value = serde_json::from_str(&ack.to_json()).unwrap();
        assert_eq!(parsed, serde_json::json!({"status": "ok", "target": "*"}));
        assert!(ack.is_accepted());
    }

    #[test]
    fn ack_error_wire_shape() {
        let ack = AdminAck::rejected(&RelayError::validation("target required"));
        let parsed: serde_json::Value = serde_json::from_str(&ack.to_json()).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({"status": "error", "error": "target required"})
        );
        assert!(!ack.is_accepted());
    }
}
