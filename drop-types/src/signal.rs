//! Signaling messages exchanged between clients and the relay.
//!
//! Every message is one JSON text frame with a `type` discriminator and
//! camelCase fields. Offers, answers, candidates and byes are relayed to the
//! other peer verbatim; the relay only reads `type` and `sessionKey`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{SessionKey, Slot, WireError};

/// All signaling messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalMessage {
    /// Claim a slot in the room for `session_key`.
    Register {
        /// Free-form role label (informational).
        #[serde(default = "default_role")]
        role: String,
        /// Room to join. Missing keys are rejected with `bad_join`.
        #[serde(default, alias = "file_id", alias = "room")]
        session_key: Option<SessionKey>,
    },
    /// Same as `Register`; answered with `Joined`.
    Join {
        /// Free-form role label (informational).
        #[serde(default = "default_role")]
        role: String,
        /// Room to join. Missing keys are rejected with `bad_join`.
        #[serde(default, alias = "file_id", alias = "room")]
        session_key: Option<SessionKey>,
    },
    /// Reply to `Register`.
    Registered {
        /// Room joined.
        #[serde(alias = "file_id")]
        session_key: SessionKey,
        /// Slot assigned.
        slot: Slot,
    },
    /// Reply to `Join`.
    Joined {
        /// Room joined.
        #[serde(alias = "room")]
        session_key: SessionKey,
        /// Slot assigned.
        slot: Slot,
    },
    /// Both slots are filled; sent once to each side per pairing.
    PeerReady {
        /// Room that became ready.
        #[serde(alias = "file_id")]
        session_key: SessionKey,
    },
    /// Session description offer.
    Offer {
        /// Target room.
        #[serde(default, alias = "file_id")]
        session_key: Option<SessionKey>,
        /// The offer.
        sdp: SessionDescription,
    },
    /// Session description answer.
    Answer {
        /// Target room.
        #[serde(default, alias = "file_id")]
        session_key: Option<SessionKey>,
        /// The answer.
        sdp: SessionDescription,
    },
    /// Trickled ICE candidate, opaque to everyone but the peer engine.
    Candidate {
        /// Target room.
        #[serde(default, alias = "file_id")]
        session_key: Option<SessionKey>,
        /// Candidate payload.
        candidate: serde_json::Value,
    },
    /// Peer is giving up on the session.
    Bye {
        /// Target room.
        #[serde(default, alias = "file_id")]
        session_key: Option<SessionKey>,
    },
    /// Request rejected by the relay.
    Error {
        /// Machine-readable reason.
        reason: ErrorReason,
    },
}

fn default_role() -> String {
    "peer".to_string()
}

impl SignalMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::from)
    }

    /// Parse a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::from)
    }

    /// The session key carried by this message, if any.
    pub fn session_key(&self) -> Option<&SessionKey> {
        match self {
            Self::Register { session_key, .. }
            | Self::Join { session_key, .. }
            | Self::Offer { session_key, .. }
            | Self::Answer { session_key, .. }
            | Self::Candidate { session_key, .. }
            | Self::Bye { session_key } => session_key.as_ref(),
            Self::Registered { session_key, .. }
            | Self::Joined { session_key, .. }
            | Self::PeerReady { session_key } => Some(session_key),
            Self::Error { .. } => None,
        }
    }

    /// Whether the relay forwards this message to the other peer.
    pub fn is_relayed(&self) -> bool {
        matches!(
            self,
            Self::Offer { .. } | Self::Answer { .. } | Self::Candidate { .. } | Self::Bye { .. }
        )
    }

    /// Wire name of the message type (for logging).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Join { .. } => "join",
            Self::Registered { .. } => "registered",
            Self::Joined { .. } => "joined",
            Self::PeerReady { .. } => "peer-ready",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Bye { .. } => "bye",
            Self::Error { .. } => "error",
        }
    }
}

/// Type of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Answer
    Answer,
    /// Rollback of a local offer
    Rollback,
}

/// Session description produced by the peer engine, relayed opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type.
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP body.
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Reasons the relay rejects a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// Registration without a usable session key, or a second registration.
    BadJoin,
    /// Both slots are taken by other connections.
    RoomFull,
    /// No such room, or the sender is not a member of it.
    UnknownSession,
    /// The other slot is empty and buffering is disabled.
    PeerNotReady,
    /// Unparsable or unexpected frame.
    InvalidMessage,
    /// Too many messages from this connection.
    RateLimited,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadJoin => "bad_join",
            Self::RoomFull => "room_full",
            Self::UnknownSession => "unknown_session",
            Self::PeerNotReady => "peer_not_ready",
            Self::InvalidMessage => "invalid_message",
            Self::RateLimited => "rate_limited",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_uses_camel_case_session_key() {
        let msg = SignalMessage::Register {
            role: "seeder".into(),
            session_key: Some(SessionKey::new("f-1")),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "register", "role": "seeder", "sessionKey": "f-1"})
        );
    }

    #[test]
    fn legacy_field_names_are_accepted() {
        let msg =
            SignalMessage::from_json(r#"{"type":"register","role":"seeder","file_id":"abc"}"#)
                .unwrap();
        assert_eq!(msg.session_key(), Some(&SessionKey::new("abc")));

        let msg = SignalMessage::from_json(r#"{"type":"join","room":"r1"}"#).unwrap();
        assert_eq!(msg.session_key(), Some(&SessionKey::new("r1")));
        assert!(matches!(msg, SignalMessage::Join { ref role, .. } if role == "peer"));
    }

    #[test]
    fn register_without_key_parses_as_none() {
        let msg = SignalMessage::from_json(r#"{"type":"register","role":"x"}"#).unwrap();
        assert_eq!(msg.session_key(), None);
    }

    #[test]
    fn peer_ready_wire_name() {
        let msg = SignalMessage::PeerReady {
            session_key: SessionKey::new("k"),
        };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"peer-ready","sessionKey":"k"}"#
        );
    }

    #[test]
    fn offer_carries_nested_description() {
        let text = r#"{"type":"offer","sessionKey":"k","sdp":{"type":"offer","sdp":"v=0"}}"#;
        let msg = SignalMessage::from_json(text).unwrap();
        match msg {
            SignalMessage::Offer { sdp, .. } => {
                assert_eq!(sdp, SessionDescription::offer("v=0"));
            }
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[test]
    fn candidate_payload_is_opaque() {
        let text = r#"{"type":"candidate","sessionKey":"k","candidate":{"candidate":"candidate:1 1 udp","sdpMid":"0"}}"#;
        let msg = SignalMessage::from_json(text).unwrap();
        assert!(msg.is_relayed());
        if let SignalMessage::Candidate { candidate, .. } = msg {
            assert_eq!(candidate["sdpMid"], "0");
        } else {
            panic!("expected candidate");
        }
    }

    #[test]
    fn error_reasons_are_snake_case() {
        let msg = SignalMessage::Error {
            reason: ErrorReason::UnknownSession,
        };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"error","reason":"unknown_session"}"#
        );
        assert_eq!(ErrorReason::PeerNotReady.to_string(), "peer_not_ready");
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(SignalMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(SignalMessage::from_json("not json").is_err());
    }

    #[test]
    fn only_peer_messages_are_relayed() {
        let bye = SignalMessage::Bye { session_key: None };
        let ready = SignalMessage::PeerReady {
            session_key: SessionKey::new("k"),
        };
        assert!(bye.is_relayed());
        assert!(!ready.is_relayed());
        assert_eq!(ready.kind(), "peer-ready");
    }
}
