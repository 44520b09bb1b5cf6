//! Signaling wire format
//!
//! One JSON object per WebSocket frame, tagged by the presence of exactly one
//! of `offer`, `answer` or `candidate`:
//!
//! ```text
//! { "offer": { "sdp": "...", "type": "offer" } }
//! { "answer": { "sdp": "...", "type": "answer" } }
//! { "candidate": { "candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0 } }
//! ```
//!
//! The older type-tagged form (`{"type": "offer", "sdp": "..."}`) is accepted on
//! input; output always uses the keyed form.

use super::SignalingError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// SDP type carried inside a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description as exchanged by browsers (`RTCSessionDescriptionInit`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into(), sdp_type: SdpType::Offer }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into(), sdp_type: SdpType::Answer }
    }
}

/// Routing tag of a signaling message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Offer,
    Answer,
    Candidate,
}

impl MessageKind {
    pub const ALL: [MessageKind; 3] = [MessageKind::Offer, MessageKind::Answer, MessageKind::Candidate];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::Candidate => "candidate",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signaling message exchanged between two negotiating endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingMessage {
    /// SDP offer from the initiator
    Offer(SessionDescription),
    /// SDP answer from the responder
    Answer(SessionDescription),
    /// Trickled ICE candidate, opaque to the relay
    Candidate(Value),
}

impl SignalingMessage {
    /// Create an offer message
    pub fn offer(sdp: impl Into<String>) -> Self {
        SignalingMessage::Offer(SessionDescription::offer(sdp))
    }

    /// Create an answer message
    pub fn answer(sdp: impl Into<String>) -> Self {
        SignalingMessage::Answer(SessionDescription::answer(sdp))
    }

    /// Create a candidate message
    pub fn candidate(candidate: Value) -> Self {
        SignalingMessage::Candidate(candidate)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            SignalingMessage::Offer(_) => MessageKind::Offer,
            SignalingMessage::Answer(_) => MessageKind::Answer,
            SignalingMessage::Candidate(_) => MessageKind::Candidate,
        }
    }

    /// Serialize to JSON (keyed form)
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self)
            .map_err(|e| SignalingError::MalformedMessage(format!("Failed to serialize message: {}", e)))
    }
}

/// Description body before its `type` has been checked against the key it came under
#[derive(Deserialize)]
struct RawDescription {
    sdp: String,
    #[serde(rename = "type", default)]
    sdp_type: Option<SdpType>,
}

/// Parser for signaling frames
pub struct SignalingParser;

impl SignalingParser {
    /// Parse a text frame.
    ///
    /// Returns `Ok(None)` for a well-formed JSON object that carries none of the
    /// known negotiation primitives; such messages are not forwarded.
    pub fn parse(text: &str) -> Result<Option<SignalingMessage>, SignalingError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| SignalingError::MalformedMessage(format!("Invalid JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| SignalingError::MalformedMessage("Expected a JSON object".to_string()))?;

        let present: Vec<MessageKind> = MessageKind::ALL
            .iter()
            .copied()
            .filter(|kind| object.contains_key(kind.as_str()))
            .collect();

        match present.as_slice() {
            [] => Self::parse_type_tagged(object),
            [kind] => Self::parse_keyed(*kind, &object[kind.as_str()]).map(Some),
            _ => Err(SignalingError::MalformedMessage(format!(
                "Message carries {} negotiation keys, expected exactly one",
                present.len()
            ))),
        }
    }

    /// Parse a binary frame holding UTF-8 JSON
    pub fn parse_bytes(data: &[u8]) -> Result<Option<SignalingMessage>, SignalingError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| SignalingError::MalformedMessage(format!("Binary frame is not UTF-8: {}", e)))?;
        Self::parse(text)
    }

    fn parse_keyed(kind: MessageKind, body: &Value) -> Result<SignalingMessage, SignalingError> {
        match kind {
            MessageKind::Offer => Self::parse_description(SdpType::Offer, body).map(SignalingMessage::Offer),
            MessageKind::Answer => Self::parse_description(SdpType::Answer, body).map(SignalingMessage::Answer),
            MessageKind::Candidate => Self::parse_candidate(body),
        }
    }

    fn parse_description(expected: SdpType, body: &Value) -> Result<SessionDescription, SignalingError> {
        let raw = RawDescription::deserialize(body)
            .map_err(|e| SignalingError::MalformedMessage(format!("Invalid session description: {}", e)))?;
        match raw.sdp_type {
            Some(sdp_type) if sdp_type != expected => Err(SignalingError::MalformedMessage(format!(
                "Description type {:?} does not match {:?} message",
                sdp_type, expected
            ))),
            _ => Ok(SessionDescription { sdp: raw.sdp, sdp_type: expected }),
        }
    }

    fn parse_candidate(body: &Value) -> Result<SignalingMessage, SignalingError> {
        if body.is_null() {
            return Err(SignalingError::MalformedMessage("Empty candidate".to_string()));
        }
        Ok(SignalingMessage::Candidate(body.clone()))
    }

    /// Parse the legacy `{"type": ..., "sdp": ...}` form
    fn parse_type_tagged(object: &Map<String, Value>) -> Result<Option<SignalingMessage>, SignalingError> {
        let sdp_type = match object.get("type").and_then(Value::as_str) {
            Some("offer") => SdpType::Offer,
            Some("answer") => SdpType::Answer,
            _ => return Ok(None),
        };
        let sdp = object
            .get("sdp")
            .and_then(Value::as_str)
            .ok_or_else(|| SignalingError::MalformedMessage("Missing SDP".to_string()))?;
        let description = SessionDescription { sdp: sdp.to_string(), sdp_type };
        Ok(Some(match sdp_type {
            SdpType::Offer => SignalingMessage::Offer(description),
            SdpType::Answer => SignalingMessage::Answer(description),
        }))
    }
}
