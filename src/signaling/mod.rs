//! WebRTC signaling protocol
//!
//! This module provides the client-facing half of the relay:
//! - Wire format for offer/answer/candidate messages
//! - Negotiation state machine with candidate buffering
//! - SDP codec preference rewriting
//! - WebSocket client that drives a negotiation through the relay

pub mod client;
pub mod message;
pub mod negotiation;
pub mod sdp;

pub use client::{ClientEvent, SignalingClient};
pub use message::{MessageKind, SdpType, SessionDescription, SignalingMessage, SignalingParser};
pub use negotiation::{NegotiationSession, PeerBackend, Phase, Role, SessionOutput};

use crate::relay::EndpointId;
use std::error::Error;
use std::fmt;

/// Body of the reply sent to an endpoint whose message could not be parsed.
pub const INVALID_MESSAGE_REPLY: &str = r#"{"error":"Invalid message format"}"#;

/// Signaling errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Message could not be parsed; reported to the sender, connection stays open
    MalformedMessage(String),
    /// Well-formed message that is wrong for the current negotiation phase
    ProtocolViolation(String),
    /// Endpoint stopped answering liveness probes
    UnreachablePeer(EndpointId),
    /// Local description/answer creation or application failed
    NegotiationFailure(String),
    /// Client-side socket failure
    Transport(String),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::MalformedMessage(msg) => write!(f, "Malformed message: {}", msg),
            SignalingError::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            SignalingError::UnreachablePeer(id) => write!(f, "Unreachable peer: {}", id),
            SignalingError::NegotiationFailure(msg) => write!(f, "Negotiation failed: {}", msg),
            SignalingError::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl Error for SignalingError {}
