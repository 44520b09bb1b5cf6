//! rtc-relay - WebRTC signaling relay
//!
//! A WebSocket relay that fans SDP offers, answers and ICE candidates out between
//! connected endpoints, plus the client-side negotiation state machine that drives
//! one peer connection through it.

pub mod config;
pub mod relay;
pub mod signaling;
pub mod transport;

// Re-exports
pub use config::{Config, VideoCodec};
pub use relay::{ConnectionRegistry, EndpointId, LivenessMonitor, RelayRouter, RelayState};
pub use signaling::{NegotiationSession, PeerBackend, SignalingClient, SignalingError, SignalingMessage};
