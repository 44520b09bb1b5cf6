//! Relay router
//!
//! Forwards each recognized negotiation message, byte for byte, to every other
//! registered endpoint. The router keeps no negotiation state of its own.

use super::registry::{ConnectionRegistry, Delivery, EndpointId, Outbound};
use super::stats::RelayStats;
use crate::signaling::{MessageKind, SignalingParser, INVALID_MESSAGE_REPLY};
use bytes::Bytes;
use log::{debug, warn};
use std::sync::Arc;

/// Raw inbound frame, forwarded unmodified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl From<Payload> for Outbound {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => Outbound::Text(text),
            Payload::Binary(data) => Outbound::Binary(data),
        }
    }
}

/// What the router did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded to `delivered` endpoints, `skipped` were not writable
    Forwarded {
        kind: MessageKind,
        delivered: usize,
        skipped: usize,
    },
    /// Unparseable; the sender was told so
    Rejected,
    /// Well-formed but not a negotiation primitive; dropped
    Ignored,
    /// Sender is no longer registered (evicted or disconnecting); dropped
    SenderGone,
}

pub struct RelayRouter {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<RelayStats>,
}

impl RelayRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, stats: Arc<RelayStats>) -> Self {
        Self { registry, stats }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Route one message received from `from`
    pub fn on_message(&self, from: EndpointId, payload: Payload) -> RouteOutcome {
        if !self.registry.contains(from) {
            debug!("Dropping message from unregistered {}", from);
            return RouteOutcome::SenderGone;
        }

        let parsed = match &payload {
            Payload::Text(text) => SignalingParser::parse(text),
            Payload::Binary(data) => SignalingParser::parse_bytes(data),
        };

        let message = match parsed {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Dropping unrecognized message from {}", from);
                self.stats.record_ignored();
                return RouteOutcome::Ignored;
            }
            Err(e) => {
                warn!("Invalid signaling message from {}: {}", from, e);
                self.stats.record_malformed();
                let reply = Outbound::Text(INVALID_MESSAGE_REPLY.to_string());
                if self.registry.send_to(from, reply) != Delivery::Sent {
                    debug!("Could not report malformed message to {}", from);
                }
                return RouteOutcome::Rejected;
            }
        };

        let kind = message.kind();
        let frame = Outbound::from(payload);
        let mut delivered = 0;
        let mut skipped = 0;
        self.registry.for_each_other(from, |endpoint| match endpoint.try_send(frame.clone()) {
            Delivery::Sent => delivered += 1,
            Delivery::NotWritable | Delivery::Gone => {
                debug!("Skipping {} for {}: not writable", kind, endpoint.id());
                skipped += 1;
            }
        });

        self.stats.record_forward(delivered as u64, skipped as u64);
        debug!("Relayed {} from {} to {} endpoint(s)", kind, from, delivered);
        RouteOutcome::Forwarded {
            kind,
            delivered,
            skipped,
        }
    }
}
