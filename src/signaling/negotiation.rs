//! Negotiation state machine
//!
//! Drives one endpoint's half of the offer/answer/candidate exchange:
//!
//! ```text
//! initiator: Idle -> OfferCreated -> AwaitingRemote -> Stable
//! responder: Idle -> OfferReceived -> AnswerCreated -> Stable
//! any state: -> Closed
//! ```
//!
//! The session performs no I/O. Media operations go through a [`PeerBackend`]
//! and messages to send are collected with [`NegotiationSession::poll_output`].
//! Candidates never overtake the description they belong to: local candidates
//! wait for the local description, remote candidates wait for the remote one.

use super::message::{SdpType, SessionDescription, SignalingMessage};
use super::sdp::prefer_codec;
use super::SignalingError;
use crate::config::VideoCodec;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::VecDeque;

/// Media stack operations consumed by the state machine.
///
/// Implemented on top of a real peer connection by the embedding application.
pub trait PeerBackend {
    /// Whether a local media source is attached; an offer cannot be created without one
    fn has_local_media(&self) -> bool {
        true
    }

    /// Create an SDP offer
    fn create_offer(&mut self) -> Result<String, SignalingError>;

    /// Create an SDP answer for the applied remote offer
    fn create_answer(&mut self) -> Result<String, SignalingError>;

    /// Apply a local description
    fn set_local_description(&mut self, description: &SessionDescription) -> Result<(), SignalingError>;

    /// Apply a remote description
    fn set_remote_description(&mut self, description: &SessionDescription) -> Result<(), SignalingError>;

    /// Apply a remote ICE candidate
    fn add_ice_candidate(&mut self, candidate: &Value) -> Result<(), SignalingError>;
}

/// Which side of the exchange this session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Negotiation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Initiator: local offer created and applied
    OfferCreated,
    /// Initiator: offer sent, waiting for the answer
    AwaitingRemote,
    /// Responder: remote offer applied
    OfferReceived,
    /// Responder: answer created, applied and sent
    AnswerCreated,
    /// Both descriptions applied; connectivity may proceed
    Stable,
    Closed,
}

/// Output produced by the session for the caller to act on
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    /// Message to hand to the relay
    Send(SignalingMessage),
    /// Negotiation reached `Stable`; the remote media can be attached
    Established,
}

/// One endpoint's negotiation session
pub struct NegotiationSession<B> {
    id: String,
    role: Role,
    phase: Phase,
    history: Vec<Phase>,
    backend: B,
    preferred_codec: Option<VideoCodec>,
    local_description_set: bool,
    remote_description_applied: bool,
    /// Local candidates discovered before the local description was set
    pending_local: VecDeque<Value>,
    /// Remote candidates received before the remote description was applied
    pending_remote: VecDeque<Value>,
    outputs: VecDeque<SessionOutput>,
}

impl<B: PeerBackend> NegotiationSession<B> {
    /// Create a new session in `Idle`
    pub fn new(role: Role, backend: B) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        debug!("Negotiation session {} created as {:?}", id, role);
        Self {
            id,
            role,
            phase: Phase::Idle,
            history: vec![Phase::Idle],
            backend,
            preferred_codec: None,
            local_description_set: false,
            remote_description_applied: false,
            pending_local: VecDeque::new(),
            pending_remote: VecDeque::new(),
            outputs: VecDeque::new(),
        }
    }

    /// Rewrite local descriptions so `codec` is negotiated first
    pub fn with_preferred_codec(mut self, codec: Option<VideoCodec>) -> Self {
        self.preferred_codec = codec;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase the session has been in, oldest first
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn is_stable(&self) -> bool {
        self.phase == Phase::Stable
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn remote_description_applied(&self) -> bool {
        self.remote_description_applied
    }

    pub fn pending_local_candidates(&self) -> usize {
        self.pending_local.len()
    }

    pub fn pending_remote_candidates(&self) -> usize {
        self.pending_remote.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Next output to act on, in production order
    pub fn poll_output(&mut self) -> Option<SessionOutput> {
        self.outputs.pop_front()
    }

    /// Initiator: create, apply and send the offer
    pub fn start(&mut self) -> Result<(), SignalingError> {
        if self.role != Role::Initiator {
            return Err(self.violation("only the initiator creates an offer".to_string()));
        }
        if self.phase != Phase::Idle {
            return Err(self.violation(format!("cannot create an offer in {:?}", self.phase)));
        }
        if !self.backend.has_local_media() {
            return Err(self.fail("no local media source attached".to_string()));
        }

        let offer = self.create_local_description(SdpType::Offer)?;
        self.transition(Phase::OfferCreated);
        self.outputs.push_back(SessionOutput::Send(SignalingMessage::Offer(offer)));
        self.transition(Phase::AwaitingRemote);
        self.flush_local_candidates();
        Ok(())
    }

    /// Feed one message received from the relay.
    ///
    /// Messages that are wrong for the current phase are logged and ignored
    /// (`ProtocolViolation`, no transition). Backend rejections close the session.
    pub fn handle_message(&mut self, message: SignalingMessage) -> Result<(), SignalingError> {
        if self.phase == Phase::Closed {
            return Err(self.violation(format!("{} received after close", message.kind())));
        }
        match message {
            SignalingMessage::Offer(offer) => self.handle_offer(offer),
            SignalingMessage::Answer(answer) => self.handle_answer(answer),
            SignalingMessage::Candidate(candidate) => self.handle_remote_candidate(candidate),
        }
    }

    /// Queue a locally discovered candidate; sent once the local description is set
    pub fn add_local_candidate(&mut self, candidate: Value) {
        if self.phase == Phase::Closed {
            debug!("Session {} closed, dropping local candidate", self.id);
            return;
        }
        if self.local_description_set {
            self.outputs.push_back(SessionOutput::Send(SignalingMessage::Candidate(candidate)));
        } else {
            self.pending_local.push_back(candidate);
        }
    }

    /// Tear the session down and release everything still queued
    pub fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        let released = self.release_queues();
        info!("Session {} closed ({} queued items released)", self.id, released);
        self.transition(Phase::Closed);
    }

    fn handle_offer(&mut self, offer: SessionDescription) -> Result<(), SignalingError> {
        if self.role != Role::Responder || self.phase != Phase::Idle {
            return Err(self.violation(format!("offer received as {:?} in {:?}", self.role, self.phase)));
        }
        self.apply_remote_description(&offer)?;
        self.transition(Phase::OfferReceived);

        let answer = self.create_local_description(SdpType::Answer)?;
        self.outputs.push_back(SessionOutput::Send(SignalingMessage::Answer(answer)));
        self.transition(Phase::AnswerCreated);
        self.flush_local_candidates();
        self.become_stable();
        Ok(())
    }

    fn handle_answer(&mut self, answer: SessionDescription) -> Result<(), SignalingError> {
        if self.role != Role::Initiator || self.phase != Phase::AwaitingRemote {
            return Err(self.violation(format!("answer received as {:?} in {:?}", self.role, self.phase)));
        }
        self.apply_remote_description(&answer)?;
        self.become_stable();
        Ok(())
    }

    fn handle_remote_candidate(&mut self, candidate: Value) -> Result<(), SignalingError> {
        if !self.remote_description_applied {
            self.pending_remote.push_back(candidate);
            debug!(
                "Session {} buffered remote candidate ({} pending)",
                self.id,
                self.pending_remote.len()
            );
            return Ok(());
        }
        if let Err(e) = self.backend.add_ice_candidate(&candidate) {
            return Err(self.fail(format!("remote candidate rejected: {}", e)));
        }
        Ok(())
    }

    /// Apply the remote description, then replay buffered candidates in arrival order
    fn apply_remote_description(&mut self, description: &SessionDescription) -> Result<(), SignalingError> {
        if let Err(e) = self.backend.set_remote_description(description) {
            return Err(self.fail(format!("remote description rejected: {}", e)));
        }
        self.remote_description_applied = true;

        if !self.pending_remote.is_empty() {
            debug!("Session {} replaying {} buffered candidates", self.id, self.pending_remote.len());
        }
        while let Some(candidate) = self.pending_remote.pop_front() {
            if let Err(e) = self.backend.add_ice_candidate(&candidate) {
                return Err(self.fail(format!("buffered candidate rejected: {}", e)));
            }
        }
        Ok(())
    }

    fn create_local_description(&mut self, sdp_type: SdpType) -> Result<SessionDescription, SignalingError> {
        let created = match sdp_type {
            SdpType::Offer => self.backend.create_offer(),
            SdpType::Answer => self.backend.create_answer(),
        };
        let sdp = match created {
            Ok(sdp) => sdp,
            Err(e) => return Err(self.fail(format!("failed to create {:?}: {}", sdp_type, e))),
        };
        let sdp = match self.preferred_codec {
            Some(codec) => prefer_codec(&sdp, codec),
            None => sdp,
        };
        let description = SessionDescription { sdp, sdp_type };
        if let Err(e) = self.backend.set_local_description(&description) {
            return Err(self.fail(format!("local description rejected: {}", e)));
        }
        self.local_description_set = true;
        Ok(description)
    }

    fn flush_local_candidates(&mut self) {
        while let Some(candidate) = self.pending_local.pop_front() {
            self.outputs.push_back(SessionOutput::Send(SignalingMessage::Candidate(candidate)));
        }
    }

    fn become_stable(&mut self) {
        self.transition(Phase::Stable);
        self.outputs.push_back(SessionOutput::Established);
        info!("Session {} ({:?}) is stable", self.id, self.role);
    }

    fn transition(&mut self, next: Phase) {
        debug!("Session {} phase change: {:?} -> {:?}", self.id, self.phase, next);
        self.phase = next;
        self.history.push(next);
    }

    fn release_queues(&mut self) -> usize {
        let released = self.pending_local.len() + self.pending_remote.len() + self.outputs.len();
        self.pending_local.clear();
        self.pending_remote.clear();
        self.outputs.clear();
        released
    }

    fn violation(&self, reason: String) -> SignalingError {
        warn!("Session {}: protocol violation: {}", self.id, reason);
        SignalingError::ProtocolViolation(reason)
    }

    fn fail(&mut self, reason: String) -> SignalingError {
        error!("Session {}: negotiation failed: {}", self.id, reason);
        self.release_queues();
        self.transition(Phase::Closed);
        SignalingError::NegotiationFailure(reason)
    }
}
