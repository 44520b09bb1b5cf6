//! Signaling client
//!
//! Connects one endpoint to the relay and drives its [`NegotiationSession`].
//! Inbound frames are handed to the session one at a time, in receipt order,
//! so candidate ordering is preserved end to end.

use super::message::SignalingParser;
use super::negotiation::{NegotiationSession, PeerBackend, Phase, Role, SessionOutput};
use super::SignalingError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Notifications for the embedding application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Negotiation is stable; remote media can be attached
    Established,
    /// The relay rejected one of our messages
    RelayError(String),
    /// The session ended
    Closed,
}

/// WebSocket connection to the signaling relay
pub struct SignalingClient {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

impl SignalingClient {
    /// Connect to a relay URL such as `ws://localhost:3000/ws`
    pub async fn connect(url: &str) -> Result<Self, SignalingError> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SignalingError::Transport(format!("Failed to connect to {}: {}", url, e)))?;
        info!("Connected to signaling relay at {}", url);
        let (sink, stream) = socket.split();
        Ok(Self { sink, stream })
    }

    /// Run the negotiation until the relay connection ends or the session fails.
    ///
    /// An initiator in `Idle` is started immediately. Candidates discovered by the
    /// local media stack are fed through `local_candidates`. The session is closed
    /// on return, releasing anything still queued.
    ///
    /// Out-of-phase messages are logged and ignored. A malformed description or
    /// candidate from the peer ends the run with `NegotiationFailure`.
    pub async fn run<B: PeerBackend>(
        mut self,
        session: &mut NegotiationSession<B>,
        mut local_candidates: mpsc::UnboundedReceiver<Value>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<(), SignalingError> {
        let result = self.drive(session, &mut local_candidates, &events).await;
        session.close();
        let _ = events.send(ClientEvent::Closed);
        let _ = self.sink.close().await;
        result
    }

    async fn drive<B: PeerBackend>(
        &mut self,
        session: &mut NegotiationSession<B>,
        local_candidates: &mut mpsc::UnboundedReceiver<Value>,
        events: &mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<(), SignalingError> {
        if session.role() == Role::Initiator && session.phase() == Phase::Idle {
            session.start()?;
        }
        self.flush(session, events).await?;

        let mut candidates_open = true;
        loop {
            let event = tokio::select! {
                next = self.stream.next() => Event::Frame(next),
                candidate = local_candidates.recv(), if candidates_open => Event::LocalCandidate(candidate),
            };

            match event {
                Event::Frame(None) => break,
                Event::Frame(Some(Err(e))) => return Err(SignalingError::Transport(e.to_string())),
                Event::Frame(Some(Ok(message))) => {
                    let text = match message {
                        Message::Text(text) => text,
                        Message::Binary(data) => match String::from_utf8(data) {
                            Ok(text) => text,
                            Err(_) => {
                                warn!("Ignoring non-UTF-8 binary frame from relay");
                                continue;
                            }
                        },
                        Message::Close(_) => {
                            info!("Relay closed the connection");
                            break;
                        }
                        _ => continue,
                    };
                    handle_inbound(session, &text, events)?;
                }
                Event::LocalCandidate(Some(candidate)) => session.add_local_candidate(candidate),
                Event::LocalCandidate(None) => candidates_open = false,
            }

            self.flush(session, events).await?;
            if session.is_closed() {
                break;
            }
        }
        Ok(())
    }

    /// Send everything the session has produced
    async fn flush<B: PeerBackend>(
        &mut self,
        session: &mut NegotiationSession<B>,
        events: &mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<(), SignalingError> {
        while let Some(output) = session.poll_output() {
            match output {
                SessionOutput::Send(message) => {
                    let json = message.to_json()?;
                    self.sink
                        .send(Message::Text(json))
                        .await
                        .map_err(|e| SignalingError::Transport(e.to_string()))?;
                }
                SessionOutput::Established => {
                    let _ = events.send(ClientEvent::Established);
                }
            }
        }
        Ok(())
    }
}

enum Event {
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    LocalCandidate(Option<Value>),
}

/// Hand one relay frame to the session. Malformed input and backend failures
/// are fatal; protocol violations are not.
fn handle_inbound<B: PeerBackend>(
    session: &mut NegotiationSession<B>,
    text: &str,
    events: &mpsc::UnboundedSender<ClientEvent>,
) -> Result<(), SignalingError> {
    let message = match SignalingParser::parse(text) {
        Ok(Some(message)) => message,
        Ok(None) => {
            if let Some(error) = relay_error(text) {
                warn!("Relay rejected a message: {}", error);
                let _ = events.send(ClientEvent::RelayError(error));
            } else {
                debug!("Ignoring unrecognized message from relay");
            }
            return Ok(());
        }
        Err(e) => {
            session.close();
            return Err(SignalingError::NegotiationFailure(format!("Malformed message from peer: {}", e)));
        }
    };

    match session.handle_message(message) {
        Ok(()) | Err(SignalingError::ProtocolViolation(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Text of a `{"error": ...}` reply, if `text` is one
fn relay_error(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("error")?.as_str().map(str::to_string)
}
