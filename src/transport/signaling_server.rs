//! Signaling WebSocket connection handler
//!
//! Each connection is registered with the relay and served by two halves:
//! - a writer task sending requested pings ahead of the endpoint's bounded
//!   outbound queue
//! - the reader loop below, which feeds inbound frames to the router in
//!   receipt order and records pongs
//!
//! When the endpoint is closed (eviction or disconnect) the reader loop stops
//! at once. The writer gets a short grace period to send a Close frame and is
//! aborted if it is stuck on a peer that stopped reading. Dropping both halves
//! closes the socket.

use crate::relay::{Endpoint, Outbound, Payload, RelayState};
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a closing writer may take to flush its Close frame
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Handle a signaling WebSocket connection until either side closes it
pub async fn handle_signaling_connection(socket: WebSocket, state: Arc<RelayState>) {
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Outbound>(state.config.signaling.outbound_queue);
    let endpoint = state.registry.register_endpoint(tx);
    let endpoint_id = endpoint.id();
    state.stats.record_connection();
    info!("{} connected ({} connected)", endpoint_id, state.connection_count());

    // Spawn task to forward pings and queued frames to the WebSocket
    let mut send_task = tokio::spawn(write_frames(endpoint.clone(), rx, ws_sender));

    loop {
        tokio::select! {
            _ = endpoint.closed() => {
                info!("{} closed by relay", endpoint_id);
                break;
            }
            _ = &mut send_task => {
                debug!("{} writer finished", endpoint_id);
                break;
            }
            next = ws_receiver.next() => {
                let Some(result) = next else {
                    break;
                };
                match result {
                    Ok(Message::Text(text)) => {
                        state.router.on_message(endpoint_id, Payload::Text(text.as_str().to_owned()));
                    }
                    Ok(Message::Binary(data)) => {
                        state.router.on_message(endpoint_id, Payload::Binary(data));
                    }
                    Ok(Message::Pong(_)) => {
                        state.registry.mark_pong(endpoint_id);
                    }
                    Ok(Message::Ping(_)) => {
                        debug!("Received ping from {}", endpoint_id);
                    }
                    Ok(Message::Close(_)) => {
                        info!("{} sent close", endpoint_id);
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error on {}: {}", endpoint_id, e);
                        break;
                    }
                }
            }
        }
    }

    state.registry.unregister(endpoint_id);
    endpoint.close();
    if !send_task.is_finished() && tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
        warn!("{} writer stalled, dropping connection", endpoint_id);
        send_task.abort();
    }
    info!("{} disconnected ({} connected)", endpoint_id, state.connection_count());
}

/// Writer half: pings first, then queued frames, then a Close frame on shutdown
async fn write_frames(
    endpoint: Arc<Endpoint>,
    mut rx: mpsc::Receiver<Outbound>,
    mut ws_sender: SplitSink<WebSocket, Message>,
) {
    loop {
        if endpoint.take_probe_request() {
            if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                return;
            }
            continue;
        }

        let frame = tokio::select! {
            biased;
            _ = endpoint.closed() => break,
            _ = endpoint.probe_requested() => continue,
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        let message = match frame {
            Outbound::Text(text) => Message::Text(text.into()),
            Outbound::Binary(data) => Message::Binary(data),
        };
        if ws_sender.send(message).await.is_err() {
            return;
        }
    }
    let _ = ws_sender.send(Message::Close(None)).await;
}
