//! HTTP server for WebRTC signaling
//!
//! Serves the signaling WebSocket plus health and metrics endpoints.

use crate::relay::RelayState;
use crate::transport::handle_signaling_connection;
use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Json, Router,
};
use log::info;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Build the application router
pub fn build_router(state: Arc<RelayState>) -> Router {
    let path = state.config.signaling.path.clone();
    info!("Adding signaling endpoint at {}", path);

    Router::new()
        .route(&path, get(signaling_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Bind the configured address and serve until the listener fails
pub async fn run_http_server(state: Arc<RelayState>) -> Result<(), Box<dyn std::error::Error>> {
    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Signaling server listening on ws://{}{}", addr, state.config.signaling.path);
    serve(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<RelayState>) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(state);
    axum::serve(listener, app)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    Ok(())
}

async fn signaling_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> Response {
    let max_message_bytes = state.config.signaling.max_message_bytes;
    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| handle_signaling_connection(socket, state))
}

/// Health check handler
async fn health_handler(State(state): State<Arc<RelayState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.uptime().as_secs_f64(),
        "connections": state.connection_count(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Metrics handler (Prometheus format)
async fn metrics_handler(State(state): State<Arc<RelayState>>) -> String {
    let stats = state.stats.snapshot();

    format!(
        r#"# HELP rtc_relay_uptime_seconds Server uptime in seconds
# TYPE rtc_relay_uptime_seconds counter
rtc_relay_uptime_seconds {:.2}
# HELP rtc_relay_connections Current number of connected endpoints
# TYPE rtc_relay_connections gauge
rtc_relay_connections {}
# HELP rtc_relay_connections_total Endpoints accepted since start
# TYPE rtc_relay_connections_total counter
rtc_relay_connections_total {}
# HELP rtc_relay_messages_forwarded_total Negotiation messages relayed
# TYPE rtc_relay_messages_forwarded_total counter
rtc_relay_messages_forwarded_total {}
# HELP rtc_relay_deliveries_total Frames queued to recipients
# TYPE rtc_relay_deliveries_total counter
rtc_relay_deliveries_total {}
# HELP rtc_relay_deliveries_skipped_total Recipients skipped as not writable
# TYPE rtc_relay_deliveries_skipped_total counter
rtc_relay_deliveries_skipped_total {}
# HELP rtc_relay_malformed_messages_total Messages rejected as malformed
# TYPE rtc_relay_malformed_messages_total counter
rtc_relay_malformed_messages_total {}
# HELP rtc_relay_ignored_messages_total Messages of unknown kind dropped
# TYPE rtc_relay_ignored_messages_total counter
rtc_relay_ignored_messages_total {}
# HELP rtc_relay_evictions_total Endpoints evicted by the liveness monitor
# TYPE rtc_relay_evictions_total counter
rtc_relay_evictions_total {}
"#,
        state.uptime().as_secs_f64(),
        state.connection_count(),
        stats.connections_total,
        stats.messages_forwarded,
        stats.deliveries,
        stats.deliveries_skipped,
        stats.malformed_messages,
        stats.ignored_messages,
        stats.evictions,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use futures::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpSocket;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;
    use tower::ServiceExt;

    async fn get(state: Arc<RelayState>, uri: &str) -> (StatusCode, String) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = Arc::new(RelayState::new(Config::default()));
        let (status, body) = get(state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["connections"], 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = Arc::new(RelayState::new(Config::default()));
        state.stats.record_malformed();
        let (status, body) = get(state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("rtc_relay_malformed_messages_total 1"));
        assert!(body.contains("rtc_relay_connections 0"));
    }

    async fn spawn_server(config: Config) -> (Arc<RelayState>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(RelayState::new(config));
        let server_state = state.clone();
        tokio::spawn(async move {
            let _ = serve(listener, server_state).await;
        });
        (state, addr)
    }

    fn ws_url(addr: SocketAddr) -> String {
        format!("ws://{}/ws", addr)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn wait_for_connections(state: &RelayState, count: usize) {
        wait_until(|| state.connection_count() == count).await;
    }

    /// Read until the server ends the connection
    async fn read_until_closed<S>(stream: &mut S)
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(Ok(_)) = stream.next().await {}
        })
        .await;
        assert!(drained.is_ok(), "connection was not closed by the relay");
    }

    #[tokio::test]
    async fn test_malformed_message_over_socket() {
        let (state, addr) = spawn_server(Config::default()).await;
        let (mut a, _) = tokio_tungstenite::connect_async(ws_url(addr)).await.unwrap();
        let (mut b, _) = tokio_tungstenite::connect_async(ws_url(addr)).await.unwrap();
        wait_for_connections(&state, 2).await;

        a.send(Message::Text("definitely not json".into())).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), a.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(reply, Message::Text(r#"{"error":"Invalid message format"}"#.into()));

        let offer = r#"{"offer":{"sdp":"v=0...","type":"offer"}}"#;
        a.send(Message::Text(offer.into())).await.unwrap();
        // the first thing b sees is the offer, not the error
        let forwarded = tokio::time::timeout(Duration::from_secs(2), b.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(forwarded, Message::Text(offer.into()));
        assert_eq!(state.stats.snapshot().malformed_messages, 1);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_endpoint() {
        let (state, addr) = spawn_server(Config::default()).await;
        let (mut a, _) = tokio_tungstenite::connect_async(ws_url(addr)).await.unwrap();
        wait_for_connections(&state, 1).await;

        a.close(None).await.unwrap();
        wait_for_connections(&state, 0).await;
    }

    #[tokio::test]
    async fn test_unresponsive_endpoint_is_evicted() {
        let (state, addr) = spawn_server(Config::default()).await;
        // not polled until after eviction, so pings go unanswered
        let (mut silent, _) = tokio_tungstenite::connect_async(ws_url(addr)).await.unwrap();
        wait_for_connections(&state, 1).await;

        let monitor = state.liveness_monitor();
        monitor.sweep();
        let report = monitor.sweep();
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(state.connection_count(), 0);

        read_until_closed(&mut silent).await;
    }

    #[tokio::test]
    async fn test_polled_client_answers_probes() {
        let (state, addr) = spawn_server(Config::default()).await;
        let (client, _) = tokio_tungstenite::connect_async(ws_url(addr)).await.unwrap();
        // reading lets the client answer pings on its own
        let (_sink, mut stream) = client.split();
        let reader = tokio::spawn(async move { while let Some(Ok(_)) = stream.next().await {} });
        wait_for_connections(&state, 1).await;

        let endpoint = state.registry.snapshot().pop().unwrap();
        let connected_pong = endpoint.last_pong();
        let monitor = state.liveness_monitor();
        for _ in 0..4 {
            let report = monitor.sweep();
            assert_eq!(report.probed, 1);
            assert!(report.evicted.is_empty());
            wait_until(|| endpoint.is_alive()).await;
        }

        assert!(endpoint.last_pong() > connected_pong);
        assert_eq!(state.connection_count(), 1);
        assert_eq!(state.stats.snapshot().evictions, 0);
        reader.abort();
    }

    #[tokio::test]
    async fn test_evicted_stalled_endpoint_is_cut_off() {
        let (state, addr) = spawn_server(Config::default()).await;

        // tiny receive window and never read: the relay's writer blocks on it
        let socket = TcpSocket::new_v4().unwrap();
        socket.set_recv_buffer_size(4096).unwrap();
        let stream = socket.connect(addr).await.unwrap();
        let (mut stalled, _) = tokio_tungstenite::client_async(ws_url(addr), stream).await.unwrap();
        wait_for_connections(&state, 1).await;

        let (observer, _) = tokio_tungstenite::connect_async(ws_url(addr)).await.unwrap();
        let (mut observer_tx, mut observer_rx) = observer.split();
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(Ok(message)) = observer_rx.next().await {
                if let Message::Text(text) = message {
                    let _ = seen_tx.send(text);
                }
            }
        });
        wait_for_connections(&state, 2).await;

        let offer = json!({ "offer": { "sdp": "a".repeat(60_000), "type": "offer" } }).to_string();
        for _ in 0..300 {
            observer_tx.send(Message::Text(offer.clone())).await.unwrap();
        }
        wait_until(|| state.stats.snapshot().messages_forwarded == 300).await;

        let monitor = state.liveness_monitor();
        assert_eq!(monitor.sweep().probed, 2);
        // only the observer answers
        wait_until(|| state.registry.snapshot().iter().filter(|e| e.is_alive()).count() == 1).await;
        let report = monitor.sweep();
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(state.connection_count(), 1);

        let late = r#"{"candidate":{"candidate":"candidate:9 1 udp 1 10.0.0.9 9 typ host"}}"#;
        let _ = tokio::time::timeout(Duration::from_secs(1), stalled.send(Message::Text(late.into()))).await;
        assert!(tokio::time::timeout(Duration::from_millis(500), seen.recv()).await.is_err());

        read_until_closed(&mut stalled).await;
        assert_eq!(state.connection_count(), 1);
    }
}
