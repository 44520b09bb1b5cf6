//! Connection registry
//!
//! Owns every connected endpoint. Fan-out iterates over a snapshot taken under
//! a short read lock, so endpoints may register or disconnect while a broadcast
//! is in flight without disturbing it.
//!
//! Liveness probes and the close signal bypass the outbound data queue: a full
//! queue neither delays a probe nor keeps an evicted socket open.

use bytes::Bytes;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};

/// Unique identifier assigned to an endpoint on connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

/// Frame queued for an endpoint's socket writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
}

/// Result of handing a frame to an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Outbound queue is full; the frame was skipped
    NotWritable,
    /// Endpoint is unknown or its writer has gone away
    Gone,
}

/// A connected endpoint
pub struct Endpoint {
    id: EndpointId,
    alive: AtomicBool,
    last_pong: Mutex<Instant>,
    connected_at: Instant,
    outbound: mpsc::Sender<Outbound>,
    ping_requested: AtomicBool,
    probe: Notify,
    closed: watch::Sender<bool>,
}

impl Endpoint {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Whether the endpoint answered the last liveness probe
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn last_pong(&self) -> Instant {
        *self.last_pong.lock()
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Queue a frame without waiting
    pub fn try_send(&self, frame: Outbound) -> Delivery {
        match self.outbound.try_send(frame) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::NotWritable,
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    /// Clear the liveness flag, returning its previous value
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Ask the socket writer to send a transport ping ahead of queued data.
    /// Returns false once the endpoint is closed.
    pub fn request_probe(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.ping_requested.store(true, Ordering::Release);
        self.probe.notify_one();
        true
    }

    /// Consume a pending probe request
    pub fn take_probe_request(&self) -> bool {
        self.ping_requested.swap(false, Ordering::AcqRel)
    }

    /// Wait until a probe may have been requested
    pub async fn probe_requested(&self) {
        self.probe.notified().await
    }

    /// Signal the connection to shut down; idempotent
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!("{} closing", self.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once [`Endpoint::close`] has been called
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn mark_pong(&self) {
        *self.last_pong.lock() = Instant::now();
        self.alive.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .field("closed", &self.is_closed())
            .field("connected_for", &self.connected_at.elapsed())
            .finish()
    }
}

/// Set of currently connected endpoints
#[derive(Default)]
pub struct ConnectionRegistry {
    endpoints: RwLock<HashMap<EndpointId, Arc<Endpoint>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint whose socket writer drains `outbound`
    pub fn register(&self, outbound: mpsc::Sender<Outbound>) -> EndpointId {
        self.register_endpoint(outbound).id
    }

    /// Like [`ConnectionRegistry::register`], returning the endpoint handle the
    /// connection task waits on for probes and close
    pub fn register_endpoint(&self, outbound: mpsc::Sender<Outbound>) -> Arc<Endpoint> {
        let id = EndpointId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let now = Instant::now();
        let (closed, _) = watch::channel(false);
        let endpoint = Arc::new(Endpoint {
            id,
            alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            connected_at: now,
            outbound,
            ping_requested: AtomicBool::new(false),
            probe: Notify::new(),
            closed,
        });
        self.endpoints.write().insert(id, endpoint.clone());
        debug!("Registered {}", id);
        endpoint
    }

    /// Remove an endpoint and signal its connection to close. Returns false if
    /// it was already gone.
    pub fn unregister(&self, id: EndpointId) -> bool {
        let removed = self.endpoints.write().remove(&id);
        match removed {
            Some(endpoint) => {
                endpoint.close();
                debug!("Unregistered {}", id);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: EndpointId) -> bool {
        self.endpoints.read().contains_key(&id)
    }

    /// Record a probe acknowledgment; unknown ids are ignored
    pub fn mark_pong(&self, id: EndpointId) {
        if let Some(endpoint) = self.get(id) {
            endpoint.mark_pong();
        }
    }

    pub fn get(&self, id: EndpointId) -> Option<Arc<Endpoint>> {
        self.endpoints.read().get(&id).cloned()
    }

    /// Stable copy of the current endpoint set
    pub fn snapshot(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.read().values().cloned().collect()
    }

    /// Call `f` once for every endpoint other than `excluding`
    pub fn for_each_other<F>(&self, excluding: EndpointId, mut f: F)
    where
        F: FnMut(&Endpoint),
    {
        for endpoint in self.snapshot() {
            if endpoint.id != excluding {
                f(&endpoint);
            }
        }
    }

    /// Queue a frame for one endpoint
    pub fn send_to(&self, id: EndpointId, frame: Outbound) -> Delivery {
        match self.get(id) {
            Some(endpoint) => endpoint.try_send(frame),
            None => Delivery::Gone,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn channel() -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        mpsc::channel(8)
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let a = registry.register(tx.clone());
        let b = registry.register(tx);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(a).unwrap().is_alive());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let id = registry.register(tx);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mark_pong_restores_liveness() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let id = registry.register(tx);
        let endpoint = registry.get(id).unwrap();
        let before = endpoint.last_pong();

        assert!(endpoint.take_alive());
        assert!(!endpoint.is_alive());
        registry.mark_pong(id);
        assert!(endpoint.is_alive());
        assert!(endpoint.last_pong() >= before);

        registry.unregister(id);
        registry.mark_pong(id);
    }

    #[test]
    fn test_probe_request_ignores_full_queue() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let endpoint = registry.register_endpoint(tx);
        assert_eq!(endpoint.try_send(Outbound::Text("{}".to_string())), Delivery::Sent);

        assert!(endpoint.request_probe());
        assert!(endpoint.take_probe_request());
        assert!(!endpoint.take_probe_request());
    }

    #[tokio::test]
    async fn test_unregister_signals_close() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let endpoint = registry.register_endpoint(tx);
        assert!(registry.contains(endpoint.id()));
        assert!(!endpoint.is_closed());

        let waiter = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.closed().await })
        };
        registry.unregister(endpoint.id());
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        assert!(endpoint.is_closed());
        assert!(!registry.contains(endpoint.id()));
        assert!(!endpoint.request_probe());
        // a late waiter resolves immediately
        endpoint.closed().await;
    }

    #[test]
    fn test_for_each_other_skips_sender() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let ids: Vec<_> = (0..4).map(|_| registry.register(tx.clone())).collect();

        let mut seen = Vec::new();
        registry.for_each_other(ids[1], |endpoint| seen.push(endpoint.id()));
        seen.sort();
        assert_eq!(seen, vec![ids[0], ids[2], ids[3]]);
    }

    #[test]
    fn test_send_to_reports_delivery() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        let id = registry.register(tx);

        let frame = || Outbound::Text("{}".to_string());
        assert_eq!(registry.send_to(id, frame()), Delivery::Sent);
        assert_eq!(registry.send_to(id, frame()), Delivery::NotWritable);
        assert_eq!(rx.try_recv().unwrap(), frame());

        drop(rx);
        assert_eq!(registry.send_to(id, frame()), Delivery::Gone);
        registry.unregister(id);
        assert_eq!(registry.send_to(id, frame()), Delivery::Gone);
    }

    #[test]
    fn test_fan_out_during_concurrent_mutation() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, _rx) = mpsc::channel(1);
        let stable: Vec<_> = (0..8).map(|_| registry.register(tx.clone())).collect();

        let churn = {
            let registry = registry.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let id = registry.register(tx.clone());
                    registry.unregister(id);
                }
            })
        };

        for _ in 0..2_000 {
            let mut seen = HashSet::new();
            let mut visits = 0;
            registry.for_each_other(stable[0], |endpoint| {
                visits += 1;
                seen.insert(endpoint.id());
            });
            // no endpoint visited twice, every stable one visited
            assert_eq!(visits, seen.len());
            assert!(stable[1..].iter().all(|id| seen.contains(id)));
            assert!(!seen.contains(&stable[0]));
        }

        churn.join().unwrap();
        assert_eq!(registry.len(), stable.len());
    }
}
