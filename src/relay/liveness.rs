//! Liveness monitor
//!
//! Each sweep either probes an endpoint (clearing its liveness flag and asking
//! its writer for a transport ping) or, when the flag is still clear from the
//! previous sweep, evicts it. A pong sets the flag again via
//! [`ConnectionRegistry::mark_pong`]. An endpoint that stops answering is
//! therefore gone after at most two intervals. Eviction closes the connection.

use super::registry::{ConnectionRegistry, EndpointId};
use super::stats::RelayStats;
use crate::signaling::SignalingError;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Endpoints sent a probe
    pub probed: usize,
    /// Endpoints removed for missing the previous probe
    pub evicted: Vec<EndpointId>,
}

pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<RelayStats>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, stats: Arc<RelayStats>, interval: Duration) -> Self {
        Self {
            registry,
            stats,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single probe/evict pass over the current endpoints
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for endpoint in self.registry.snapshot() {
            let id = endpoint.id();
            if !endpoint.take_alive() {
                warn!("{}, evicting", SignalingError::UnreachablePeer(id));
                self.registry.unregister(id);
                report.evicted.push(id);
                continue;
            }
            if endpoint.request_probe() {
                report.probed += 1;
            } else {
                debug!("{} already closing, probe skipped", id);
            }
        }

        if !report.evicted.is_empty() {
            self.stats.record_evictions(report.evicted.len() as u64);
        }
        report
    }

    /// Sweep forever on the configured interval
    pub async fn run(self) {
        info!("Liveness monitor started (interval {:?})", self.interval);
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately; endpoints start out alive
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = self.sweep();
            if !report.evicted.is_empty() {
                info!(
                    "Liveness sweep: {} probed, {} evicted ({} connected)",
                    report.probed,
                    report.evicted.len(),
                    self.registry.len()
                );
            }
        }
    }
}
