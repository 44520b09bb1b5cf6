//! Signaling relay
//!
//! Server-side half: connection registry, liveness monitor and the router that
//! fans negotiation messages out to the other endpoints.

pub mod liveness;
pub mod registry;
pub mod router;
pub mod stats;

pub use liveness::{LivenessMonitor, SweepReport};
pub use registry::{ConnectionRegistry, Delivery, Endpoint, EndpointId, Outbound};
pub use router::{Payload, RelayRouter, RouteOutcome};
pub use stats::{RelayStats, StatsSnapshot};

use crate::config::Config;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared relay state handed to every connection
pub struct RelayState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: RelayRouter,
    pub stats: Arc<RelayStats>,
    pub start_time: Instant,
}

impl RelayState {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(RelayStats::default());
        Self {
            config: Arc::new(config),
            router: RelayRouter::new(registry.clone(), stats.clone()),
            registry,
            stats,
            start_time: Instant::now(),
        }
    }

    /// Liveness monitor over this state's registry
    pub fn liveness_monitor(&self) -> LivenessMonitor {
        LivenessMonitor::new(
            self.registry.clone(),
            self.stats.clone(),
            Duration::from_secs(self.config.liveness.ping_interval_secs),
        )
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}
