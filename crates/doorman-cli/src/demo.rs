//! Simulated SyncUnits for the demo binary.
//!
//! Each unit sleeps for a short latency, fails when the simulated network is
//! down and otherwise fails at random with a transient "remote" error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use doorman_core::impls::NetworkMonitor;
use doorman_core::ports::Connectivity;
use doorman_core::{SyncError, SyncUnit, SyncUnits};
use tokio::time::sleep;
use tracing::debug;

pub struct SimulatedUnit {
    name: &'static str,
    latency: Duration,
    failure_rate: f64,
    network: Arc<NetworkMonitor>,
}

impl SimulatedUnit {
    fn new(name: &'static str, failure_rate: f64, network: &Arc<NetworkMonitor>) -> Arc<Self> {
        Arc::new(Self {
            name,
            latency: Duration::from_millis(200),
            failure_rate,
            network: Arc::clone(network),
        })
    }
}

#[async_trait]
impl SyncUnit for SimulatedUnit {
    fn name(&self) -> &str {
        self.name
    }

    async fn sync(&self) -> Result<(), SyncError> {
        sleep(self.latency).await;
        if !self.network.is_online() {
            return Err(SyncError::transient("network unreachable"));
        }
        if rand::random::<f64>() < self.failure_rate {
            return Err(SyncError::transient("remote returned 503"));
        }
        debug!(unit = self.name, "synced");
        Ok(())
    }
}

pub fn simulated_units(failure_rate: f64, network: &Arc<NetworkMonitor>) -> SyncUnits {
    SyncUnits {
        directory: SimulatedUnit::new("directory", failure_rate, network),
        amenities: SimulatedUnit::new("amenities", failure_rate, network),
        home: SimulatedUnit::new("home", failure_rate, network),
        vacancy: SimulatedUnit::new("vacancy", failure_rate, network),
        pending_requests: SimulatedUnit::new("pending_requests", failure_rate, network),
        pending_logs: SimulatedUnit::new("pending_logs", failure_rate, network),
    }
}
