//! Probe Driver
//!
//! Periodically asks the registry to send one probe on every address of
//! interest, whatever the connection state. Addresses without a registry
//! entry are skipped by the registry itself.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::registry::ProbeRegistry;

pub struct ProbeDriver {
    registry: ProbeRegistry,
    addresses: Vec<String>,
    period: Duration,
}

impl ProbeDriver {
    pub fn new(registry: ProbeRegistry, addresses: Vec<String>, period: Duration) -> Self {
        Self {
            registry,
            addresses,
            period,
        }
    }

    /// Driver using the registry's configured probe interval
    pub fn with_config_interval(registry: ProbeRegistry, addresses: Vec<String>) -> Self {
        let period = registry.config().probe_interval;
        Self::new(registry, addresses, period)
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Request one probe per address. Returns how many were actually sent.
    pub fn tick(&self) -> usize {
        let sent = self
            .addresses
            .iter()
            .filter(|address| self.registry.send_probe(Some(address.as_str())))
            .count();
        debug!("Probe tick: {}/{} sent", sent, self.addresses.len());
        sent
    }

    /// Tick forever. The first tick happens one full period after start.
    pub async fn run(&self) {
        info!(
            "Starting probe driver ({} addresses every {:?})",
            self.addresses.len(),
            self.period
        );

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}
