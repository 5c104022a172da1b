//! Connection Registry
//!
//! Maps each remote address to at most one live [`ProbeConnection`] and is the
//! only entry point subscribers use. The map lock is never held while calling
//! into a connection, so callbacks are free to use the registry. Cancelling
//! another address from a callback waits for that address's running callback.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::config::ProbeConfig;
use super::connection::{ConnectionState, LatencyCallback, ProbeConnection, ProbeContext};
use super::metrics::ProbeMetrics;
use super::transport::{ProbeTransport, WsTransport};

/// Address-keyed table of probe connections. Clones share the same table.
#[derive(Clone)]
pub struct ProbeRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    ctx: ProbeContext,
    connections: Mutex<HashMap<String, ProbeConnection>>,
}

impl ProbeRegistry {
    /// Registry over WebSocket links.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(config: ProbeConfig) -> Self {
        Self::with_transport(config, Arc::new(WsTransport))
    }

    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn with_transport(config: ProbeConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                ctx: ProbeContext::new(config, transport),
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.inner.ctx.config
    }

    pub fn metrics(&self) -> Arc<ProbeMetrics> {
        self.inner.ctx.metrics.clone()
    }

    /// Register interest in `address`.
    ///
    /// A new connection is created and started for the address. If one
    /// already exists it is replaced by a fresh, not yet connected connection
    /// bound to `on_result`, and the old one is disconnected (its window and
    /// in-flight probes are discarded). A missing or empty address reports `None`
    /// immediately and yields a no-op handle.
    pub fn subscribe<F>(&self, address: Option<&str>, on_result: F) -> CancelHandle
    where
        F: Fn(Option<u64>) + Send + Sync + 'static,
    {
        let Some(address) = address.filter(|a| !a.is_empty()) else {
            on_result(None);
            return CancelHandle::noop();
        };

        let callback: LatencyCallback = Arc::new(on_result);
        let conn = ProbeConnection::new(address, callback, self.inner.ctx.clone());

        let replaced = self
            .inner
            .connections
            .lock()
            .insert(address.to_string(), conn.clone());

        match replaced {
            // The replacement starts disconnected; the next probe request connects it
            Some(old) => {
                info!("Rebinding probe subscription for {}", address);
                old.retire();
            }
            None => {
                info!("New probe subscription for {}", address);
                conn.connect();
            }
        }

        CancelHandle {
            registry: Arc::downgrade(&self.inner),
            address: Some(address.to_string()),
        }
    }

    /// Ask the connection for `address` to send one probe.
    ///
    /// Returns false, without creating anything, when the address has no
    /// entry. A registered but disconnected entry starts reconnecting and
    /// also returns false.
    pub fn send_probe(&self, address: Option<&str>) -> bool {
        let Some(address) = address.filter(|a| !a.is_empty()) else {
            return false;
        };
        let conn = self.inner.connections.lock().get(address).cloned();
        match conn {
            Some(conn) => conn.send_probe(),
            None => false,
        }
    }

    /// Disconnect and forget the entry for `address`, if any
    pub fn cancel(&self, address: &str) {
        self.inner.cancel(address);
    }

    /// Single-shot measurement with the configured ceiling
    pub async fn measure_once(&self, address: Option<&str>) -> Option<u64> {
        let ceiling = self.inner.ctx.config.measure_timeout;
        self.measure_once_within(address, ceiling).await
    }

    /// Resolve with the first value reported for `address`, or `None` once
    /// `ceiling` elapses. The subscription is left registered for reuse.
    pub async fn measure_once_within(&self, address: Option<&str>, ceiling: Duration) -> Option<u64> {
        let address = address.filter(|a| !a.is_empty())?;

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let _handle = self.subscribe(Some(address), move |value| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(value);
            }
        });

        match tokio::time::timeout(ceiling, rx).await {
            Ok(Ok(value)) => value,
            _ => {
                debug!("No measurement for {} within {:?}", address, ceiling);
                None
            }
        }
    }

    pub fn state(&self, address: &str) -> Option<ConnectionState> {
        let conn = self.inner.connections.lock().get(address).cloned();
        conn.map(|c| c.state())
    }

    pub fn connection(&self, address: &str) -> Option<ProbeConnection> {
        self.inner.connections.lock().get(address).cloned()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.inner.connections.lock().contains_key(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.inner.connections.lock().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.inner.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disconnect and remove every entry
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl RegistryInner {
    fn cancel(&self, address: &str) {
        let removed = self.connections.lock().remove(address);
        if let Some(conn) = removed {
            info!("Cancelled probe subscription for {}", address);
            conn.retire();
            self.ctx.metrics.forget_latency(address);
        }
    }

    fn shutdown(&self) {
        let drained: Vec<ProbeConnection> = self.connections.lock().drain().map(|(_, c)| c).collect();
        if !drained.is_empty() {
            info!("Shutting down {} probe connections", drained.len());
        }
        for conn in drained {
            conn.retire();
            self.ctx.metrics.forget_latency(conn.address());
        }
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Returned by [`ProbeRegistry::subscribe`]. Dropping it does nothing;
/// call [`CancelHandle::cancel`] to end the subscription.
#[must_use = "dropping the handle leaves the subscription running"]
#[derive(Debug, Clone)]
pub struct CancelHandle {
    registry: Weak<RegistryInner>,
    address: Option<String>,
}

impl CancelHandle {
    fn noop() -> Self {
        Self {
            registry: Weak::new(),
            address: None,
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Disconnect whatever connection is currently registered for this
    /// handle's address and remove it. No callback fires afterwards.
    pub fn cancel(self) {
        if let (Some(registry), Some(address)) = (self.registry.upgrade(), self.address) {
            registry.cancel(&address);
        }
    }
}

impl std::fmt::Debug for RegistryInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("connections", &self.connections.lock().len())
            .finish()
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}
