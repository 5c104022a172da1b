//! Probe Connection
//!
//! One persistent link to one remote address. Probes are paired with echoes
//! in the order they were sent; once enough round trips have been observed,
//! the rounded mean of the recent window is reported to the bound callback.
//!
//! State machine:
//! - `Disconnected` --connect()--> `Connecting` (deadline armed)
//! - `Connecting` --open--> `Connected` (deadline cleared, one probe sent)
//! - `Connecting` --deadline/error--> `Disconnected` (callback gets `None`)
//! - `Connected` --error/close--> `Disconnected` (callback gets `None`)
//!
//! Nothing reconnects on its own: a later `send_probe()` on a disconnected
//! connection starts a new attempt.
//!
//! Locking: state sits behind a plain mutex that is never held while user
//! code runs. The callback runs under a separate reentrant gate, which only
//! `disconnect()` waits on, so `connect()` and `send_probe()` never block on a
//! running callback.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::config::ProbeConfig;
use super::metrics::ProbeMetrics;
use super::transport::{ProbeFailure, ProbeLink, ProbeTransport};
use super::window::MeasurementWindow;

/// Receives a smoothed latency in milliseconds, or `None` when unavailable
pub type LatencyCallback = Arc<dyn Fn(Option<u64>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything a connection needs besides its address and callback
#[derive(Clone)]
pub struct ProbeContext {
    pub config: Arc<ProbeConfig>,
    pub transport: Arc<dyn ProbeTransport>,
    pub metrics: Arc<ProbeMetrics>,
    pub runtime: Handle,
}

impl ProbeContext {
    /// Captures the current runtime so connections can be started from any
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(config: ProbeConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            metrics: Arc::new(ProbeMetrics::new()),
            runtime: Handle::current(),
        }
    }
}

/// Counters for one connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub attempts: u64,
    pub probes_sent: u64,
    pub echoes_received: u64,
    pub pending: usize,
    pub window_len: usize,
}

/// Handle to a probe connection. Clones share the same connection.
#[derive(Clone)]
pub struct ProbeConnection {
    shared: Arc<Shared>,
}

struct Shared {
    address: String,
    url: String,
    ctx: ProbeContext,
    callback: LatencyCallback,
    inner: Mutex<Inner>,
    // Held while the callback runs; reentrant so a callback may disconnect its own connection
    gate: ReentrantMutex<()>,
}

struct Inner {
    state: ConnectionState,
    /// Bumped on every attempt and on disconnect; stale tasks compare against it
    attempt: u64,
    /// Bumped on disconnect; a result is delivered only if this is unchanged
    epoch: u64,
    /// Set once the owner discards this connection
    retired: bool,
    pending: VecDeque<Instant>,
    window: MeasurementWindow,
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    stats: ConnectionStats,
}

impl ProbeConnection {
    pub fn new(address: impl Into<String>, callback: LatencyCallback, ctx: ProbeContext) -> Self {
        let address = address.into();
        let url = ctx.config.url_for(&address);
        let window = MeasurementWindow::new(ctx.config.window_capacity, ctx.config.min_samples);

        Self {
            shared: Arc::new(Shared {
                address,
                url,
                ctx,
                callback,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    attempt: 0,
                    epoch: 0,
                    retired: false,
                    pending: VecDeque::new(),
                    window,
                    outbound: None,
                    shutdown: None,
                    stats: ConnectionStats::default(),
                }),
                gate: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn stats(&self) -> ConnectionStats {
        let inner = self.shared.inner.lock();
        ConnectionStats {
            pending: inner.pending.len(),
            window_len: inner.window.len(),
            ..inner.stats
        }
    }

    /// True when both handles refer to the same connection
    pub fn same_as(&self, other: &ProbeConnection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Start a connection attempt. No-op unless `Disconnected`.
    pub fn connect(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.state != ConnectionState::Disconnected || inner.retired {
            return;
        }

        inner.state = ConnectionState::Connecting;
        inner.attempt += 1;
        inner.stats.attempts += 1;
        let attempt = inner.attempt;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        inner.outbound = Some(outbound_tx);
        inner.shutdown = Some(shutdown_tx);

        self.shared.ctx.metrics.record_connect_attempt(&self.shared.address);
        info!("Connecting to {} (attempt {})", self.shared.url, attempt);

        self.shared.ctx.runtime.spawn(run_attempt(
            Arc::clone(&self.shared),
            attempt,
            outbound_rx,
            shutdown_rx,
        ));
    }

    /// Send one probe if connected.
    ///
    /// Returns false when nothing was sent. A disconnected connection starts
    /// a new attempt as a side effect; the probe itself is not queued.
    pub fn send_probe(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        let state = inner.state;
        match state {
            ConnectionState::Connected => self.shared.transmit(&mut inner),
            ConnectionState::Connecting => false,
            ConnectionState::Disconnected => {
                drop(inner);
                self.connect();
                false
            }
        }
    }

    /// Close the link, cancel any pending deadline and drop all measurement
    /// state. Idempotent. Waits for a callback running on another thread;
    /// once this returns the callback will not be invoked for anything that
    /// happened before.
    pub fn disconnect(&self) {
        let _gate = self.shared.gate.lock();
        let mut inner = self.shared.inner.lock();

        let was = inner.state;
        inner.attempt += 1;
        inner.epoch += 1;
        inner.state = ConnectionState::Disconnected;
        inner.outbound = None;
        // Dropping the sender tells the task to close the link
        inner.shutdown = None;
        inner.pending.clear();
        inner.window.clear();

        if was != ConnectionState::Disconnected {
            info!("Disconnected from {}", self.shared.url);
        }
    }

    /// Disconnect and refuse any future attempt
    pub(crate) fn retire(&self) {
        self.shared.inner.lock().retired = true;
        self.disconnect();
    }
}

impl std::fmt::Debug for ProbeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeConnection")
            .field("address", &self.shared.address)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn transmit(&self, inner: &mut Inner) -> bool {
        let Some(outbound) = inner.outbound.as_ref() else {
            return false;
        };
        if outbound.send(self.ctx.config.payload.clone()).is_err() {
            return false;
        }
        inner.pending.push_back(Instant::now());
        inner.stats.probes_sent += 1;
        self.ctx.metrics.record_probe_sent(&self.address);
        debug!("Probe #{} -> {}", inner.stats.probes_sent, self.address);
        true
    }

    fn on_open(&self, attempt: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.attempt != attempt || inner.state != ConnectionState::Connecting {
            return false;
        }

        inner.state = ConnectionState::Connected;
        self.ctx.metrics.record_open(&self.address);
        info!("Connected to {}", self.url);

        self.transmit(&mut inner);
        true
    }

    fn on_echo(&self, attempt: u64) {
        let (latency, epoch) = {
            let mut inner = self.inner.lock();
            if inner.attempt != attempt {
                return;
            }
            let Some(sent_at) = inner.pending.pop_front() else {
                debug!("Unpaired message from {}, ignoring", self.address);
                return;
            };

            let rtt_ms = sent_at.elapsed().as_secs_f64() * 1_000.0;
            inner.window.push(rtt_ms);
            inner.stats.echoes_received += 1;
            self.ctx.metrics.record_echo(&self.address, rtt_ms);
            debug!("Echo from {} rtt={:.2}ms", self.address, rtt_ms);

            match inner.window.smoothed() {
                Some(latency) => (latency, inner.epoch),
                None => return,
            }
        };

        self.deliver(epoch, Some(latency));
    }

    fn on_failure(&self, attempt: u64, failure: ProbeFailure) {
        let epoch = {
            let mut inner = self.inner.lock();
            if inner.attempt != attempt || inner.state == ConnectionState::Disconnected {
                return;
            }

            inner.state = ConnectionState::Disconnected;
            inner.outbound = None;
            inner.shutdown = None;
            // Unanswered probes can never be paired on a new link
            inner.pending.clear();
            inner.epoch
        };

        warn!("Probe connection to {} failed: {}", self.url, failure);
        self.ctx.metrics.record_failure(&self.address, failure.kind());
        self.deliver(epoch, None);
    }

    /// Invoke the callback under the gate, unless a disconnect got in first
    fn deliver(&self, epoch: u64, value: Option<u64>) {
        let _gate = self.gate.lock();
        if self.inner.lock().epoch != epoch {
            debug!("Dropping result for {} after disconnect", self.address);
            return;
        }
        if let Some(latency) = value {
            self.ctx.metrics.record_latency(&self.address, latency);
        }
        (self.callback)(value);
    }
}

/// Drive one connection attempt: open under the deadline, then pump probes
/// out and echoes in until the link fails or shutdown is signalled.
async fn run_attempt(
    shared: Arc<Shared>,
    attempt: u64,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let deadline = shared.ctx.config.connect_timeout;

    let opened = tokio::select! {
        result = time::timeout(deadline, shared.ctx.transport.open(&shared.url)) => result,
        _ = &mut shutdown => return,
    };

    let ProbeLink { mut sink, mut echoes } = match opened {
        Ok(Ok(link)) => link,
        Ok(Err(e)) => {
            shared.on_failure(attempt, ProbeFailure::Network(format!("{:#}", e)));
            return;
        }
        Err(_) => {
            shared.on_failure(attempt, ProbeFailure::Timeout(deadline));
            return;
        }
    };

    if !shared.on_open(attempt) {
        let _ = sink.close().await;
        return;
    }

    let failure = loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sink.close().await;
                return;
            }
            Some(payload) = outbound.recv() => {
                if let Err(e) = sink.send(payload).await {
                    break ProbeFailure::UnexpectedClose(format!("{:#}", e));
                }
            }
            echo = echoes.next() => match echo {
                Some(Ok(())) => shared.on_echo(attempt),
                Some(Err(e)) => break ProbeFailure::UnexpectedClose(format!("{:#}", e)),
                None => break ProbeFailure::UnexpectedClose("closed by peer".into()),
            },
        }
    };

    shared.on_failure(attempt, failure);
}
