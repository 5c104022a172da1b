//! Probe transport
//!
//! A transport opens one full-duplex link to a remote address. The probe
//! engine only needs two things from it: a sink that accepts probe payloads
//! and a stream that yields one item per inbound message. Reply content is
//! never inspected.

use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

/// Outbound half of a link: accepts probe payloads
pub type ProbeSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;

/// Inbound half of a link: one `Ok(())` per echo, ends when the peer closes
pub type EchoStream = Pin<Box<dyn Stream<Item = Result<()>> + Send>>;

/// An open link to a remote address
pub struct ProbeLink {
    pub sink: ProbeSink,
    pub echoes: EchoStream,
}

#[async_trait]
pub trait ProbeTransport: Send + Sync + 'static {
    /// Open a link to `url`. Resolves once the link is usable.
    async fn open(&self, url: &str) -> Result<ProbeLink>;
}

/// WebSocket transport (tokio-tungstenite, rustls)
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl ProbeTransport for WsTransport {
    async fn open(&self, url: &str) -> Result<ProbeLink> {
        let request = url
            .into_client_request()
            .context("Failed to build websocket request")?;

        let (ws_stream, response) = connect_async(request)
            .await
            .context("Failed to connect to WebSocket")?;

        debug!("WebSocket {} open (status: {})", url, response.status());

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(anyhow::Error::from)
            .with(|payload: String| future::ready(Ok::<_, anyhow::Error>(Message::Text(payload))));

        // Control frames are handled by tungstenite; only data frames count as echoes
        let echoes = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(_)) | Ok(Message::Binary(_)) => Some(Ok(())),
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::from(e))),
            })
        });

        Ok(ProbeLink {
            sink: Box::pin(sink),
            echoes: Box::pin(echoes),
        })
    }
}

/// Why a connection attempt or an open connection was lost.
///
/// Callers never see this directly: every variant is reported to the
/// subscriber as "latency unavailable".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// Refused, unreachable, or handshake error while connecting
    Network(String),
    /// Connection did not open before the deadline
    Timeout(Duration),
    /// Error or close after the connection was open
    UnexpectedClose(String),
}

impl ProbeFailure {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeFailure::Network(_) => "network",
            ProbeFailure::Timeout(_) => "timeout",
            ProbeFailure::UnexpectedClose(_) => "closed",
        }
    }
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::Network(reason) => write!(f, "connection failed: {}", reason),
            ProbeFailure::Timeout(after) => {
                write!(f, "connection not open after {}ms", after.as_millis())
            }
            ProbeFailure::UnexpectedClose(reason) => write!(f, "connection lost: {}", reason),
        }
    }
}

impl std::error::Error for ProbeFailure {}

/// Scripted in-process transport for deterministic tests
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone)]
    pub(crate) enum Behavior {
        /// Accept, then echo the n-th probe after `delays[n]` (last delay repeats)
        Echo(Vec<Duration>),
        /// Like `Echo`, plus one message nobody asked for, `stray_at` after open
        StrayThenEcho { stray_at: Duration, delays: Vec<Duration> },
        /// Accept, echo `count` probes after `delay`, then close
        CloseAfter { count: usize, delay: Duration },
        /// Fail immediately
        Refuse,
        /// Never finish opening
        Hang,
    }

    pub(crate) struct MockTransport {
        script: Mutex<VecDeque<Behavior>>,
        fallback: Behavior,
        opens: AtomicUsize,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl MockTransport {
        pub(crate) fn new(fallback: Behavior) -> Arc<Self> {
            Self::scripted(Vec::new(), fallback)
        }

        /// Behaviors are consumed one per `open`, then `fallback` applies
        pub(crate) fn scripted(script: Vec<Behavior>, fallback: Behavior) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                opens: AtomicUsize::new(0),
                sent: Arc::new(Mutex::new(Vec::new())),
            })
        }

        pub(crate) fn echo_ms(delays: &[u64]) -> Arc<Self> {
            Self::new(Behavior::Echo(
                delays.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            ))
        }

        pub(crate) fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub(crate) fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl ProbeTransport for MockTransport {
        async fn open(&self, _url: &str) -> Result<ProbeLink> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let behavior = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            let (delays, close_after, stray_at) = match behavior {
                Behavior::Refuse => anyhow::bail!("connection refused"),
                Behavior::Hang => {
                    future::pending::<()>().await;
                    anyhow::bail!("never opens")
                }
                Behavior::Echo(delays) => (delays, None, None),
                Behavior::StrayThenEcho { stray_at, delays } => (delays, None, Some(stray_at)),
                Behavior::CloseAfter { count, delay } => (vec![delay], Some(count), None),
            };

            let (probe_tx, mut probe_rx) = mpsc::unbounded_channel::<String>();
            let (echo_tx, echo_rx) = mpsc::unbounded_channel::<Result<()>>();
            let sent = self.sent.clone();

            if let Some(at) = stray_at {
                let echo_tx = echo_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(at).await;
                    let _ = echo_tx.send(Ok(()));
                });
            }

            tokio::spawn(async move {
                let mut index = 0usize;
                while let Some(payload) = probe_rx.recv().await {
                    sent.lock().push(payload);
                    if close_after.map_or(false, |limit| index >= limit) {
                        continue;
                    }
                    let delay = delays
                        .get(index)
                        .or_else(|| delays.last())
                        .copied()
                        .unwrap_or_default();
                    index += 1;
                    let echo_tx = echo_tx.clone();
                    let closes = close_after == Some(index);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = echo_tx.send(Ok(()));
                        if closes {
                            let _ = echo_tx.send(Err(anyhow::anyhow!("server closed")));
                        }
                    });
                }
            });

            let sink = futures_util::sink::unfold(probe_tx, |tx, payload: String| async move {
                tx.send(payload)
                    .map_err(|_| anyhow::anyhow!("mock link closed"))?;
                Ok::<_, anyhow::Error>(tx)
            });
            let echoes = futures_util::stream::unfold(echo_rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });

            Ok(ProbeLink {
                sink: Box::pin(sink),
                echoes: Box::pin(echoes),
            })
        }
    }
}
