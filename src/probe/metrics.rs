//! Prometheus Metrics for Latency Probing

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bucket boundaries in milliseconds
static RTT_BUCKETS_MS: &[u64] = &[5, 10, 25, 50, 100, 150, 200, 300, 500, 1_000, 2_000, 5_000];

/// Per-address probe counters
#[derive(Debug, Default)]
pub struct AddressCounters {
    pub connect_attempts: AtomicU64,
    pub connects_opened: AtomicU64,
    pub probes_sent: AtomicU64,
    pub echoes_received: AtomicU64,
    pub failures: RwLock<HashMap<&'static str, u64>>,
}

/// Simple histogram for round-trip times
#[derive(Debug)]
pub struct RttHistogram {
    counts: Vec<AtomicU64>,
    sum_us: AtomicU64,
    count: AtomicU64,
}

impl RttHistogram {
    pub fn new() -> Self {
        Self {
            counts: RTT_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a round-trip time in milliseconds
    pub fn record(&self, rtt_ms: f64) {
        let rtt_ms = rtt_ms.max(0.0);
        for (i, &boundary) in RTT_BUCKETS_MS.iter().enumerate() {
            if rtt_ms <= boundary as f64 {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
        self.sum_us.fetch_add((rtt_ms * 1_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean RTT in milliseconds
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum_us.load(Ordering::Relaxed) as f64 / 1_000.0 / count as f64
    }

    /// Export as Prometheus histogram format (seconds)
    pub fn to_prometheus(&self, name: &str, labels: &str) -> String {
        let mut output = String::new();
        let mut cumulative = 0u64;

        for (i, &boundary) in RTT_BUCKETS_MS.iter().enumerate() {
            cumulative += self.counts[i].load(Ordering::Relaxed);
            output.push_str(&format!(
                "{}_bucket{{{},le=\"{}\"}} {}\n",
                name,
                labels,
                boundary as f64 / 1_000.0,
                cumulative
            ));
        }

        let total = self.count();
        output.push_str(&format!("{}_bucket{{{},le=\"+Inf\"}} {}\n", name, labels, total));
        output.push_str(&format!(
            "{}_sum{{{}}} {}\n",
            name,
            labels,
            self.sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        output.push_str(&format!("{}_count{{{}}} {}\n", name, labels, total));

        output
    }
}

impl Default for RttHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe metrics registry, keyed by address
#[derive(Debug, Default)]
pub struct ProbeMetrics {
    counters: RwLock<HashMap<String, AddressCounters>>,
    rtt: RwLock<HashMap<String, RttHistogram>>,
    /// Last smoothed latency reported per address (None = unavailable)
    last_latency: RwLock<HashMap<String, Option<u64>>>,
}

impl ProbeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_counters(&self, address: &str, f: impl FnOnce(&AddressCounters)) {
        if let Some(counters) = self.counters.read().get(address) {
            f(counters);
            return;
        }
        let mut map = self.counters.write();
        f(map.entry(address.to_string()).or_default());
    }

    pub fn record_connect_attempt(&self, address: &str) {
        self.with_counters(address, |c| {
            c.connect_attempts.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_open(&self, address: &str) {
        self.with_counters(address, |c| {
            c.connects_opened.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_probe_sent(&self, address: &str) {
        self.with_counters(address, |c| {
            c.probes_sent.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_echo(&self, address: &str, rtt_ms: f64) {
        self.with_counters(address, |c| {
            c.echoes_received.fetch_add(1, Ordering::Relaxed);
        });
        let mut rtt = self.rtt.write();
        rtt.entry(address.to_string()).or_default().record(rtt_ms);
    }

    pub fn record_failure(&self, address: &str, kind: &'static str) {
        self.with_counters(address, |c| {
            *c.failures.write().entry(kind).or_insert(0) += 1;
        });
        self.last_latency.write().insert(address.to_string(), None);
    }

    pub fn record_latency(&self, address: &str, latency_ms: u64) {
        self.last_latency
            .write()
            .insert(address.to_string(), Some(latency_ms));
    }

    /// Stop exporting a latency gauge for `address`. Counters are kept.
    pub fn forget_latency(&self, address: &str) {
        self.last_latency.write().remove(address);
    }

    pub fn probes_sent(&self, address: &str) -> u64 {
        self.counters
            .read()
            .get(address)
            .map(|c| c.probes_sent.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn failures(&self, address: &str, kind: &str) -> u64 {
        self.counters
            .read()
            .get(address)
            .and_then(|c| c.failures.read().get(kind).copied())
            .unwrap_or(0)
    }

    pub fn last_latency(&self, address: &str) -> Option<u64> {
        self.last_latency.read().get(address).copied().flatten()
    }

    /// Export all metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        let counters = self.counters.read();

        let simple: [(&str, &str, fn(&AddressCounters) -> u64); 4] = [
            ("ping_probe_connect_attempts_total", "Connection attempts", |c| {
                c.connect_attempts.load(Ordering::Relaxed)
            }),
            ("ping_probe_connects_opened_total", "Connections opened", |c| {
                c.connects_opened.load(Ordering::Relaxed)
            }),
            ("ping_probe_probes_sent_total", "Probes transmitted", |c| {
                c.probes_sent.load(Ordering::Relaxed)
            }),
            ("ping_probe_echoes_received_total", "Echoes received", |c| {
                c.echoes_received.load(Ordering::Relaxed)
            }),
        ];

        for (name, help, read) in simple {
            output.push_str(&format!("# HELP {} {}\n# TYPE {} counter\n", name, help, name));
            for (address, c) in counters.iter() {
                output.push_str(&format!("{}{{address=\"{}\"}} {}\n", name, address, read(c)));
            }
            output.push('\n');
        }

        output.push_str("# HELP ping_probe_failures_total Connection failures by kind\n");
        output.push_str("# TYPE ping_probe_failures_total counter\n");
        for (address, c) in counters.iter() {
            for (kind, count) in c.failures.read().iter() {
                output.push_str(&format!(
                    "ping_probe_failures_total{{address=\"{}\",kind=\"{}\"}} {}\n",
                    address, kind, count
                ));
            }
        }
        drop(counters);

        output.push_str("\n# HELP ping_probe_rtt_seconds Round-trip time per probe\n");
        output.push_str("# TYPE ping_probe_rtt_seconds histogram\n");
        for (address, hist) in self.rtt.read().iter() {
            let labels = format!("address=\"{}\"", address);
            output.push_str(&hist.to_prometheus("ping_probe_rtt_seconds", &labels));
        }

        output.push_str("\n# HELP ping_probe_latency_ms Last smoothed latency reported\n");
        output.push_str("# TYPE ping_probe_latency_ms gauge\n");
        for (address, latency) in self.last_latency.read().iter() {
            if let Some(ms) = latency {
                output.push_str(&format!(
                    "ping_probe_latency_ms{{address=\"{}\"}} {}\n",
                    address, ms
                ));
            }
        }

        output
    }
}
