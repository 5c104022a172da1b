//! Latency Probe Configuration

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for latency probing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// URL scheme used to reach an address (wss, ws)
    pub scheme: String,

    /// Literal payload sent for every probe
    pub payload: String,

    /// Deadline for a connection attempt to open
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Number of recent RTT samples kept per connection
    pub window_capacity: usize,

    /// Samples required before a smoothed latency is reported
    pub min_samples: usize,

    /// Period of the probe driver
    #[serde(with = "duration_serde")]
    pub probe_interval: Duration,

    /// Ceiling for single-shot measurements
    #[serde(with = "duration_serde")]
    pub measure_timeout: Duration,

    /// Consumer-side display policy
    pub display: DisplayConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            scheme: "wss".into(),
            payload: "ping".into(),
            connect_timeout: Duration::from_secs(10),
            window_capacity: 5,
            min_samples: 3,
            probe_interval: Duration::from_secs(1),
            measure_timeout: Duration::from_secs(10),
            display: DisplayConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// Parse a TOML document. Missing keys fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse probe config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheme != "wss" && self.scheme != "ws" {
            bail!("unsupported scheme {:?} (expected wss or ws)", self.scheme);
        }
        if self.payload.is_empty() {
            bail!("probe payload must not be empty");
        }
        if self.window_capacity == 0 {
            bail!("window_capacity must be at least 1");
        }
        if self.min_samples == 0 || self.min_samples > self.window_capacity {
            bail!(
                "min_samples must be within 1..={} (got {})",
                self.window_capacity,
                self.min_samples
            );
        }
        if self.connect_timeout.is_zero()
            || self.probe_interval.is_zero()
            || self.measure_timeout.is_zero()
        {
            bail!("timeouts and intervals must be non-zero");
        }
        Ok(())
    }

    /// Connection URL for an address: `<scheme>://<address>`, no path or query
    pub fn url_for(&self, address: &str) -> String {
        format!("{}://{}", self.scheme, address)
    }
}

/// How a reported latency is shown to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Subtracted from every reading before display
    pub margin_ms: u64,
    /// Upper bound (inclusive) of the "good" grade
    pub good_max_ms: u64,
    /// Upper bound (inclusive) of the "fair" grade
    pub fair_max_ms: u64,
    /// Readings above this are not shown at all
    pub visible_max_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            margin_ms: 15,
            good_max_ms: 130,
            fair_max_ms: 230,
            visible_max_ms: 500,
        }
    }
}

// Serde helper for Duration (using milliseconds for simplicity)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
