//! Latest latency per location, shaped for display
//!
//! The board is what a UI (or the monitor's HTTP endpoint) reads. Registry
//! callbacks write into it; nothing here talks to the network.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::config::DisplayConfig;
use super::display::{adjusted_latency, LatencyGrade};

/// One location's current reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationLatency {
    pub address: String,
    /// Smoothed latency as reported by the probe (ms)
    pub latency_ms: Option<u64>,
    /// Latency after subtracting the display margin (ms)
    pub adjusted_ms: Option<u64>,
    pub grade: LatencyGrade,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LocationLatency {
    fn pending(address: &str) -> Self {
        Self {
            address: address.to_string(),
            latency_ms: None,
            adjusted_ms: None,
            grade: LatencyGrade::Pending,
            updated_at: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.grade == LatencyGrade::Pending
    }
}

#[derive(Debug, Default)]
pub struct LatencyBoard {
    display: DisplayConfig,
    readings: RwLock<HashMap<String, LocationLatency>>,
}

impl LatencyBoard {
    pub fn new(display: DisplayConfig) -> Self {
        Self {
            display,
            readings: RwLock::new(HashMap::new()),
        }
    }

    /// Start showing `address` as loading
    pub fn track(&self, address: &str) {
        self.readings
            .write()
            .insert(address.to_string(), LocationLatency::pending(address));
    }

    pub fn untrack(&self, address: &str) {
        self.readings.write().remove(address);
    }

    /// Store the latest callback value for `address`
    pub fn record(&self, address: &str, latency_ms: Option<u64>) {
        let adjusted_ms = adjusted_latency(latency_ms, self.display.margin_ms);
        let reading = LocationLatency {
            address: address.to_string(),
            latency_ms,
            adjusted_ms,
            grade: LatencyGrade::classify(adjusted_ms, &self.display),
            updated_at: Some(Utc::now()),
        };
        self.readings.write().insert(address.to_string(), reading);
    }

    pub fn get(&self, address: &str) -> Option<LocationLatency> {
        self.readings.read().get(address).cloned()
    }

    /// All tracked locations, sorted by address
    pub fn snapshot(&self) -> Vec<LocationLatency> {
        let mut readings: Vec<LocationLatency> = self.readings.read().values().cloned().collect();
        readings.sort_by(|a, b| a.address.cmp(&b.address));
        readings
    }
}
