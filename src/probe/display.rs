//! Consumer-side presentation of a reported latency

use serde::Serialize;

use super::config::DisplayConfig;

/// `max(0, latency - margin)`; `None` stays `None` (never zero)
pub fn adjusted_latency(latency_ms: Option<u64>, margin_ms: u64) -> Option<u64> {
    latency_ms.map(|ms| ms.saturating_sub(margin_ms))
}

/// How a location's latency should be shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyGrade {
    /// No result yet; show the static location description
    Pending,
    /// Probing failed; show "latency unavailable"
    Unavailable,
    Good,
    Fair,
    Poor,
    /// Too high to be meaningful; not shown
    Hidden,
}

impl LatencyGrade {
    /// Grade an already margin-adjusted reading
    pub fn classify(adjusted_ms: Option<u64>, config: &DisplayConfig) -> Self {
        match adjusted_ms {
            None => LatencyGrade::Unavailable,
            Some(ms) if ms > config.visible_max_ms => LatencyGrade::Hidden,
            Some(ms) if ms <= config.good_max_ms => LatencyGrade::Good,
            Some(ms) if ms <= config.fair_max_ms => LatencyGrade::Fair,
            Some(_) => LatencyGrade::Poor,
        }
    }

    pub fn is_visible(self) -> bool {
        !matches!(self, LatencyGrade::Hidden)
    }
}
