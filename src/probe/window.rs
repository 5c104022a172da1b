//! Bounded window of recent round-trip samples

use std::collections::VecDeque;

/// FIFO of the most recent RTT samples (milliseconds).
///
/// The window never grows beyond its capacity; pushing into a full window
/// evicts the oldest sample first. Smoothing is a plain unweighted mean.
#[derive(Debug, Clone)]
pub struct MeasurementWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    min_samples: usize,
}

impl MeasurementWindow {
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_samples: min_samples.clamp(1, capacity),
        }
    }

    pub fn push(&mut self, rtt_ms: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Unrounded mean of every sample in the window
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Mean rounded to whole milliseconds, once enough samples are present
    pub fn smoothed(&self) -> Option<u64> {
        if self.samples.len() < self.min_samples {
            return None;
        }
        self.mean().map(|mean| mean.max(0.0).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_value_before_min_samples() {
        let mut window = MeasurementWindow::new(5, 3);
        window.push(80.0);
        window.push(95.0);
        assert_eq!(window.smoothed(), None);

        window.push(110.0);
        assert_eq!(window.smoothed(), Some(95));
    }

    #[test]
    fn test_sixth_sample_evicts_oldest() {
        let mut window = MeasurementWindow::new(5, 3);
        for rtt in [10.0, 20.0, 30.0, 40.0, 50.0] {
            window.push(rtt);
        }
        assert_eq!(window.len(), 5);
        assert_eq!(window.smoothed(), Some(30));

        window.push(60.0);
        assert_eq!(window.len(), 5);
        assert_eq!(window.samples().collect::<Vec<_>>(), vec![20.0, 30.0, 40.0, 50.0, 60.0]);
        assert_eq!(window.smoothed(), Some(40));
    }

    #[test]
    fn test_rounds_only_when_reporting() {
        let mut window = MeasurementWindow::new(5, 3);
        window.push(10.4);
        window.push(10.4);
        window.push(10.4);
        window.push(12.3);
        // (10.4 * 3 + 12.3) / 4 = 10.875
        assert!((window.mean().unwrap() - 10.875).abs() < 1e-9);
        assert_eq!(window.smoothed(), Some(11));
    }

    #[test]
    fn test_clear_resets() {
        let mut window = MeasurementWindow::new(5, 3);
        window.push(1.0);
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.mean(), None);
    }
}
