//! Network quality detection from connect latencies.
//!
//! Keeps the most recent connection-establishment durations and maps their
//! mean to a quality label. The label picks the connect timeout used for the
//! next attempt, so a slow network gets more patience instead of a storm of
//! premature reconnects.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Ring-buffer size, also the upper bound accepted by [`NetworkQualityDetector::new`].
pub const DEFAULT_MAX_SAMPLES: usize = 10;

/// Coarse network quality label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    /// Mean connect < 1s.
    Excellent,
    /// Mean connect < 3s.
    Good,
    /// Mean connect < 8s.
    Fair,
    /// Mean connect >= 8s.
    Poor,
    /// No samples yet.
    Unknown,
}

impl NetworkQuality {
    /// Connect timeout recommended for this quality.
    pub fn recommended_timeout(&self) -> Duration {
        let secs = match self {
            Self::Excellent => 5,
            Self::Good => 8,
            Self::Fair => 15,
            Self::Poor => 25,
            Self::Unknown => 10,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Rolling sample of connect durations.
#[derive(Debug, Clone)]
pub struct NetworkQualityDetector {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl NetworkQualityDetector {
    pub fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.clamp(1, DEFAULT_MAX_SAMPLES);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record one successful connect duration, evicting the oldest when full.
    pub fn record(&mut self, connect_duration: Duration) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(connect_duration);
    }

    /// Mean of the current samples.
    pub fn mean(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn quality(&self) -> NetworkQuality {
        match self.mean() {
            None => NetworkQuality::Unknown,
            Some(mean) if mean < Duration::from_secs(1) => NetworkQuality::Excellent,
            Some(mean) if mean < Duration::from_secs(3) => NetworkQuality::Good,
            Some(mean) if mean < Duration::from_secs(8) => NetworkQuality::Fair,
            Some(_) => NetworkQuality::Poor,
        }
    }

    pub fn recommended_timeout(&self) -> Duration {
        self.quality().recommended_timeout()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Default for NetworkQualityDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_unknown_without_samples() {
        let q = NetworkQualityDetector::default();
        assert_eq!(q.quality(), NetworkQuality::Unknown);
        assert_eq!(q.recommended_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_quality_thresholds() {
        let cases = [
            (ms(200), NetworkQuality::Excellent, 5),
            (ms(999), NetworkQuality::Excellent, 5),
            (ms(1000), NetworkQuality::Good, 8),
            (ms(2999), NetworkQuality::Good, 8),
            (ms(3000), NetworkQuality::Fair, 15),
            (ms(7999), NetworkQuality::Fair, 15),
            (ms(8000), NetworkQuality::Poor, 25),
            (ms(20000), NetworkQuality::Poor, 25),
        ];
        for (sample, expected, timeout_secs) in cases {
            let mut q = NetworkQualityDetector::default();
            q.record(sample);
            assert_eq!(q.quality(), expected, "sample {sample:?}");
            assert_eq!(q.recommended_timeout(), Duration::from_secs(timeout_secs));
        }
    }

    #[test]
    fn test_ring_buffer_keeps_last_ten() {
        let mut q = NetworkQualityDetector::default();
        for _ in 0..10 {
            q.record(ms(10_000));
        }
        assert_eq!(q.quality(), NetworkQuality::Poor);

        // Ten fast connects push out every slow one.
        for _ in 0..10 {
            q.record(ms(100));
        }
        assert_eq!(q.sample_count(), 10);
        assert_eq!(q.quality(), NetworkQuality::Excellent);
    }

    #[test]
    fn test_ring_size_is_clamped() {
        let mut q = NetworkQualityDetector::new(500);
        for _ in 0..50 {
            q.record(ms(100));
        }
        assert_eq!(q.sample_count(), DEFAULT_MAX_SAMPLES);

        let mut q = NetworkQualityDetector::new(0);
        q.record(ms(100));
        q.record(ms(9000));
        assert_eq!(q.sample_count(), 1);
        assert_eq!(q.quality(), NetworkQuality::Poor);
    }

    #[test]
    fn test_mean_of_mixed_samples() {
        let mut q = NetworkQualityDetector::default();
        q.record(ms(500));
        q.record(ms(5500));
        assert_eq!(q.mean(), Some(ms(3000)));
        assert_eq!(q.quality(), NetworkQuality::Fair);
    }
}
