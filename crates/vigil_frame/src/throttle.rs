//! Throttle-lock detection
//!
//! Hostile compositors punish backgrounded or misbehaving surfaces by
//! locking the frame callback to a fixed slow cadence (roughly 10 Hz).
//! The detector classifies a sliding window of frame intervals as
//! "throttle-stable": every sample inside a narrow elevated band with low
//! deviation. A locked-but-regular loop is still a running loop, and the
//! barriers treat it as such instead of hanging.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Throttle-lock detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Number of intervals in the sliding window
    pub window: usize,
    /// Lower edge of the throttle band (ms, inclusive)
    pub band_low_ms: f64,
    /// Upper edge of the throttle band (ms, inclusive)
    pub band_high_ms: f64,
    /// Maximum sample standard deviation for a lock (ms)
    pub stddev_max_ms: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window: 10,
            band_low_ms: 95.0,
            band_high_ms: 115.0,
            stddev_max_ms: 5.0,
        }
    }
}

/// Sliding-window classifier for throttle-stable frame cadence.
#[derive(Debug, Clone)]
pub struct ThrottleLockDetector {
    config: ThrottleConfig,
    samples: VecDeque<f64>,
}

impl ThrottleLockDetector {
    /// Create a detector with the given configuration.
    pub fn new(config: ThrottleConfig) -> Self {
        let capacity = config.window;
        Self {
            config,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Push a frame interval (ms) into the window.
    pub fn push(&mut self, dt_ms: f64) {
        if self.samples.len() >= self.config.window {
            self.samples.pop_front();
        }
        self.samples.push_back(dt_ms);
    }

    /// Whether the window currently matches the throttle pattern.
    ///
    /// True iff the window is full, every sample lies inside the inclusive
    /// band, and the standard deviation does not exceed the threshold.
    pub fn is_locked(&self) -> bool {
        if !self.is_full() {
            return false;
        }
        let in_band = self
            .samples
            .iter()
            .all(|&dt| dt >= self.config.band_low_ms && dt <= self.config.band_high_ms);
        in_band && self.stddev() <= self.config.stddev_max_ms
    }

    /// Mean interval over the current window (ms). Zero when empty.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Standard deviation over the current window (ms). Zero when empty.
    pub fn stddev(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .samples
            .iter()
            .map(|&dt| (dt - mean) * (dt - mean))
            .sum::<f64>()
            / self.samples.len() as f64;
        variance.sqrt()
    }

    /// Whether the window holds a full complement of samples.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.config.window
    }

    /// Number of samples currently in the window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop all samples. Classification restarts from an empty window.
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }
}

impl Default for ThrottleLockDetector {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}
