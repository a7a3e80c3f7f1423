//! Exponential backoff for re-queued identities.
//!
//! Backoff is tracked per key: one identity failing repeatedly never slows
//! down any other identity. There is no global rate limiter.

use rand::Rng;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Configuration for retry backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure (default: 5ms).
    pub base: Duration,
    /// Upper bound on any delay (default: 30 seconds).
    pub max: Duration,
    /// Multiplier applied per consecutive failure (default: 2.0).
    pub multiplier: f64,
    /// Whether to add random jitter (up to 50% of the delay, still capped at `max`).
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Delay for the given number of prior failures.
    ///
    /// Computes `base * multiplier^failures`, capped at `max`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;
        let exponent = failures.min(64) as i32;
        let capped = (base_ms * self.multiplier.powi(exponent)).min(max_ms);

        let total = if self.jitter && capped >= 2.0 {
            let jitter_ms = rand::thread_rng().gen_range(0..=(capped as u64 / 2));
            ((capped as u64).saturating_add(jitter_ms) as f64).min(max_ms)
        } else {
            capped
        };
        Duration::from_millis(total as u64)
    }
}

/// Per-key failure counts driving exponential backoff.
#[derive(Debug)]
pub struct ItemBackoff<K> {
    config: BackoffConfig,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> ItemBackoff<K> {
    /// Create a tracker with the given config.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: HashMap::new(),
        }
    }

    /// Record a failure of `key` and return how long to wait before retrying it.
    pub fn next_delay(&mut self, key: &K) -> Duration {
        let count = self.failures.entry(key.clone()).or_insert(0);
        let delay = self.config.delay_for(*count);
        *count = count.saturating_add(1);
        delay
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Clear the failure history of `key` (after a success).
    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    /// Number of keys with recorded failures.
    pub fn tracked(&self) -> usize {
        self.failures.len()
    }
}
