//! Reconnection backoff policy for the Streamable HTTP event stream.

use serde::{Deserialize, Serialize};

/// Exponential backoff parameters.
///
/// The delay for attempt `n` is `min(initial * growth^n, max)`. The attempt
/// counter resets whenever an event is successfully delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectOptions {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_growth_factor() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    5
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            growth_factor: default_growth_factor(),
            max_retries: default_max_retries(),
        }
    }
}

impl ReconnectOptions {
    /// Delay in milliseconds before reconnect attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> u64 {
        // Clamped exponent: past ~1000 doublings the cap has long since won.
        let exponent = attempt.min(1_000) as i32;
        let raw = self.initial_delay_ms as f64 * self.growth_factor.powi(exponent);
        raw.min(self.max_delay_ms as f64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ReconnectOptions {
        ReconnectOptions {
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            growth_factor: 2.0,
            max_retries: 3,
        }
    }

    #[test]
    fn delay_grows_exponentially_then_caps() {
        let opts = options();
        assert_eq!(opts.delay(0), 100);
        assert_eq!(opts.delay(1), 200);
        assert_eq!(opts.delay(2), 400);
        assert_eq!(opts.delay(10), 10_000);
    }

    #[test]
    fn delay_is_monotonic_and_bounded() {
        let opts = options();
        for n in 0..30 {
            assert!(opts.delay(n) <= opts.delay(n + 1));
            assert!(opts.delay(n) <= opts.max_delay_ms);
        }
    }

    #[test]
    fn huge_attempt_counts_saturate_at_max() {
        let opts = options();
        assert_eq!(opts.delay(u32::MAX), 10_000);
    }

    #[test]
    fn defaults_deserialize_from_empty_table() {
        let opts: ReconnectOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, ReconnectOptions::default());
    }
}
