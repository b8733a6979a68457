use std::{collections::HashMap, time::Duration};

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct RateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    failures: HashMap<String, u32>,
}

impl RateLimiter {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: HashMap::new(),
        }
    }

    /// Registers another failure of `key` and returns how long to wait
    /// before it may be retried.
    pub fn when(&mut self, key: &str) -> Duration {
        let failures = self.failures.entry(key.to_owned()).or_default();
        let exponent = *failures;
        *failures = failures.saturating_add(1);

        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    pub fn forget(&mut self, key: &str) {
        self.failures.remove(key);
    }
}
