//! Client reconnect pacing
//!
//! A client-role connector that cannot reach its server keeps retrying until
//! stopped; this policy spaces the attempts with exponential backoff so a
//! long-absent server is not hammered.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff schedule between failed connect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Ceiling for the delay between attempts
    pub max_delay: Duration,
    /// Factor applied to the delay after each failed attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt.min(64) as i32);
        let capped = ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
