//! Reconnect schedule with jittered exponential back-off.

use std::time::Duration;

use pk_domain::config::ReconnectConfig;

/// How a lane redials the gateway after its connection is lost.
///
/// Attempt 0 is immediate: a gateway that closed us after an error frame
/// is normally ready to accept the next connection at once.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Failed attempts before the lane gives up; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_factor: cfg.backoff_factor.max(1.0),
            max_attempts: cfg.max_attempts,
        }
    }
}

impl ReconnectBackoff {
    /// Delay before the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        // Up to +25% so a fleet of lanes does not redial in lockstep.
        let jitter = capped_ms * 0.25 * jitter_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Deterministic fraction in [0, 1) derived from the attempt number.
fn jitter_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2_654_435_761);
    f64::from(hash) / f64::from(u32::MAX)
}
