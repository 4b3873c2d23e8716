//! Backoff schedule for retrying failed unbind calls

use std::time::Duration;

/// Default first retry delay
const RETRY_DELAY_BASE: Duration = Duration::from_secs(1);

/// Default cap on a single retry delay
const RETRY_DELAY_MAX: Duration = Duration::from_secs(60);

/// Default number of automatic retries
const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Exponential backoff: attempt `n` waits `base_delay * 2^(n-1)`, capped at
/// `max_delay`. `max_retries == 0` turns automatic retries off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY_ATTEMPTS,
            base_delay: RETRY_DELAY_BASE,
            max_delay: RETRY_DELAY_MAX,
        }
    }
}

impl RetryConfig {
    /// No automatic retries; stuck cleanups wait for a manual retry
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Delay before retry `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let config = RetryConfig {
            max_retries: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        };

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            max_retries: 40,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        };

        assert_eq!(config.delay_for(6), Duration::from_secs(30));
        assert_eq!(config.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_disabled() {
        assert!(!RetryConfig::disabled().is_enabled());
        assert!(RetryConfig::default().is_enabled());
    }
}
