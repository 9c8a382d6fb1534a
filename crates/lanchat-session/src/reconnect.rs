//! Exponential backoff for automatic reconnection.
//!
//! Pure bookkeeping: the session asks the policy what to do and owns the
//! timer itself.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
    auto_reconnect: bool,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
            auto_reconnect: true,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }

    /// The connection dropped without being asked to. Returns the delay
    /// before the next retry, or `None` when no retry should happen.
    pub fn on_unexpected_close(&mut self) -> Option<Duration> {
        if !self.auto_reconnect {
            return None;
        }
        if self.attempts >= self.config.max_attempts {
            warn!(
                attempts = self.attempts,
                "Reconnect attempts exhausted, staying disconnected"
            );
            return None;
        }

        let delay = self.delay_for(self.attempts);
        self.attempts += 1;
        info!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        Some(delay)
    }

    /// A connection was established.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    pub fn manual_connect(&mut self) {
        self.auto_reconnect = true;
        self.attempts = 0;
    }

    pub fn manual_disconnect(&mut self) {
        self.auto_reconnect = false;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig {
            max_attempts,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
        })
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut policy = policy(6);
        let delays: Vec<u64> = std::iter::from_fn(|| policy.on_unexpected_close())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
        assert_eq!(policy.on_unexpected_close(), None);
    }

    #[test]
    fn test_delay_formula_matches_for_every_attempt() {
        let policy = policy(5);
        for attempt in 0..40 {
            let expected = (1_000u128 << attempt.min(20)).min(10_000);
            assert_eq!(policy.delay_for(attempt).as_millis(), expected);
        }
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut policy = policy(2);
        policy.on_unexpected_close();
        policy.on_unexpected_close();
        assert_eq!(policy.on_unexpected_close(), None);

        policy.on_open();
        assert_eq!(policy.on_unexpected_close(), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn test_manual_disconnect_stops_retries_until_connect() {
        let mut policy = policy(5);
        policy.on_unexpected_close();
        policy.manual_disconnect();
        assert!(!policy.auto_reconnect());
        assert_eq!(policy.on_unexpected_close(), None);

        policy.manual_connect();
        assert!(policy.auto_reconnect());
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.on_unexpected_close(), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let mut policy = policy(0);
        assert_eq!(policy.on_unexpected_close(), None);
    }
}
