//! Reconnect scheduling with exponential backoff.
//!
//! After a reset the first attempt is immediate; each failure after that
//! waits an exponentially increasing, jittered delay capped at
//! [`ReconnectConfig::max_delay`]. [`ReconnectState::next_attempt`] yields the
//! wait before each attempt and `None` once a finite budget is spent.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnect attempts after a reset.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the second attempt. Default: 250 ms.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Maximum delay between attempts. Default: 5 s.
    pub max_delay: Duration,
    /// Total attempts before giving up; `None` retries forever. Default: `None`.
    pub max_attempts: Option<u32>,
    /// Jitter factor (0.0–1.0). Applied as ±jitter to the delay. Default: 0.25.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: None,
            jitter: 0.25,
        }
    }
}

/// Tracks the attempt count and computes the wait before the next attempt.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    /// Create a new state from the given config.
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
        }
    }

    /// Advance the attempt counter and return how long to wait before making
    /// the attempt. Returns `None` once `max_attempts` have been made.
    pub fn next_attempt(&mut self) -> Option<Duration> {
        if self
            .config
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
        {
            return None;
        }

        self.attempts = self.attempts.saturating_add(1);
        if self.attempts == 1 {
            return Some(Duration::ZERO);
        }

        let max = self.config.max_delay;
        let base = self.current_delay.min(max);
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 {
            let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
            scale(base, factor, max)
        } else {
            base
        };

        self.current_delay = scale(base, self.config.backoff_multiplier, max);
        Some(delay)
    }

    /// Number of attempts handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// `delay * factor`, capped at `cap`. Products that are not representable
/// (overflow, NaN, negative) yield `cap`.
fn scale(delay: Duration, factor: f64, cap: Duration) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
        .unwrap_or(cap)
        .min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_attempt_is_immediate() {
        let mut state = ReconnectState::new(config_no_jitter());
        assert_eq!(state.next_attempt(), Some(Duration::ZERO));
        assert_eq!(state.attempts(), 1);
    }

    #[test]
    fn test_backoff_sequence_is_exponential() {
        let mut state = ReconnectState::new(config_no_jitter());
        state.next_attempt();

        let delays: Vec<Duration> = (0..4).filter_map(|_| state.next_attempt()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
    }

    #[test]
    fn test_max_backoff_is_capped() {
        let mut state = ReconnectState::new(config_no_jitter());
        let mut last_delay = Duration::ZERO;
        for _ in 0..15 {
            if let Some(d) = state.next_attempt() {
                last_delay = d;
            }
        }
        assert_eq!(last_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_unlimited_by_default() {
        let mut state = ReconnectState::new(ReconnectConfig::default());
        for _ in 0..1000 {
            assert!(state.next_attempt().is_some());
        }
    }

    #[test]
    fn test_max_attempts_exhausted() {
        let mut state = ReconnectState::new(ReconnectConfig {
            max_attempts: Some(3),
            ..config_no_jitter()
        });

        assert!(state.next_attempt().is_some()); // Attempt 1
        assert!(state.next_attempt().is_some()); // Attempt 2
        assert!(state.next_attempt().is_some()); // Attempt 3
        assert!(state.next_attempt().is_none()); // Exhausted
    }

    #[test]
    fn test_jitter_varies_delay() {
        let delays: Vec<Duration> = (0..10)
            .map(|_| {
                let mut state = ReconnectState::new(ReconnectConfig {
                    initial_delay: Duration::from_secs(1),
                    jitter: 0.25,
                    ..Default::default()
                });
                state.next_attempt();
                state.next_attempt().unwrap()
            })
            .collect();

        assert!(
            delays.windows(2).any(|w| w[0] != w[1]),
            "Jitter should cause variation in delays: {:?}",
            delays
        );
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(1250)));
    }

    #[test]
    fn test_huge_multiplier_saturates_at_max_delay() {
        let mut state = ReconnectState::new(ReconnectConfig {
            backoff_multiplier: 1e30,
            ..config_no_jitter()
        });
        state.next_attempt();

        assert_eq!(state.next_attempt(), Some(Duration::from_secs(1)));
        for _ in 0..5 {
            assert_eq!(state.next_attempt(), Some(Duration::from_secs(30)));
        }
    }

    #[test]
    fn test_unrepresentable_settings_fall_back_to_max_delay() {
        let mut state = ReconnectState::new(ReconnectConfig {
            initial_delay: Duration::MAX,
            backoff_multiplier: f64::NAN,
            jitter: f64::NAN,
            max_delay: Duration::from_secs(5),
            ..Default::default()
        });
        state.next_attempt();
        for _ in 0..3 {
            assert_eq!(state.next_attempt(), Some(Duration::from_secs(5)));
        }
    }
}
