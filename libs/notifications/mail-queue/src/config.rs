//! Queue configuration
//!
//! This module provides `QueueConfig` for tuning the dispatch worker.

use core_config::{env_parse, ConfigError, FromEnv};
use std::time::Duration;

const DEFAULT_DEQUEUE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_PACING_MS: u64 = 1000;

/// Configuration for the dispatch worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long one dequeue waits on an empty queue before the worker
    /// re-checks for a stop request. Bounds worst-case idle shutdown latency.
    pub dequeue_timeout: Duration,

    /// Fixed delay after every worker iteration, throttling the send rate.
    pub pacing_delay: Duration,
}

impl QueueConfig {
    pub fn new(dequeue_timeout: Duration, pacing_delay: Duration) -> Self {
        Self {
            dequeue_timeout,
            pacing_delay,
        }
    }

    /// Set the dequeue timeout
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Set the pacing delay
    pub fn with_pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = delay;
        self
    }

    /// Dequeue timeout in milliseconds, saturating at `u64::MAX`
    pub fn dequeue_timeout_ms(&self) -> u64 {
        saturating_millis(self.dequeue_timeout)
    }

    /// Pacing delay in milliseconds, saturating at `u64::MAX`
    pub fn pacing_ms(&self) -> u64 {
        saturating_millis(self.pacing_delay)
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_DEQUEUE_TIMEOUT_MS),
            Duration::from_millis(DEFAULT_PACING_MS),
        )
    }
}

impl FromEnv for QueueConfig {
    /// Reads `MAIL_QUEUE_DEQUEUE_TIMEOUT_MS` and `MAIL_QUEUE_PACING_MS`
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(
            Duration::from_millis(env_parse(
                "MAIL_QUEUE_DEQUEUE_TIMEOUT_MS",
                DEFAULT_DEQUEUE_TIMEOUT_MS,
            )?),
            Duration::from_millis(env_parse("MAIL_QUEUE_PACING_MS", DEFAULT_PACING_MS)?),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.dequeue_timeout, Duration::from_secs(1));
        assert_eq!(config.pacing_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_pattern() {
        let config = QueueConfig::default()
            .with_dequeue_timeout(Duration::from_millis(50))
            .with_pacing_delay(Duration::ZERO);

        assert_eq!(config.dequeue_timeout, Duration::from_millis(50));
        assert_eq!(config.pacing_delay, Duration::ZERO);
    }

    #[test]
    fn test_millis_saturate() {
        let config = QueueConfig::default().with_pacing_delay(Duration::MAX);

        assert_eq!(config.dequeue_timeout_ms(), 1000);
        assert_eq!(config.pacing_ms(), u64::MAX);
    }

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("MAIL_QUEUE_DEQUEUE_TIMEOUT_MS", Some("250")),
                ("MAIL_QUEUE_PACING_MS", Some("0")),
            ],
            || {
                let config = QueueConfig::from_env().unwrap();
                assert_eq!(config.dequeue_timeout, Duration::from_millis(250));
                assert_eq!(config.pacing_delay, Duration::ZERO);
            },
        );
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        temp_env::with_var("MAIL_QUEUE_PACING_MS", Some("fast"), || {
            let err = QueueConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("MAIL_QUEUE_PACING_MS"));
        });
    }
}
