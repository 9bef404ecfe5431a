//! Retry configuration and utilities for startup operations.
//!
//! Connecting to the broker and waiting for a collaborator to finish loading
//! are retried with exponential backoff before the failure is declared fatal.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

/// Default maximum attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Default initial backoff delay in milliseconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;

/// Default maximum backoff delay in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 10000;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Initial backoff delay in milliseconds (default: 1000ms).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds (default: 10000ms).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl RetryConfig {
    /// A config that performs exactly one attempt.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Creates a tokio-retry strategy with exponential backoff.
    ///
    /// Yields `max_attempts - 1` delays, one per retry after the first attempt.
    pub fn strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(self.initial_backoff_ms / 2)
            .max_delay(Duration::from_millis(self.max_backoff_ms))
            .take(self.max_attempts.saturating_sub(1))
    }

    /// Runs `action` until it succeeds or the attempts are exhausted, returning the last error.
    pub async fn retry<T, E, F, Fut>(&self, action: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        tokio_retry::Retry::spawn(self.strategy(), action).await
    }
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}
