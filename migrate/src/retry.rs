//! # Retry
//!
//! Module dedicated to the retry policy applied to remote operations
//! failing with a transient error.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_DELAY: u64 = 2;
pub const DEFAULT_MAX_DELAY: u64 = 60;
pub const DEFAULT_MULTIPLIER: u32 = 2;

/// The retry policy.
///
/// Attempt `n` (1-based) that fails with a transient error is
/// followed by a delay of `initial_delay * multiplier^(n-1)`, capped
/// to `max_delay`, unless `max_attempts` attempts have been made.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_secs(DEFAULT_INITIAL_DELAY),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY),
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Compute the delay following the given failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exp);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    pub fn start(&self) -> Retry<'_> {
        Retry {
            policy: self,
            attempts: 0,
        }
    }
}

/// The retry state after a failed attempt.
#[derive(Debug, Eq, PartialEq)]
pub enum RetryState {
    /// Wait the given delay then try again.
    Retry(Duration),
    /// All attempts failed.
    Exhausted,
}

/// The retry counter of one operation.
#[derive(Debug)]
pub struct Retry<'a> {
    policy: &'a RetryPolicy,
    pub attempts: u32,
}

impl Retry<'_> {
    /// Register a failed attempt.
    pub fn next(&mut self) -> RetryState {
        self.attempts += 1;

        if self.attempts < self.policy.max_attempts {
            RetryState::Retry(self.policy.delay(self.attempts))
        } else {
            RetryState::Exhausted
        }
    }
}

/// The retry configuration, delays expressed in seconds.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_secs(config.initial_delay),
            max_delay: Duration::from_secs(config.max_delay),
            multiplier: config.multiplier,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay() -> u64 {
    DEFAULT_INITIAL_DELAY
}

fn default_max_delay() -> u64 {
    DEFAULT_MAX_DELAY
}

fn default_multiplier() -> u32 {
    DEFAULT_MULTIPLIER
}
