//! Configuration for the sync engine.

use coursesync_model::RemovalPolicy;
use rand::Rng;
use std::time::Duration;

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long a run's course lease lasts.
    pub lease_ttl: Duration,
    /// Upper bound on storage calls within one run.
    ///
    /// Never longer than the lease TTL in practice: the coordinator tightens
    /// each run's deadline to the lease.
    pub storage_timeout: Duration,
    /// Requeue policy for transient storage and fetch failures.
    pub retry: RetryConfig,
    /// Requeue policy for lease contention.
    pub lease_retry: RetryConfig,
    /// What happens to mastery records of removed topics.
    pub removal_policy: RemovalPolicy,
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            lease_ttl: Duration::from_secs(120),
            storage_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            lease_retry: RetryConfig::fixed(10, Duration::from_secs(45)),
            removal_policy: RemovalPolicy::Archive,
        }
    }

    /// Sets the lease TTL.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Sets the storage timeout.
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Sets the failure retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the lease contention retry configuration.
    pub fn with_lease_retry(mut self, retry: RetryConfig) -> Self {
        self.lease_retry = retry;
        self
    }

    /// Sets the removal policy.
    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffPolicy {
    /// Same delay every time.
    Fixed,
    /// Delay multiplied on every attempt.
    Exponential {
        /// Growth factor.
        multiplier: f64,
    },
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Growth of the delay.
    pub backoff: BackoffPolicy,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates an exponential retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff: BackoffPolicy::Exponential { multiplier: 2.0 },
            add_jitter: true,
        }
    }

    /// Creates a configuration retrying after the same delay each time.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff: BackoffPolicy::Fixed,
            add_jitter: false,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff: BackoffPolicy::Fixed,
            add_jitter: false,
        }
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Returns true if another attempt is allowed after `attempts_made`.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = match self.backoff {
            BackoffPolicy::Fixed => self.initial_delay.as_secs_f64(),
            BackoffPolicy::Exponential { multiplier } => {
                self.initial_delay.as_secs_f64()
                    * multiplier.powi(attempt.saturating_sub(1).min(64) as i32)
            }
        };

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        let delay_secs = if self.add_jitter {
            // Up to 25% extra.
            delay_secs + delay_secs * 0.25 * rand::thread_rng().gen::<f64>()
        } else {
            delay_secs
        };

        // Negative, NaN and out-of-range values fall back to the cap.
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
