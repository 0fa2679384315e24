//! Time bounds for storage calls.

use crate::error::{StoreError, StoreResult};
use std::time::{Duration, Instant};

/// A point in time after which storage calls fail with
/// [`StoreError::Timeout`].
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    /// Creates a deadline `limit` from now.
    #[must_use]
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// Returns a deadline that expires no later than `limit` from now.
    #[must_use]
    pub fn at_most(self, limit: Duration) -> Self {
        let elapsed = self.started.elapsed();
        Self {
            started: self.started,
            limit: self.limit.min(elapsed.saturating_add(limit)),
        }
    }

    /// Total time allowed.
    #[must_use]
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Time left before expiry.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started.elapsed())
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    /// Fails if the deadline has passed.
    pub fn check(&self) -> StoreResult<()> {
        if self.is_expired() {
            Err(StoreError::Timeout { limit: self.limit })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_deadline_passes() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(deadline.check().is_ok());
        assert!(deadline.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn zero_deadline_expires() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert!(matches!(deadline.check(), Err(StoreError::Timeout { .. })));
    }

    #[test]
    fn at_most_tightens() {
        let deadline = Deadline::after(Duration::from_secs(60)).at_most(Duration::from_millis(10));
        assert!(deadline.remaining() <= Duration::from_millis(10));

        let deadline = Deadline::after(Duration::from_secs(1)).at_most(Duration::from_secs(60));
        assert_eq!(deadline.limit(), Duration::from_secs(1));
    }
}
