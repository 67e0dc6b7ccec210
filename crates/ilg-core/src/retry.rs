//! Retry / quarantine policy for pairs that keep failing to rotate.
//!
//! Early failures stay on the fast path: the pair keeps its stale due time and
//! is picked up again on the next tick. Past `fast_retry_limit` the due time is
//! pushed out with capped exponential backoff. Structural failures (message
//! deleted, rights revoked) eventually quarantine the pair.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::pair::FailureUpdate;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub fast_retry_limit: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub quarantine_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            fast_retry_limit: 3,
            base_backoff: Duration::from_secs(300),
            max_backoff: Duration::from_secs(6 * 3600),
            quarantine_after: 10,
        }
    }
}

impl RetryPolicy {
    /// Backoff to apply after the `failures`-th consecutive failure (1-based).
    pub fn backoff_for(&self, failures: u32) -> Option<Duration> {
        if failures <= self.fast_retry_limit {
            return None;
        }
        let exp = (failures - self.fast_retry_limit - 1).min(30);
        let backoff = self
            .base_backoff
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_backoff);
        Some(backoff.min(self.max_backoff))
    }

    pub fn on_failure(
        &self,
        previous_failures: u32,
        structural: bool,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> FailureUpdate {
        let failures = previous_failures.saturating_add(1);
        let next_rotation_at = self
            .backoff_for(failures)
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| now.checked_add_signed(d));

        FailureUpdate {
            consecutive_failures: failures,
            reason: reason.into(),
            at: now,
            next_rotation_at,
            quarantine: structural && failures >= self.quarantine_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            fast_retry_limit: 2,
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
            quarantine_after: 4,
        }
    }

    #[test]
    fn fast_retries_keep_the_pair_due() {
        let p = policy();
        let now = Utc::now();
        assert_eq!(p.on_failure(0, false, "x", now).next_rotation_at, None);
        assert_eq!(p.on_failure(1, true, "x", now).next_rotation_at, None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff_for(3), Some(Duration::from_secs(60)));
        assert_eq!(p.backoff_for(4), Some(Duration::from_secs(120)));
        assert_eq!(p.backoff_for(5), Some(Duration::from_secs(240)));
        assert_eq!(p.backoff_for(6), Some(Duration::from_secs(300)));
        assert_eq!(p.backoff_for(60), Some(Duration::from_secs(300)));
    }

    #[test]
    fn only_structural_failures_quarantine() {
        let p = policy();
        let now = Utc::now();
        let transient = p.on_failure(9, false, "timeout", now);
        assert_eq!(transient.consecutive_failures, 10);
        assert!(!transient.quarantine);

        assert!(!p.on_failure(2, true, "message gone", now).quarantine);
        let structural = p.on_failure(3, true, "message gone", now);
        assert!(structural.quarantine);
        assert_eq!(structural.reason, "message gone");
        assert_eq!(
            structural.next_rotation_at,
            Some(now + chrono::Duration::seconds(120))
        );
    }
}
