use chrono::{DateTime, Duration, Utc};

use crate::config::AgentConfig;
use crate::models::PermanentFailureReason;

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry {
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    },
    GiveUp(PermanentFailureReason),
}

/// Exponential backoff bounded by attempt count and entry age.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_secs: u64,
    max_backoff_secs: u64,
    max_attempts: u32,
    max_age: Duration,
}

impl RetryPolicy {
    pub fn new(base_secs: u64, max_backoff_secs: u64, max_attempts: u32, max_age: Duration) -> Self {
        Self {
            base_secs,
            max_backoff_secs,
            max_attempts: max_attempts.max(1),
            max_age,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.retry_base_secs,
            config.retry_max_backoff_secs,
            config.retry_max_attempts,
            seconds(config.retry_max_age_secs),
        )
    }

    /// `min(max_backoff, base * 2^attempts)`.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        let secs = self
            .base_secs
            .saturating_mul(factor)
            .min(self.max_backoff_secs);
        seconds(secs)
    }

    pub fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(created_at) >= self.max_age
    }

    /// What to do with an entry whose upload just failed, given the number
    /// of failures recorded before this one.
    pub fn after_failure(
        &self,
        attempts_before: u32,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let attempts = attempts_before.saturating_add(1);
        if attempts >= self.max_attempts {
            return RetryDecision::GiveUp(PermanentFailureReason::MaxAttempts);
        }
        if self.is_expired(created_at, now) {
            return RetryDecision::GiveUp(PermanentFailureReason::MaxAge);
        }
        RetryDecision::Retry {
            attempts,
            next_retry_at: now + self.backoff_for(attempts_before),
        }
    }
}

fn seconds(secs: u64) -> Duration {
    // chrono durations are millisecond-backed.
    let max = (i64::MAX / 1000) as u64;
    Duration::seconds(secs.min(max) as i64)
}
