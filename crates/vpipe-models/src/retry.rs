//! Retry fields carried by every broker message and the policy that reads them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Retry bookkeeping embedded in a message body.
///
/// `retry_count` only ever grows for a given logical message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RetryInfo {
    #[serde(default)]
    pub retry_count: u32,
    /// `0` means "use the consumer's configured maximum".
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub last_retry: Option<DateTime<Utc>>,
}

impl RetryInfo {
    pub fn new(max_retries: u32) -> Self {
        Self {
            retry_count: 0,
            max_retries,
            last_retry: None,
        }
    }

    /// Bookkeeping for the next delivery attempt.
    pub fn next_attempt(&self, now: DateTime<Utc>) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            max_retries: self.max_retries,
            last_retry: Some(now),
        }
    }
}

/// Why a delivery must not be processed now.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryRejection {
    /// Attempt budget used up; the message is dropped.
    #[error("Max retries exceeded ({retry_count}/{max_retries})")]
    Exhausted { retry_count: u32, max_retries: u32 },

    /// Redelivered too soon; requeue without spending an attempt.
    #[error("retry delay not met ({remaining_secs}s remaining)")]
    TooEarly { remaining_secs: i64 },
}

/// Retry policy applied by a consumer before handling a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Default budget for messages that do not carry their own.
    pub max_retries: u32,
    /// Minimum spacing between two attempts of the same message.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Budget that applies to `info`.
    pub fn effective_max(&self, info: &RetryInfo) -> u32 {
        if info.max_retries == 0 {
            self.max_retries
        } else {
            info.max_retries
        }
    }

    /// Decide whether a delivery may be processed at `now`.
    ///
    /// The budget check wins over the delay check.
    pub fn check(&self, info: &RetryInfo, now: DateTime<Utc>) -> Result<(), RetryRejection> {
        let max_retries = self.effective_max(info);
        if info.retry_count >= max_retries {
            return Err(RetryRejection::Exhausted {
                retry_count: info.retry_count,
                max_retries,
            });
        }

        if let Some(last_retry) = info.last_retry {
            let delay = chrono::Duration::from_std(self.retry_delay)
                .unwrap_or_else(|_| chrono::Duration::days(365));
            let elapsed = now - last_retry;
            if elapsed < delay {
                return Err(RetryRejection::TooEarly {
                    remaining_secs: (delay - elapsed).num_seconds(),
                });
            }
        }

        Ok(())
    }
}
