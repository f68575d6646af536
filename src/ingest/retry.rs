//! Publish retry policies
//!
//! Failed publishes are dropped by default; operators opt into retries
//! via `PUBLISH_RETRY=fixed:N` or `PUBLISH_RETRY=backoff[:initial,max,retries]`.

use std::time::Duration;
use tokio::time::sleep;

/// Delay between attempts under the fixed-count policy.
pub const FIXED_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry policy for failed publish acknowledgments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Log and drop (the default).
    None,
    /// Up to `attempts` extra attempts, one second apart.
    Fixed { attempts: u32 },
    /// Exponential backoff: `initial * 2^n` seconds, capped at `max`,
    /// up to `retries` extra attempts.
    Backoff {
        initial_secs: u64,
        max_secs: u64,
        retries: u32,
    },
}

impl RetryPolicy {
    /// Parse a policy string: `none`, `fixed:N`,
    /// `backoff` (defaults 1s/30s/5), or `backoff:initial,max,retries`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") {
            return Some(RetryPolicy::None);
        }
        if let Some(rest) = s.strip_prefix("fixed:") {
            return rest.parse().ok().map(|attempts| RetryPolicy::Fixed { attempts });
        }
        if s == "backoff" {
            return Some(RetryPolicy::Backoff {
                initial_secs: 1,
                max_secs: 30,
                retries: 5,
            });
        }
        if let Some(rest) = s.strip_prefix("backoff:") {
            let parts: Vec<&str> = rest.split(',').collect();
            if parts.len() != 3 {
                return None;
            }
            let initial_secs = parts[0].trim().parse().ok()?;
            let max_secs = parts[1].trim().parse().ok()?;
            let retries = parts[2].trim().parse().ok()?;
            return Some(RetryPolicy::Backoff {
                initial_secs,
                max_secs,
                retries,
            });
        }
        None
    }
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

/// Exponential backoff state for one retry sequence.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: u64,
    max_delay: u64,
    max_retries: u32,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: u64, max: u64, retries: u32) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    /// Sleep out the next delay, or fail once attempts are exhausted.
    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        // Exponent capped so the multiplier can't overflow; max_delay
        // clamps the result anyway
        let factor = 2_u64.saturating_pow(self.current_attempt.min(16));
        let delay = std::cmp::min(self.initial_delay.saturating_mul(factor), self.max_delay);

        log::warn!(
            "⏳ retry attempt {} of {} in {}s",
            self.current_attempt + 1,
            self.max_retries,
            delay
        );

        sleep(Duration::from_secs(delay)).await;
        self.current_attempt += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}
