//! Retry policy shared by every transport binding.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff for `Unavailable` failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt.
    /// Default: 3
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry.
    /// Default: 1s
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries at all.
    pub fn never() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    /// Saturates instead of overflowing.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
    }

    /// Fresh backoff state for one run of consecutive failures.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            retries: 0,
        }
    }
}

/// Progress through a [`RetryPolicy`].
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    retries: u32,
}

impl Backoff {
    /// Consume one retry. `None` once the bound is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.policy.max_retries {
            return None;
        }
        self.retries += 1;
        Some(self.policy.delay_for(self.retries))
    }

    /// Retries consumed since the last reset.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn reset(&mut self) {
        self.retries = 0;
    }
}

/// Serde helper storing a `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_schedule() {
        let mut backoff = RetryPolicy::default().backoff();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.retries(), 3);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_never_retries() {
        let mut backoff = RetryPolicy::never().backoff();
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_large_retry_saturates() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(1));
        assert_eq!(policy.delay_for(200), Duration::MAX);
    }

    #[test]
    fn test_policy_json_uses_millis() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_retries": 5, "base_delay_ms": 250}"#).unwrap();
        assert_eq!(policy, RetryPolicy::new(5, Duration::from_millis(250)));
    }

    proptest! {
        #[test]
        fn prop_delays_strictly_increase(base_ms in 1u64..10_000, max_retries in 1u32..16) {
            let mut backoff = RetryPolicy::new(max_retries, Duration::from_millis(base_ms)).backoff();
            let mut previous = Duration::ZERO;
            let mut count = 0;
            while let Some(delay) = backoff.next_delay() {
                prop_assert!(delay > previous);
                previous = delay;
                count += 1;
            }
            prop_assert_eq!(count, max_retries);
        }
    }
}
