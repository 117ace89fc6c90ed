//! Retry policy for the messenger task worker (§10.6).
//!
//! Unlike a generic job queue's exponential backoff, the messenger send
//! path has exactly two failure shapes: a rate limit (sleep, leave the
//! task pending, don't count it as a retry) and everything else (count
//! against a fixed retry ceiling).

/// A task fails permanently once it has already been retried this many
/// times.
pub const MAX_RETRIES: u32 = 3;

/// What the worker should do next after a failed send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `seconds`, then retry without incrementing `retries`.
    SleepAndRetry { seconds: u64 },
    /// Increment `retries` and leave the task pending.
    RetryLater,
    /// `retries` has reached the ceiling; mark the task failed.
    GiveUp,
}

/// Decide what to do given the current retry count and whether the
/// failure was a rate limit.
#[must_use]
pub fn decide(retries: u32, rate_limited_retry_after: Option<u64>) -> RetryDecision {
    if let Some(seconds) = rate_limited_retry_after {
        return RetryDecision::SleepAndRetry { seconds };
    }
    if retries >= MAX_RETRIES {
        RetryDecision::GiveUp
    } else {
        RetryDecision::RetryLater
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_always_sleeps_and_retries() {
        assert_eq!(decide(0, Some(5)), RetryDecision::SleepAndRetry { seconds: 5 });
        assert_eq!(decide(2, Some(5)), RetryDecision::SleepAndRetry { seconds: 5 });
    }

    #[test]
    fn generic_error_counts_toward_ceiling() {
        assert_eq!(decide(0, None), RetryDecision::RetryLater);
        assert_eq!(decide(2, None), RetryDecision::RetryLater);
        assert_eq!(decide(3, None), RetryDecision::GiveUp);
        assert_eq!(decide(4, None), RetryDecision::GiveUp);
    }
}
