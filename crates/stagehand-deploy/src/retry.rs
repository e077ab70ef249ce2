//! Step retry policy as an explicit transition table.
//!
//! The engine never sleeps inside the policy; it asks [`RetryPolicy::next`]
//! what to do with an attempt's outcome and acts on the returned
//! [`Transition`]. That keeps backoff testable without real delays.

use std::time::Duration;

/// Upper bound on any single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Outcome of one attempt at a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step finished.
    Success,
    /// The step failed in a way that may succeed on retry.
    Transient(String),
    /// The step failed in a way that retrying cannot fix.
    Permanent(String),
    /// The deployment was cancelled while the step ran.
    Cancelled,
}

/// What the engine does after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Mark the step completed and move to the next one.
    Advance,
    /// Run the step again after `delay`.
    Retry {
        /// 1-based retry number.
        attempt: u32,
        /// Backoff before the retry.
        delay: Duration,
    },
    /// Mark the step and the deployment failed.
    Fail(String),
    /// Mark the deployment cancelled.
    Cancel,
}

/// Capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Ceiling on any delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), 2.0)
    }
}

impl RetryPolicy {
    /// Creates a policy capped at [`MAX_RETRY_DELAY`].
    #[must_use]
    pub const fn new(attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            attempts,
            base_delay,
            multiplier,
            max_delay: MAX_RETRY_DELAY,
        }
    }

    /// Delay before retry number `attempt`.
    ///
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`;
    /// attempt 0 has no delay.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Transition for `outcome` given `retries_so_far` retries of the step.
    #[must_use]
    pub fn next(&self, retries_so_far: u32, outcome: &StepOutcome) -> Transition {
        match outcome {
            StepOutcome::Success => Transition::Advance,
            StepOutcome::Cancelled => Transition::Cancel,
            StepOutcome::Permanent(error) => Transition::Fail(error.clone()),
            StepOutcome::Transient(error) => {
                if retries_so_far < self.attempts {
                    let attempt = retries_so_far + 1;
                    Transition::Retry {
                        attempt,
                        delay: self.delay(attempt),
                    }
                } else {
                    Transition::Fail(format!(
                        "{error} (gave up after {retries_so_far} retries)"
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_progression() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2), 2.0);
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(6), Duration::from_secs(60));
        assert_eq!(policy.delay(100), Duration::from_secs(60));
    }

    #[test]
    fn test_transition_table() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100), 3.0);
        let transient = StepOutcome::Transient("connection refused".to_string());

        assert_eq!(policy.next(0, &StepOutcome::Success), Transition::Advance);
        assert_eq!(
            policy.next(0, &transient),
            Transition::Retry {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.next(1, &transient),
            Transition::Retry {
                attempt: 2,
                delay: Duration::from_millis(300)
            }
        );
        assert!(matches!(policy.next(2, &transient), Transition::Fail(msg) if msg.contains("connection refused")));
        assert_eq!(
            policy.next(0, &StepOutcome::Permanent("bad checksum".to_string())),
            Transition::Fail("bad checksum".to_string())
        );
        assert_eq!(policy.next(0, &StepOutcome::Cancelled), Transition::Cancel);
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1), 2.0);
        assert!(matches!(
            policy.next(0, &StepOutcome::Transient("x".to_string())),
            Transition::Fail(_)
        ));
    }
}
