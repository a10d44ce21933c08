//! Bounded waiting for a condition to hold, e.g. a service reporting "up"
//! after it was started. This is the only bounded-wait primitive; the
//! executor itself never retries.

use crate::core::failure::{RunError, RunResult};
use std::thread;
use std::time::Duration;

/// Delay between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// `step * attempt`: 1s, 2s, 3s... for a one-second step.
    Linear(Duration),
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(step) => step.saturating_mul(attempt),
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(4, Backoff::Linear(Duration::from_secs(1)))
    }
}

/// Calls `probe` until it returns `true`. Returns the attempt number that
/// succeeded, or `PollTimeout` after `max_attempts` negative observations.
/// Errors raised by the probe itself propagate immediately.
pub fn await_condition(
    what: &str,
    policy: &PollPolicy,
    mut probe: impl FnMut() -> RunResult<bool>,
) -> RunResult<u32> {
    for attempt in 1..=policy.max_attempts {
        if probe()? {
            log::debug!("{} confirmed on attempt {}", what, attempt);
            return Ok(attempt);
        }
        if attempt == policy.max_attempts {
            break;
        }
        let delay = policy.backoff.delay_for_attempt(attempt);
        println!("waiting for {} ({}/{})", what, attempt, policy.max_attempts);
        thread::sleep(delay);
    }
    Err(RunError::PollTimeout {
        what: what.to_string(),
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn probe_true_on(n: u32, calls: &Cell<u32>) -> impl FnMut() -> RunResult<bool> + '_ {
        move || {
            calls.set(calls.get() + 1);
            Ok(calls.get() >= n)
        }
    }

    #[test]
    fn test_succeeds_on_fourth_attempt() {
        let calls = Cell::new(0);
        let policy = PollPolicy::new(5, Backoff::None);
        let attempt = await_condition("nginx", &policy, probe_true_on(4, &calls)).unwrap();
        assert_eq!(attempt, 4);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_times_out_after_max_attempts() {
        let calls = Cell::new(0);
        let policy = PollPolicy::new(3, Backoff::None);
        let err = await_condition("nginx", &policy, probe_true_on(4, &calls)).unwrap_err();
        assert!(matches!(err, RunError::PollTimeout { attempts: 3, .. }));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_probe_error_propagates_without_retry() {
        let calls = Cell::new(0);
        let policy = PollPolicy::new(5, Backoff::None);
        let err = await_condition("db", &policy, || {
            calls.set(calls.get() + 1);
            Err(RunError::ExplicitAbort("probe failed".into()))
        })
        .unwrap_err();
        assert!(matches!(err, RunError::ExplicitAbort(ref m) if m == "probe failed"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_backoff_delays() {
        let step = Duration::from_secs(1);
        assert_eq!(Backoff::Linear(step).delay_for_attempt(3), Duration::from_secs(3));
        assert_eq!(Backoff::Fixed(step).delay_for_attempt(7), step);
        let exp = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(exp.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(exp.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(exp.delay_for_attempt(5), Duration::from_millis(500));
    }
}
