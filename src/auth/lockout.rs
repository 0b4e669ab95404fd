//! Account lockout after repeated login failures.
//!
//! An account is locked while `locked_until` lies in the future. Failures increment a
//! counter; reaching the configured maximum locks the account for a fixed interval. A
//! failure that finds an expired lock restarts the count at one, counting itself.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockoutState {
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    pub fn cleared() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    max_attempts: i32,
    lock_duration: Duration,
}

impl LockoutPolicy {
    pub fn new(max_attempts: i32, lock_duration: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lock_duration,
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    pub fn is_locked(&self, state: &LockoutState, now: DateTime<Utc>) -> bool {
        matches!(state.locked_until, Some(until) if until > now)
    }

    /// State to persist after a failed password check.
    ///
    /// Callers reject locked accounts before checking the password, so `state` is never
    /// locked at `now` in practice; a locked state is returned unchanged.
    pub fn register_failure(&self, state: &LockoutState, now: DateTime<Utc>) -> LockoutState {
        match state.locked_until {
            Some(until) if until > now => *state,
            Some(_) => LockoutState {
                failed_attempts: 1,
                locked_until: None,
            },
            None => {
                let failed_attempts = state.failed_attempts.saturating_add(1);
                let locked_until = if failed_attempts >= self.max_attempts {
                    Some(now + self.lock_duration)
                } else {
                    None
                };
                LockoutState {
                    failed_attempts,
                    locked_until,
                }
            }
        }
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new(5, Duration::hours(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
    }

    #[test]
    fn locks_when_threshold_reached() {
        let policy = LockoutPolicy::default();
        let mut state = LockoutState::cleared();
        for attempt in 1..=4 {
            state = policy.register_failure(&state, at(attempt));
            assert_eq!(state.failed_attempts, attempt as i32);
            assert!(!policy.is_locked(&state, at(attempt)));
        }

        state = policy.register_failure(&state, at(5));
        assert_eq!(state.failed_attempts, 5);
        assert_eq!(state.locked_until, Some(at(5) + Duration::hours(2)));
        assert!(policy.is_locked(&state, at(6)));
    }

    #[test]
    fn failure_while_locked_does_not_extend_lock() {
        let policy = LockoutPolicy::new(2, Duration::minutes(10));
        let locked = LockoutState {
            failed_attempts: 2,
            locked_until: Some(at(600)),
        };
        let after = policy.register_failure(&locked, at(60));
        assert_eq!(after, locked);
    }

    #[test]
    fn expired_lock_restarts_count_at_one() {
        let policy = LockoutPolicy::default();
        let expired = LockoutState {
            failed_attempts: 5,
            locked_until: Some(at(100)),
        };
        assert!(!policy.is_locked(&expired, at(101)));

        let after = policy.register_failure(&expired, at(101));
        assert_eq!(
            after,
            LockoutState {
                failed_attempts: 1,
                locked_until: None,
            }
        );
    }

    #[test]
    fn lock_boundary_is_exclusive() {
        let policy = LockoutPolicy::default();
        let state = LockoutState {
            failed_attempts: 5,
            locked_until: Some(at(100)),
        };
        assert!(policy.is_locked(&state, at(99)));
        assert!(!policy.is_locked(&state, at(100)));
    }
}
