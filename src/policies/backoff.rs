//! # Backoff between consumer-group subscription attempts.
//!
//! The delay before retry `n` (0-indexed) is `first × factor^n`, clamped to
//! `max`, then jittered. The base is derived from the retry number alone, so a
//! jittered delay never feeds into the next one.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use channel_dispatcher::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(200),
//!     max: Duration::from_secs(5),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.delay(0), Duration::from_millis(200));
//! assert_eq!(backoff.delay(3), Duration::from_millis(1600));
//! assert_eq!(backoff.delay(20), Duration::from_secs(5));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Exponential backoff with a cap and optional jitter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth factor per retry (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied to the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 200ms`, `factor = 2.0`, `max = 30s`, `jitter = Equal`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(200),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// A constant delay without jitter.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        self.jitter.apply(self.base(retry))
    }

    /// Capped delay before jitter.
    fn base(&self, retry: u32) -> Duration {
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn grows_exponentially_without_jitter() {
        let p = policy(JitterPolicy::None);
        let delays: Vec<_> = (0..5).map(|n| p.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
    }

    #[test]
    fn caps_at_max() {
        let p = policy(JitterPolicy::None);
        assert_eq!(p.delay(30), Duration::from_secs(10));
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn first_above_max_is_clamped() {
        let p = BackoffPolicy {
            first: Duration::from_secs(60),
            ..policy(JitterPolicy::None)
        };
        assert_eq!(p.delay(0), Duration::from_secs(10));
    }

    #[test]
    fn constant_policy_never_grows() {
        let p = BackoffPolicy::constant(Duration::from_millis(50));
        for n in 0..20 {
            assert_eq!(p.delay(n), Duration::from_millis(50));
        }
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let p = policy(JitterPolicy::Equal);
        for n in 0..12 {
            let base = p.base(n);
            let d = p.delay(n);
            assert!(d >= base / 2, "retry {n}: {d:?} below half of {base:?}");
            assert!(d <= base, "retry {n}: {d:?} above {base:?}");
        }
    }

    #[test]
    fn full_jitter_never_exceeds_base() {
        let p = policy(JitterPolicy::Full);
        for n in 0..12 {
            assert!(p.delay(n) <= p.base(n));
        }
    }
}
