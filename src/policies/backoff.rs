//! # Delay before respawning a crashed worker.
//!
//! The delay grows with the crash streak (crashes since some worker last
//! reached `Listening`): `first × factor^(streak - 1)`, capped at `max`, then
//! jittered. The base is derived from the streak alone, so jitter never
//! accumulates from one respawn to the next.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use clustervisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(2),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//! assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
//! assert_eq!(backoff.delay_for(20), Duration::from_secs(2));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Respawn delay parameters.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay for the first crash of a streak.
    pub first: Duration,
    /// Upper bound on the delay (before jitter).
    pub max: Duration,
    /// Growth per additional crash (`1.0` = constant).
    pub factor: f64,
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 100ms`, `factor = 2.0`, `max = 10s`, `Equal` jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Constant delay, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay for the `streak`-th consecutive crash (1-based; `0` is treated as `1`).
    pub fn delay_for(&self, streak: u32) -> Duration {
        let exp = i32::try_from(streak.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if secs.is_finite() && secs >= 0.0 && secs < self.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };
        self.jitter.apply(base.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn grows_geometrically_until_capped() {
        let p = policy(2.0);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(4), Duration::from_millis(800));
        assert_eq!(p.delay_for(5), Duration::from_secs(1));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn unit_factor_is_constant() {
        let p = policy(1.0);
        for streak in 1..20 {
            assert_eq!(p.delay_for(streak), Duration::from_millis(100));
        }
    }

    #[test]
    fn first_above_max_is_capped() {
        let p = BackoffPolicy {
            first: Duration::from_secs(5),
            ..policy(2.0)
        };
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
    }

    #[test]
    fn fixed_ignores_the_streak() {
        let p = BackoffPolicy::fixed(Duration::from_millis(30));
        assert_eq!(p.delay_for(1), p.delay_for(9));
    }

    #[test]
    fn jitter_never_exceeds_the_base() {
        let p = BackoffPolicy {
            jitter: JitterPolicy::Full,
            ..policy(2.0)
        };
        for streak in 1..12 {
            assert!(p.delay_for(streak) <= Duration::from_secs(1));
        }
    }
}
