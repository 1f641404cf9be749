//! # Restart backoff policy.
//!
//! [`BackoffPolicy`] controls how restart delays grow while a service keeps
//! crashing. It is parameterized by:
//! - [`BackoffPolicy::first`] the floor delay;
//! - [`BackoffPolicy::max`] the delay ceiling;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use servitor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::supervision();
//!
//! // First restart waits the floor.
//! assert_eq!(backoff.next(None), Duration::from_secs(1));
//!
//! // Each further crash doubles the wait…
//! assert_eq!(backoff.next(Some(Duration::from_secs(1))), Duration::from_secs(2));
//!
//! // …up to the ceiling.
//! assert_eq!(backoff.next(Some(Duration::from_secs(40))), Duration::from_secs(60));
//! ```

use std::time::Duration;

use crate::policies::JitterPolicy;

/// Restart backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Floor delay before the first restart.
    pub first: Duration,
    /// Ceiling the delay never exceeds.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a constant-delay policy: `first = 100ms`, `max = 30s`,
    /// `factor = 1.0`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// The policy used for supervised services: exponential from a 1 s floor
    /// to a 60 s ceiling.
    pub fn supervision() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the next delay from the previous one.
    ///
    /// - If `prev` is `None`, returns `first` clamped to `max`.
    /// - Otherwise multiplies the previous delay by [`BackoffPolicy::factor`]
    ///   and caps it at [`BackoffPolicy::max`].
    ///
    /// [`JitterPolicy::Decorrelated`] ignores the multiplicative growth and
    /// instead draws relative to the previous delay, bounded by the floor
    /// and ceiling.
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        let grown = match prev {
            None => self.first,
            Some(d) => {
                let mul = d.as_secs_f64() * self.factor;
                if mul.is_finite() {
                    d.mul_f64(self.factor)
                } else {
                    self.max
                }
            }
        };
        match self.jitter {
            JitterPolicy::Decorrelated => {
                let floor = self.first.min(self.max);
                self.jitter
                    .apply_decorrelated(floor, prev.unwrap_or(floor), self.max)
            }
            _ => self.jitter.apply(grown.min(self.max)),
        }
    }
}
