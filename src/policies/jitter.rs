//! # Jitter policy for restart delays.
//!
//! [`JitterPolicy`] adds randomness to backoff delays so that a tree of
//! services all crashing at once (say, a shared dependency went away) does
//! not hammer it back in lockstep.
//!
//! - [`JitterPolicy::None`] no randomization, predictable delays
//! - [`JitterPolicy::Full`] random delay in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2 + random[0, delay/2]`
//! - [`JitterPolicy::Decorrelated`] random in `[floor, prev * 3]`, capped

use std::time::Duration;

use rand::Rng;

/// Policy controlling randomization of restart delays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    ///
    /// The default; restart timing stays deterministic, which is what the
    /// test suite and most single-service trees want.
    None,

    /// Full jitter: random delay in `[0, delay]`.
    ///
    /// Most aggressive spreading; can shrink the delay to zero.
    Full,

    /// Equal jitter: `delay/2 + random[0, delay/2]`.
    ///
    /// Preserves at least half of the computed backoff.
    Equal,

    /// Decorrelated jitter: random in `[floor, min(prev * 3, max)]`.
    ///
    /// Stateful: the next delay is drawn relative to the previous one, so
    /// it needs context that plain [`JitterPolicy::apply`] does not carry.
    /// Applied through [`JitterPolicy::apply_decorrelated`]; `apply`
    /// returns the delay unchanged for this variant.
    Decorrelated,
}

impl Default for JitterPolicy {
    /// Returns [`JitterPolicy::None`].
    fn default() -> Self {
        JitterPolicy::None
    }
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => full_jitter(delay),
            JitterPolicy::Equal => equal_jitter(delay),
            JitterPolicy::Decorrelated => delay,
        }
    }

    /// Applies decorrelated jitter with its full context.
    ///
    /// - `floor`: minimal delay (the backoff floor)
    /// - `prev`: previous actual delay
    /// - `max`: delay ceiling
    ///
    /// On a non-`Decorrelated` policy this falls back to `apply(floor)`.
    pub fn apply_decorrelated(&self, floor: Duration, prev: Duration, max: Duration) -> Duration {
        if !matches!(self, JitterPolicy::Decorrelated) {
            return self.apply(floor);
        }
        let floor_ms = whole_millis(floor);
        let prev_ms = whole_millis(prev);
        let max_ms = whole_millis(max);

        // Upper bound is min(prev * 3, max), but never below the floor.
        let upper = prev_ms.saturating_mul(3).min(max_ms).max(floor_ms);
        if floor_ms >= upper {
            return floor;
        }
        Duration::from_millis(rand::rng().random_range(floor_ms..=upper))
    }
}

/// Random in `[0, delay]`.
fn full_jitter(delay: Duration) -> Duration {
    let ms = whole_millis(delay);
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

/// `delay/2 + random[0, delay/2]`.
fn equal_jitter(delay: Duration) -> Duration {
    let ms = whole_millis(delay);
    if ms == 0 {
        return Duration::ZERO;
    }
    let half = ms / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::rng().random_range(0..=half)
    };
    Duration::from_millis(half + jitter)
}

fn whole_millis(d: Duration) -> u64 {
    (d.as_millis().min(u128::from(u64::MAX))) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_secs(3);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn full_stays_within_bounds() {
        let d = Duration::from_millis(500);
        for _ in 0..100 {
            let j = JitterPolicy::Full.apply(d);
            assert!(j <= d);
        }
    }

    #[test]
    fn equal_keeps_at_least_half() {
        let d = Duration::from_millis(500);
        for _ in 0..100 {
            let j = JitterPolicy::Equal.apply(d);
            assert!(j >= d / 2);
            assert!(j <= d);
        }
    }

    #[test]
    fn decorrelated_stays_between_floor_and_cap() {
        let floor = Duration::from_millis(100);
        let max = Duration::from_secs(10);
        let mut prev = floor;
        for _ in 0..100 {
            let next = JitterPolicy::Decorrelated.apply_decorrelated(floor, prev, max);
            assert!(next >= floor);
            assert!(next <= max);
            prev = next;
        }
    }

    #[test]
    fn decorrelated_returns_the_floor_when_the_range_collapses() {
        let floor = Duration::from_secs(5);
        // prev * 3 stays at or below the floor, so there is nothing to draw.
        let next = JitterPolicy::Decorrelated.apply_decorrelated(
            floor,
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        assert_eq!(next, floor);
    }

    #[test]
    fn decorrelated_through_apply_is_identity() {
        let d = Duration::from_secs(2);
        assert_eq!(JitterPolicy::Decorrelated.apply(d), d);
    }

    #[test]
    fn non_decorrelated_falls_back_to_apply() {
        let floor = Duration::from_millis(200);
        let out = JitterPolicy::None.apply_decorrelated(
            floor,
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        assert_eq!(out, floor);
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }
}
