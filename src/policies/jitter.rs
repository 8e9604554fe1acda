//! Jitter policy for retry delays.
//!
//! [`JitterPolicy`] adds randomness to backoff delays so that several host
//! tasks retrying against the same window do not hammer a recovering
//! service in lockstep.

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of retry delays.
///
/// - **None**: predictable, exact backoff delays (default; matches the
///   deterministic behavior tests rely on)
/// - **Full**: random delay in `[0, delay]`, most aggressive spreading
/// - **Equal**: `delay/2 + random[0, delay/2]`, balanced
/// - **Decorrelated**: grows from the previous delay independently of the
///   attempt number; needs extra context via
///   [`apply_decorrelated`](Self::apply_decorrelated)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// `delay/2 + random[0, delay/2]`.
    Equal,
    /// `random[base, prev × 3]`, capped at max.
    Decorrelated,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    ///
    /// For `Decorrelated` this returns the input unchanged; use
    /// [`apply_decorrelated`](Self::apply_decorrelated), which takes the
    /// required context (base, previous delay, max).
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => full_jitter(delay),
            JitterPolicy::Equal => equal_jitter(delay),
            JitterPolicy::Decorrelated => delay,
        }
    }

    /// Applies decorrelated jitter with full context.
    ///
    /// Falls back to `apply(prev)` when called on a non-decorrelated policy.
    pub fn apply_decorrelated(&self, base: Duration, prev: Duration, max: Duration) -> Duration {
        if !matches!(self, JitterPolicy::Decorrelated) {
            return self.apply(prev);
        }

        let mut rng = rand::rng();
        let base_ms = base.as_millis() as u64;
        let prev_ms = prev.as_millis() as u64;
        let max_ms = max.as_millis() as u64;

        let upper = prev_ms.saturating_mul(3).min(max_ms).max(base_ms);
        if base_ms >= upper {
            return base;
        }
        Duration::from_millis(rng.random_range(base_ms..=upper))
    }
}

fn full_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

fn equal_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(750);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn full_jitter_stays_within_bounds() {
        let d = Duration::from_millis(1000);
        for _ in 0..50 {
            assert!(JitterPolicy::Full.apply(d) <= d);
        }
    }

    #[test]
    fn equal_jitter_keeps_at_least_half() {
        let d = Duration::from_millis(1000);
        for _ in 0..50 {
            let j = JitterPolicy::Equal.apply(d);
            assert!(j >= Duration::from_millis(500));
            assert!(j <= d);
        }
    }

    #[test]
    fn decorrelated_respects_floor_and_cap() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(10);
        for _ in 0..50 {
            let j = JitterPolicy::Decorrelated.apply_decorrelated(
                base,
                Duration::from_secs(4),
                max,
            );
            assert!(j >= base);
            assert!(j <= max);
        }
    }
}
