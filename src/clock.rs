//! Monotonic time source and data-freshness checks.
//!
//! Every temporal decision in the engine (staleness, rate limits, the
//! alcohol override window) goes through a [`Clock`] so that behaviour is
//! insensitive to wall-clock jumps. Wall-clock timestamps appear only on
//! snapshots, for telemetry.

use std::sync::Arc;
use std::time::Instant;

use crate::{FusionError, Result};

/// Monotonic time source in seconds.
pub trait Clock: Send + Sync {
    /// Seconds elapsed on this clock's monotonic timeline.
    fn now(&self) -> f64;
}

/// Production clock anchored at construction time.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: parking_lot::Mutex<f64>,
}

impl ManualClock {
    /// Create a manual clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manual clock starting at `now` seconds.
    pub fn starting_at(now: f64) -> Self {
        Self {
            now: parking_lot::Mutex::new(now),
        }
    }

    /// Advance the clock by `secs`.
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }

    /// Set the clock to an absolute value.
    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

/// Freshness predicates over a shared clock.
#[derive(Clone)]
pub struct FreshnessOracle {
    clock: Arc<dyn Clock>,
}

impl FreshnessOracle {
    /// Create an oracle over the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Current monotonic time in seconds.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// True when `timestamp_s` is no older than `max_age_s`.
    ///
    /// Timestamps from the future (clock skew between producers) count as
    /// fresh; ordering violations are handled separately by the ingress
    /// layer.
    pub fn is_fresh(&self, timestamp_s: f64, max_age_s: f64) -> bool {
        self.clock.now() - timestamp_s <= max_age_s
    }

    /// Freshness check that fails with [`FusionError::StaleSample`].
    pub fn ensure_fresh(&self, timestamp_s: f64, max_age_s: f64) -> Result<()> {
        let age_s = self.clock.now() - timestamp_s;
        if age_s > max_age_s {
            return Err(FusionError::StaleSample { age_s, max_age_s });
        }
        Ok(())
    }
}

impl std::fmt::Debug for FreshnessOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshnessOracle")
            .field("now", &self.clock.now())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::starting_at(100.0);
        assert_eq!(clock.now(), 100.0);
        clock.advance(2.5);
        assert_eq!(clock.now(), 102.5);
        clock.set(50.0);
        assert_eq!(clock.now(), 50.0);
    }

    #[test]
    fn test_freshness_boundary() {
        let clock = Arc::new(ManualClock::starting_at(10.0));
        let oracle = FreshnessOracle::new(clock.clone());

        // Exactly at max age is still fresh
        assert!(oracle.is_fresh(5.0, 5.0));
        assert!(oracle.ensure_fresh(5.0, 5.0).is_ok());

        clock.advance(0.1);
        assert!(!oracle.is_fresh(5.0, 5.0));

        let err = oracle.ensure_fresh(5.0, 5.0).unwrap_err();
        match err {
            FusionError::StaleSample { age_s, max_age_s } => {
                assert!(age_s > 5.0);
                assert_eq!(max_age_s, 5.0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_future_timestamps_are_fresh() {
        let clock = Arc::new(ManualClock::starting_at(10.0));
        let oracle = FreshnessOracle::new(clock);
        assert!(oracle.is_fresh(12.0, 5.0));
    }
}
