//! Wall clock and synchronisation timeline clock handles
//!
//! When the measurement system owns the synchronisation timeline it holds
//! both clocks and can snapshot their relationship directly. The wall clock
//! counts nanoseconds; the timeline counts ticks at its own tick rate and
//! may run at any speed relative to the wall clock.

use chrono::Utc;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::WALL_CLOCK_TICK_RATE;

/// Source of wall clock time in nanoseconds
pub trait WallClock: Send + Sync + fmt::Debug {
    /// Current wall clock reading (nanoseconds)
    fn ticks(&self) -> i64;
}

/// Synchronisation timeline clock driven from a wall clock
pub trait TimelineClock: Send + Sync + fmt::Debug {
    /// Current timeline position (ticks)
    fn ticks(&self) -> f64;

    /// Current rate multiplier relative to the wall clock
    fn speed(&self) -> f64;

    /// Ticks per second of the timeline
    fn tick_rate(&self) -> f64;

    /// Convert a timeline tick value into the wall clock time (nanoseconds)
    /// at which the timeline reads that value
    fn to_wall_clock_ticks(&self, ticks: f64) -> f64;
}

/// Wall clock backed by the system clock
///
/// Anchored to UTC once at construction, then advanced by a monotonic
/// [`Instant`] so that readings never go backwards.
#[derive(Debug)]
pub struct SystemWallClock {
    anchor_nanos: i64,
    anchor: Instant,
}

impl SystemWallClock {
    pub fn new() -> Self {
        Self {
            anchor_nanos: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemWallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for SystemWallClock {
    fn ticks(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_nanos()).unwrap_or(i64::MAX);
        self.anchor_nanos.saturating_add(elapsed)
    }
}

/// Correlation state of a [`CorrelatedClock`]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Correlation {
    parent_ticks: f64,
    child_ticks: f64,
    speed: f64,
}

/// Timeline clock defined by a correlation with a wall clock
///
/// `ticks = child + (wall - parent) * speed * tick_rate / 1e9`
pub struct CorrelatedClock {
    parent: Arc<dyn WallClock>,
    tick_rate: f64,
    state: Mutex<Correlation>,
}

impl CorrelatedClock {
    /// Create a clock reading `start_ticks` now and running at normal speed
    pub fn new(parent: Arc<dyn WallClock>, tick_rate: f64, start_ticks: f64) -> Self {
        let now = parent.ticks() as f64;
        Self {
            parent,
            tick_rate,
            state: Mutex::new(Correlation {
                parent_ticks: now,
                child_ticks: start_ticks,
                speed: 1.0,
            }),
        }
    }

    fn state(&self) -> Correlation {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut Correlation)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }

    fn ticks_at(state: Correlation, tick_rate: f64, wall: f64) -> f64 {
        state.child_ticks
            + (wall - state.parent_ticks) * state.speed * tick_rate / WALL_CLOCK_TICK_RATE
    }

    /// Current correlation as `(wall clock nanos, timeline ticks)`
    pub fn correlation(&self) -> (f64, f64) {
        let state = self.state();
        (state.parent_ticks, state.child_ticks)
    }

    pub fn set_correlation(&self, parent_ticks: f64, child_ticks: f64) {
        self.update(|s| {
            s.parent_ticks = parent_ticks;
            s.child_ticks = child_ticks;
        });
    }

    pub fn set_speed(&self, speed: f64) {
        self.update(|s| s.speed = speed);
    }

    /// Freeze the timeline at its current position
    pub fn pause(&self) {
        let wall = self.parent.ticks() as f64;
        let tick_rate = self.tick_rate;
        self.update(|s| {
            s.child_ticks = Self::ticks_at(*s, tick_rate, wall);
            s.parent_ticks = wall;
            s.speed = 0.0;
        });
    }

    /// Resume the timeline at normal speed from where it was paused
    pub fn unpause(&self) {
        let wall = self.parent.ticks() as f64;
        self.update(|s| {
            s.parent_ticks = wall;
            s.speed = 1.0;
        });
    }
}

impl fmt::Debug for CorrelatedClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelatedClock")
            .field("tick_rate", &self.tick_rate)
            .field("state", &self.state())
            .finish()
    }
}

impl TimelineClock for CorrelatedClock {
    fn ticks(&self) -> f64 {
        Self::ticks_at(self.state(), self.tick_rate, self.parent.ticks() as f64)
    }

    fn speed(&self) -> f64 {
        self.state().speed
    }

    fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    fn to_wall_clock_ticks(&self, ticks: f64) -> f64 {
        let state = self.state();
        if state.speed == 0.0 {
            // A paused timeline reads the same value at every wall clock time
            return state.parent_ticks;
        }
        state.parent_ticks
            + (ticks - state.child_ticks) * WALL_CLOCK_TICK_RATE / (state.speed * self.tick_rate)
    }
}

/// Wall clock that only moves when told to. Used for tests and replays.
#[derive(Debug, Default)]
pub struct ManualWallClock {
    nanos: Mutex<i64>,
}

impl ManualWallClock {
    pub fn new(start_nanos: i64) -> Self {
        Self {
            nanos: Mutex::new(start_nanos),
        }
    }

    pub fn set(&self, nanos: i64) {
        *self.nanos.lock().unwrap_or_else(PoisonError::into_inner) = nanos;
    }

    pub fn advance(&self, nanos: i64) {
        *self.nanos.lock().unwrap_or_else(PoisonError::into_inner) += nanos;
    }
}

impl WallClock for ManualWallClock {
    fn ticks(&self) -> i64 {
        *self.nanos.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_system_wall_clock_is_monotonic() {
        let clock = SystemWallClock::new();
        let a = clock.ticks();
        let b = clock.ticks();
        assert!(b >= a);
        assert!(a > 1_400_000_000_000_000_000, "Should be anchored to UTC");
    }

    #[test]
    fn test_correlated_clock_follows_parent() {
        let wall = Arc::new(ManualWallClock::new(1_000_000_000));
        let clock = CorrelatedClock::new(wall.clone(), 90_000.0, 500.0);

        assert_abs_diff_eq!(clock.ticks(), 500.0);
        wall.advance(1_000_000_000);
        assert_abs_diff_eq!(clock.ticks(), 90_500.0);
    }

    #[test]
    fn test_to_wall_clock_ticks_inverts_ticks() {
        let wall = Arc::new(ManualWallClock::new(5_000_000_000));
        let clock = CorrelatedClock::new(wall.clone(), 1000.0, 0.0);
        clock.set_speed(2.0);

        wall.advance(250_000_000);
        let ticks = clock.ticks();
        assert_abs_diff_eq!(ticks, 500.0);
        assert_abs_diff_eq!(clock.to_wall_clock_ticks(ticks), 5_250_000_000.0);
    }

    #[test]
    fn test_pause_and_unpause() {
        let wall = Arc::new(ManualWallClock::new(0));
        let clock = CorrelatedClock::new(wall.clone(), 1000.0, 100.0);

        wall.advance(1_000_000_000);
        clock.pause();
        assert_abs_diff_eq!(clock.ticks(), 1100.0);
        assert_eq!(clock.speed(), 0.0);

        wall.advance(3_000_000_000);
        assert_abs_diff_eq!(clock.ticks(), 1100.0);

        clock.unpause();
        wall.advance(1_000_000_000);
        assert_abs_diff_eq!(clock.ticks(), 2100.0);
        assert_eq!(clock.speed(), 1.0);
    }
}
