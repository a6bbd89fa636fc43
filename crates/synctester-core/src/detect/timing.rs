//! Device clock to timeline conversion with error bounds
//!
//! Three clock domains are involved. The device clock is related to the
//! wall clock by the round trip exchanges bracketing the capture; the wall
//! clock is related to the synchronisation timeline by the correlation log.
//! Every conversion carries an error bound that accumulates the round trip
//! uncertainty, the dispersion claimed for the wall clock and the one tick
//! precision limit of the timeline.

use thiserror::Error;

use crate::capture::device::{CaptureWindow, RoundTrip};
use crate::clock::correlation::TimelineReconstructor;
use crate::clock::ClockError;
use crate::dispersion::{DispersionError, DispersionSource};
use crate::WALL_CLOCK_TICK_RATE;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimingError {
    #[error("Calibration points do not span any time (from {from} to {to})")]
    DegenerateSpan { from: f64, to: f64 },

    #[error("Cannot bound error at {value}: outside calibrated range {low} to {high}")]
    OutOfRange { value: f64, low: f64, high: f64 },

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Dispersion error: {0}")]
    Dispersion(#[from] DispersionError),
}

/// Measurement precision of the two clocks involved in a round trip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Precision {
    /// Wall clock measurement precision (nanos)
    pub wall_clock_nanos: f64,
    /// Device clock measurement precision (nanos)
    pub device_clock_nanos: f64,
}

/// Straight line through two correlation points, extrapolated beyond them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearMap {
    a1: f64,
    b1: f64,
    slope: f64,
}

impl LinearMap {
    pub fn through((a1, b1): (f64, f64), (a2, b2): (f64, f64)) -> Result<Self, TimingError> {
        if a1 == a2 {
            return Err(TimingError::DegenerateSpan { from: a1, to: a2 });
        }
        Ok(Self {
            a1,
            b1,
            slope: (b2 - b1) / (a2 - a1),
        })
    }

    pub fn convert(&self, a: f64) -> f64 {
        (a - self.a1) * self.slope + self.b1
    }
}

/// Linear interpolation of an error bound between two readings
///
/// Refuses to extrapolate: outside the readings nothing is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorBoundInterpolator {
    low: f64,
    high: f64,
    map: LinearMap,
}

impl ErrorBoundInterpolator {
    pub fn new((v1, e1): (f64, f64), (v2, e2): (f64, f64)) -> Result<Self, TimingError> {
        if v1 >= v2 {
            return Err(TimingError::DegenerateSpan { from: v1, to: v2 });
        }
        Ok(Self {
            low: v1,
            high: v2,
            map: LinearMap::through((v1, e1.abs()), (v2, e2.abs()))?,
        })
    }

    pub fn at(&self, value: f64) -> Result<f64, TimingError> {
        if value < self.low || value > self.high {
            return Err(TimingError::OutOfRange {
                value,
                low: self.low,
                high: self.high,
            });
        }
        Ok(self.map.convert(value))
    }
}

/// One device/wall clock correlation and its dispersion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub device_nanos: f64,
    pub wall_nanos: f64,
    pub dispersion_nanos: f64,
}

impl Calibration {
    /// Midpoints of the exchange on both clocks; dispersion is half the
    /// round trip time not spent inside the device, plus both precisions
    pub fn from_round_trip(exchange: &RoundTrip, precision: Precision) -> Self {
        let t1 = exchange.request_sent as f64;
        let t2 = exchange.device_received as f64;
        let t3 = exchange.device_responded as f64;
        let t4 = exchange.response_received as f64;
        let round_trip = (t4 - t1) - (t3 - t2);
        Self {
            device_nanos: (t2 + t3) / 2.0,
            wall_nanos: (t1 + t4) / 2.0,
            dispersion_nanos: round_trip / 2.0
                + precision.wall_clock_nanos
                + precision.device_clock_nanos,
        }
    }
}

/// Device clock to wall clock mapping over one capture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceClockMap {
    to_wall: LinearMap,
    error: ErrorBoundInterpolator,
}

impl DeviceClockMap {
    /// Calibrate from the exchanges before and after sampling
    ///
    /// The window must already be unwrapped.
    pub fn from_window(window: &CaptureWindow, precision: Precision) -> Result<Self, TimingError> {
        let pre = Calibration::from_round_trip(&window.pre, precision);
        let post = Calibration::from_round_trip(&window.post, precision);
        tracing::debug!(
            pre_dispersion_nanos = pre.dispersion_nanos,
            post_dispersion_nanos = post.dispersion_nanos,
            "device_clock_calibrated"
        );
        Ok(Self {
            to_wall: LinearMap::through(
                (pre.device_nanos, pre.wall_nanos),
                (post.device_nanos, post.wall_nanos),
            )?,
            error: ErrorBoundInterpolator::new(
                (pre.device_nanos, pre.dispersion_nanos),
                (post.device_nanos, post.dispersion_nanos),
            )?,
        })
    }

    pub fn wall_at(&self, device_nanos: f64) -> f64 {
        self.to_wall.convert(device_nanos)
    }

    /// Error bound (nanos) on the wall clock estimate for a device time
    pub fn error_at(&self, device_nanos: f64) -> Result<f64, TimingError> {
        self.error.at(device_nanos)
    }
}

/// Timeline position and its error bound, both in ticks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelinePoint {
    pub ticks: f64,
    pub error_ticks: f64,
}

/// Converts device clock times to timeline times with error bounds
pub struct DeviceToTimeline<'a> {
    pub device_clock: &'a DeviceClockMap,
    pub timeline: &'a TimelineReconstructor,
    pub dispersion: &'a dyn DispersionSource,
}

impl DeviceToTimeline<'_> {
    pub fn convert(&self, device_nanos: f64) -> Result<TimelinePoint, TimingError> {
        let wall = self.device_clock.wall_at(device_nanos);
        let ticks = self.timeline.resolve(wall)?;

        let error_nanos =
            self.device_clock.error_at(device_nanos)? + self.dispersion.dispersion_at(wall)?;
        let tick_rate = self.timeline.tick_rate();
        // Timeline values are only good to one tick either way
        let error_ticks = error_nanos * tick_rate / WALL_CLOCK_TICK_RATE + 1.0;

        Ok(TimelinePoint { ticks, error_ticks })
    }
}

/// Evenly spaced sample interval boundaries on the device clock
///
/// Boundary `i` is the start of interval `i` (and the end of interval
/// `i - 1`); there are `count + 1` of them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleBoundaries {
    first_start: f64,
    last_end: f64,
    count: usize,
}

impl SampleBoundaries {
    pub fn new(first_start_nanos: f64, last_end_nanos: f64, count: usize) -> Self {
        Self {
            first_start: first_start_nanos,
            last_end: last_end_nanos,
            count,
        }
    }

    /// Device time (nanos) of boundary `i`
    pub fn device_nanos(&self, i: usize) -> f64 {
        if self.count == 0 {
            return self.first_start;
        }
        self.first_start + (self.last_end - self.first_start) * i as f64 / self.count as f64
    }

    /// Timeline time of a pulse centred on a fractional interval index
    ///
    /// Interpolates between the boundaries either side of the centre, then
    /// widens the error by half an interval since the pulse could lie
    /// anywhere within its sample period.
    pub fn event_at(
        &self,
        center_index: f64,
        converter: &DeviceToTimeline<'_>,
    ) -> Result<TimelinePoint, TimingError> {
        // Centre of interval k is half an interval after boundary k
        let index = center_index + 0.5;
        let floor = index.floor();
        let frac = index - floor;
        let lower = floor.max(0.0) as usize;
        let upper = (lower + 1).min(self.count);

        let first = converter.convert(self.device_nanos(lower))?;
        let second = converter.convert(self.device_nanos(upper))?;

        let ticks = frac * second.ticks + (1.0 - frac) * first.ticks;
        let error = frac * second.error_ticks + (1.0 - frac) * first.error_ticks;
        let sample_error = (second.ticks - first.ticks) / 2.0;

        Ok(TimelinePoint {
            ticks,
            error_ticks: error + sample_error,
        })
    }
}
