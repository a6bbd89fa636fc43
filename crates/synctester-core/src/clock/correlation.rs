//! Wall clock to synchronisation timeline correlations
//!
//! A [`ClockCorrelation`] is a segment boundary: it states how the timeline
//! relates to the wall clock from the moment it was observed until the next
//! correlation supersedes it. The [`CorrelationLog`] is append-only and is
//! read by the pulse detector once capture has finished.
//!
//! When the measurement system follows somebody else's timeline, the
//! protocol listener pushes correlations through a [`CorrelationFeed`]. The
//! feed is a channel, so the listener can run on any thread while a capture
//! is in progress; the [`ClockCorrelationTracker`] drains it afterwards.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use super::source::TimelineClock;
use super::ClockError;
use crate::WALL_CLOCK_TICK_RATE;

/// One observed mapping between wall clock and timeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockCorrelation {
    /// Local wall clock time (nanos) when the correlation was observed
    pub observed_at: i64,
    /// Wall clock time (nanos) of the correlation point
    pub wall_clock: i64,
    /// Timeline position (ticks) at `wall_clock`
    pub timeline: f64,
    /// Timeline speed multiplier from this correlation onwards
    pub speed: f64,
}

impl ClockCorrelation {
    /// Take a correlation directly from the clock pair owned by this system
    ///
    /// The returned correlation is observed at the wall clock time it
    /// describes.
    pub fn snapshot(timeline: &dyn TimelineClock) -> Self {
        let timeline_now = timeline.ticks();
        let wall_now = timeline.to_wall_clock_ticks(timeline_now).round() as i64;
        Self {
            observed_at: wall_now,
            wall_clock: wall_now,
            timeline: timeline_now,
            speed: timeline.speed(),
        }
    }

    /// Timeline position at a wall clock time, extrapolated from this correlation
    pub fn timeline_at(&self, wall_nanos: f64, tick_rate: f64) -> f64 {
        self.timeline
            + (wall_nanos - self.wall_clock as f64) * self.speed * tick_rate / WALL_CLOCK_TICK_RATE
    }
}

/// How to resolve a wall clock time that falls between two correlations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// Extrapolate from the most recent correlation only
    #[default]
    Extrapolate,
    /// Blend towards the next correlation when both share the same speed
    Interpolate,
}

/// Append-only sequence of correlations in arrival order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationLog {
    entries: Vec<ClockCorrelation>,
}

impl CorrelationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, correlation: ClockCorrelation) {
        self.entries.push(correlation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClockCorrelation> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[ClockCorrelation] {
        &self.entries
    }

    /// Convert a wall clock time to a timeline time by extrapolation
    ///
    /// # Errors
    /// [`ClockError::EmptyCorrelationLog`] if nothing has been recorded.
    pub fn resolve(&self, wall_nanos: f64, tick_rate: f64) -> Result<f64, ClockError> {
        TimelineReconstructor::new(self, tick_rate, Resolution::Extrapolate)?
            .resolve(wall_nanos)
    }
}

impl FromIterator<ClockCorrelation> for CorrelationLog {
    fn from_iter<I: IntoIterator<Item = ClockCorrelation>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Piecewise-linear wall clock to timeline conversion over a correlation log
///
/// A wall clock time is resolved using the latest correlation observed at
/// or before it. Times earlier than every correlation use the earliest one.
/// A speed change only applies from the correlation that announces it.
#[derive(Debug, Clone)]
pub struct TimelineReconstructor {
    /// Sorted by observation time; arrival order kept among equal times
    segments: Vec<ClockCorrelation>,
    tick_rate: f64,
    resolution: Resolution,
}

impl TimelineReconstructor {
    /// # Errors
    /// [`ClockError::EmptyCorrelationLog`] if the log is empty.
    pub fn new(
        log: &CorrelationLog,
        tick_rate: f64,
        resolution: Resolution,
    ) -> Result<Self, ClockError> {
        if log.is_empty() {
            return Err(ClockError::EmptyCorrelationLog);
        }
        let mut segments = log.entries.clone();
        segments.sort_by_key(|c| c.observed_at);
        Ok(Self {
            segments,
            tick_rate,
            resolution,
        })
    }

    pub fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    /// Index of the segment governing `wall_nanos`
    fn segment_index(&self, wall_nanos: f64) -> usize {
        let after = self
            .segments
            .partition_point(|c| c.observed_at as f64 <= wall_nanos);
        after.saturating_sub(1)
    }

    /// Timeline position (ticks) at a wall clock time (nanos)
    pub fn resolve(&self, wall_nanos: f64) -> Result<f64, ClockError> {
        let index = self.segment_index(wall_nanos);
        let current = self
            .segments
            .get(index)
            .ok_or(ClockError::EmptyCorrelationLog)?;
        let extrapolated = current.timeline_at(wall_nanos, self.tick_rate);

        if self.resolution == Resolution::Extrapolate || (current.observed_at as f64) > wall_nanos
        {
            return Ok(extrapolated);
        }

        match self.segments.get(index + 1) {
            Some(next) if next.speed == current.speed && next.observed_at > current.observed_at => {
                let towards = next.timeline_at(wall_nanos, self.tick_rate);
                let span = (next.observed_at - current.observed_at) as f64;
                let frac = (wall_nanos - current.observed_at as f64) / span;
                Ok(extrapolated + (towards - extrapolated) * frac)
            }
            _ => Ok(extrapolated),
        }
    }
}

/// Sending half handed to a protocol listener
///
/// Cloneable; recording never blocks.
#[derive(Debug, Clone)]
pub struct CorrelationFeed {
    tx: Sender<ClockCorrelation>,
}

impl CorrelationFeed {
    /// Push a correlation towards the tracker
    ///
    /// Returns `false` if the tracker has been dropped.
    pub fn record(&self, correlation: ClockCorrelation) -> bool {
        match self.tx.try_send(correlation) {
            Ok(()) => true,
            Err(TrySendError::Disconnected(_)) | Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    observed_at = correlation.observed_at,
                    "correlation_dropped"
                );
                false
            }
        }
    }
}

/// Collects correlations from a protocol feed into an append-only log
#[derive(Debug)]
pub struct ClockCorrelationTracker {
    tx: Sender<ClockCorrelation>,
    rx: Receiver<ClockCorrelation>,
    log: CorrelationLog,
    tick_rate: f64,
}

impl ClockCorrelationTracker {
    /// Create an empty tracker for a timeline ticking at `tick_rate` Hz
    pub fn new(tick_rate: f64) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            log: CorrelationLog::new(),
            tick_rate,
        }
    }

    /// A new sending handle for a protocol listener
    pub fn feed(&self) -> CorrelationFeed {
        CorrelationFeed {
            tx: self.tx.clone(),
        }
    }

    /// Append a correlation observed on the current thread
    pub fn record(&mut self, correlation: ClockCorrelation) {
        self.drain();
        self.append(correlation);
    }

    fn append(&mut self, correlation: ClockCorrelation) {
        tracing::trace!(
            observed_at = correlation.observed_at,
            wall_clock = correlation.wall_clock,
            timeline = correlation.timeline,
            speed = correlation.speed,
            "correlation_recorded"
        );
        self.log.push(correlation);
    }

    /// Move everything the feeds have sent so far into the log
    ///
    /// Returns the number of correlations appended.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Ok(correlation) = self.rx.try_recv() {
            self.append(correlation);
            count += 1;
        }
        count
    }

    /// Log as of the last drain
    pub fn log(&self) -> &CorrelationLog {
        &self.log
    }

    pub fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    /// Convert a wall clock time (nanos) to timeline ticks
    ///
    /// # Errors
    /// [`ClockError::EmptyCorrelationLog`] if no correlation has arrived.
    pub fn resolve(&mut self, wall_nanos: f64) -> Result<f64, ClockError> {
        self.drain();
        self.log.resolve(wall_nanos, self.tick_rate)
    }
}
