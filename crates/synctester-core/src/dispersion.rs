//! Wall clock dispersion claimed by the device under test
//!
//! The detector asks for the dispersion at each event's wall clock time.
//! Any `Fn(f64) -> f64` works as a source; [`DispersionRecorder`] replays
//! the adjustments a wall clock client made during the measurement.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispersionError {
    #[error("No dispersion recorded at or before wall clock time {0}")]
    NoEntry(f64),
}

/// Maps a wall clock time (nanos) to the dispersion (nanos) claimed then
pub trait DispersionSource {
    fn dispersion_at(&self, wall_nanos: f64) -> Result<f64, DispersionError>;
}

impl<F> DispersionSource for F
where
    F: Fn(f64) -> f64,
{
    fn dispersion_at(&self, wall_nanos: f64) -> Result<f64, DispersionError> {
        Ok(self(wall_nanos))
    }
}

/// Same dispersion at every wall clock time
pub fn constant(nanos: f64) -> impl Fn(f64) -> f64 + Copy {
    move |_| nanos
}

/// One adjustment made by a wall clock client
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispersionChange {
    /// Wall clock time (nanos) after the adjustment
    pub when: f64,
    /// Amount the clock was moved by (nanos)
    pub adjustment: f64,
    pub old_dispersion: f64,
    pub new_dispersion: f64,
    /// Dispersion growth per nanosecond elapsed
    pub growth_rate: f64,
}

/// History of wall clock adjustments and their dispersion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispersionRecorder {
    #[serde(skip)]
    recording: bool,
    history: Vec<DispersionChange>,
}

impl DispersionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.recording = true;
    }

    pub fn stop(&mut self) {
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Record an adjustment; ignored unless started
    pub fn record(&mut self, change: DispersionChange) -> bool {
        if !self.recording {
            return false;
        }
        tracing::trace!(
            when = change.when,
            adjustment = change.adjustment,
            dispersion = change.new_dispersion,
            "dispersion_recorded"
        );
        self.history.push(change);
        true
    }

    pub fn history(&self) -> &[DispersionChange] {
        &self.history
    }
}

impl DispersionSource for DispersionRecorder {
    /// Extrapolate from the last entry recorded at or before `wall_nanos`
    ///
    /// Adjustments can move the clock backwards, so the whole history is
    /// scanned rather than stopping at the first later entry.
    fn dispersion_at(&self, wall_nanos: f64) -> Result<f64, DispersionError> {
        self.history
            .iter()
            .filter(|c| c.when <= wall_nanos)
            .last()
            .map(|c| c.new_dispersion + c.growth_rate * (wall_nanos - c.when))
            .ok_or(DispersionError::NoEntry(wall_nanos))
    }
}
