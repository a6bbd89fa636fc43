//! Pulse detection over a whole capture
//!
//! [`PulseDetector`] combines the per-channel pulse extraction with the
//! clock calibration of one capture, producing event times on the
//! synchronisation timeline.

use crate::capture::device::CaptureWindow;
use crate::capture::repackage::Channel;
use crate::clock::correlation::{CorrelationLog, Resolution, TimelineReconstructor};
use crate::dispersion::DispersionSource;
use crate::pins::Pin;

use super::pulse::pulse_centers;
use super::timing::{
    DeviceClockMap, DeviceToTimeline, Precision, SampleBoundaries, TimelinePoint, TimingError,
};

/// Centre time of one detected flash or beep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedEvent {
    /// Timeline position (ticks)
    pub time: f64,
    /// Uncertainty either side of `time` (ticks)
    pub error_bound: f64,
}

impl From<TimelinePoint> for DetectedEvent {
    fn from(point: TimelinePoint) -> Self {
        Self {
            time: point.ticks,
            error_bound: point.error_ticks,
        }
    }
}

/// Events detected on one pin, in sample order
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEvent {
    pub pin: Pin,
    pub events: Vec<DetectedEvent>,
}

impl ObservedEvent {
    pub fn times(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.time).collect()
    }

    pub fn error_bounds(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.error_bound).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Detects pulses in captured channels and places them on the timeline
#[derive(Debug, Clone)]
pub struct PulseDetector {
    window: CaptureWindow,
    device_clock: DeviceClockMap,
    timeline: TimelineReconstructor,
}

impl PulseDetector {
    /// Calibrate for one capture
    ///
    /// Wall clock to timeline conversion interpolates between correlations
    /// where the timeline speed did not change.
    ///
    /// # Errors
    /// Fails if the round trips cannot calibrate the device clock or if no
    /// correlation was recorded.
    pub fn new(
        window: &CaptureWindow,
        correlations: &CorrelationLog,
        tick_rate: f64,
        precision: Precision,
    ) -> Result<Self, TimingError> {
        Self::with_resolution(window, correlations, tick_rate, precision, Resolution::Interpolate)
    }

    pub fn with_resolution(
        window: &CaptureWindow,
        correlations: &CorrelationLog,
        tick_rate: f64,
        precision: Precision,
        resolution: Resolution,
    ) -> Result<Self, TimingError> {
        let window = window.unwrapped();
        Ok(Self {
            window,
            device_clock: DeviceClockMap::from_window(&window, precision)?,
            timeline: TimelineReconstructor::new(correlations, tick_rate, resolution)?,
        })
    }

    /// Detect events in one channel
    ///
    /// A channel with no pulses gives an empty result, not an error.
    pub fn detect(
        &self,
        channel: &Channel,
        dispersion: &dyn DispersionSource,
    ) -> Result<ObservedEvent, TimingError> {
        let centers = pulse_centers(channel);
        let boundaries = SampleBoundaries::new(
            self.window.due_start_nanos(),
            self.window.due_finish_nanos(),
            channel.len(),
        );
        let converter = DeviceToTimeline {
            device_clock: &self.device_clock,
            timeline: &self.timeline,
            dispersion,
        };

        let events = centers
            .into_iter()
            .map(|center| boundaries.event_at(center, &converter).map(DetectedEvent::from))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(pin = %channel.pin, events = events.len(), "channel_detected");
        Ok(ObservedEvent {
            pin: channel.pin,
            events,
        })
    }
}
