//! One capture session from pin activation to per-pin results
//!
//! A session is single shot: construct it, call [`CaptureOrchestrator::capture`]
//! once, then [`CaptureOrchestrator::detect`] once. Comparison is pure and
//! may be repeated per pin afterwards.
//!
//! The measurement system either publishes the synchronisation timeline
//! itself ([`Role::Owner`]) or follows one published by the device under
//! test ([`Role::Consumer`]). An owner snapshots its own clocks either side
//! of the capture. A consumer relies on the correlations its protocol
//! listener pushed through the tracker's feed while the capture ran.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::device::{check_capture_time, max_capture_secs, CaptureDevice, CaptureWindow, DeviceError};
use super::recording::CaptureRecording;
use super::repackage::{repackage, RepackageError};
use crate::analysis::compare::{CompareError, ComparisonResult, SequenceComparator};
use crate::clock::correlation::{ClockCorrelation, ClockCorrelationTracker, CorrelationFeed, CorrelationLog};
use crate::clock::source::TimelineClock;
use crate::config::{ExpectedTimings, MeasurementConfig};
use crate::detect::{DetectedEvent, PulseDetector, TimingError};
use crate::dispersion::DispersionSource;
use crate::pins::{Pin, PinError, PinSet};

/// Errors that abort a capture session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Pin error: {0}")]
    Pin(#[from] PinError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("{0}")]
    Repackage(#[from] RepackageError),

    #[error("Timing error: {0}")]
    Timing(#[from] TimingError),

    #[error("{0}")]
    Compare(#[from] CompareError),

    #[error("Device activated {active} pins but {requested} were requested")]
    PinCountMismatch { requested: usize, active: usize },

    #[error("Correlation tracker ticks at {tracker} Hz but the session timeline ticks at {session} Hz")]
    TickRateMismatch { tracker: f64, session: f64 },

    #[error("No expected event times supplied for {0}")]
    MissingExpectedTimes(Pin),

    #[error("Capture of {requested_secs}s does not fit the device buffer (at most {max_secs}s for {pins} pins)")]
    CaptureTooLong {
        requested_secs: i64,
        max_secs: u64,
        pins: usize,
    },

    #[error("Detection requested before a capture was taken")]
    CaptureNotTaken,

    #[error("Session already captured")]
    AlreadyCaptured,
}

/// How the session learns the wall clock to timeline relationship
#[derive(Debug)]
pub enum Role {
    /// This system publishes the timeline and can read it directly
    Owner(Arc<dyn TimelineClock>),
    /// The timeline is published elsewhere and reported over a protocol feed
    Consumer(ClockCorrelationTracker),
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Owner(_) => "owner",
            Role::Consumer(_) => "consumer",
        }
    }
}

/// Observed and expected timings for one pin
#[derive(Debug, Clone, PartialEq)]
pub struct TestEntry {
    pub pin: Pin,
    /// Detected events in sample order
    pub observed: Vec<DetectedEvent>,
    /// Expected event times (seconds since the pattern started)
    pub expected_secs: Vec<f64>,
}

impl TestEntry {
    /// Observed event times (timeline ticks)
    pub fn observed_times(&self) -> Vec<f64> {
        self.observed.iter().map(|e| e.time).collect()
    }
}

#[derive(Debug, Clone)]
struct CaptureData {
    window: CaptureWindow,
    interval_count: usize,
    raw: Vec<u8>,
    /// Owner role only; a consumer reads its tracker at detection time
    snapshots: Option<CorrelationLog>,
}

/// Drives one capture session end to end
#[derive(Debug)]
pub struct CaptureOrchestrator<D: CaptureDevice> {
    device: D,
    role: Role,
    pins: PinSet,
    expected: ExpectedTimings,
    config: MeasurementConfig,
    capture: Option<CaptureData>,
    test_package: Vec<TestEntry>,
}

impl<D: CaptureDevice> CaptureOrchestrator<D> {
    /// Activate the requested pins and prepare the device
    ///
    /// # Errors
    /// Fails without retrying if the device reports a different number of
    /// active pins than requested, since that means the wiring or firmware
    /// does not match. Also fails if a pin has no expected times, the
    /// requested duration does not fit the device buffer, or a consumer
    /// tracker runs at a different tick rate from the session timeline.
    pub fn new(
        mut device: D,
        role: Role,
        pins: PinSet,
        expected: ExpectedTimings,
        config: MeasurementConfig,
    ) -> Result<Self, SessionError> {
        if let Some(pin) = pins.iter().find(|&p| expected.times_for(p).is_none()) {
            return Err(SessionError::MissingExpectedTimes(pin));
        }
        if let Role::Consumer(tracker) = &role {
            if tracker.tick_rate() != config.timeline_tick_rate {
                return Err(SessionError::TickRateMismatch {
                    tracker: tracker.tick_rate(),
                    session: config.timeline_tick_rate,
                });
            }
        }

        let capture_secs = check_capture_time(config.capture_secs, pins.len()).ok_or(
            SessionError::CaptureTooLong {
                requested_secs: config.capture_secs,
                max_secs: max_capture_secs(pins.len()),
                pins: pins.len(),
            },
        )?;

        for pin in pins.iter() {
            device.activate(config.pin_map.index(pin))?;
        }
        let active = device.prepare(Duration::from_secs(capture_secs))?;
        if active != pins.len() {
            return Err(SessionError::PinCountMismatch {
                requested: pins.len(),
                active,
            });
        }

        tracing::info!(
            role = role.name(),
            pins = pins.len(),
            capture_secs,
            "session_prepared"
        );

        Ok(Self {
            device,
            role,
            pins,
            expected,
            config,
            capture: None,
            test_package: Vec::new(),
        })
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn pins(&self) -> &PinSet {
        &self.pins
    }

    /// Sending handle for the protocol listener; consumer role only
    pub fn correlation_feed(&self) -> Option<CorrelationFeed> {
        match &self.role {
            Role::Consumer(tracker) => Some(tracker.feed()),
            Role::Owner(_) => None,
        }
    }

    /// Run the capture and fetch the samples
    ///
    /// # Errors
    /// [`SessionError::AlreadyCaptured`] on a second call; device errors
    /// are passed through.
    pub fn capture(&mut self) -> Result<(), SessionError> {
        if self.capture.is_some() {
            return Err(SessionError::AlreadyCaptured);
        }

        let pre = match &self.role {
            Role::Owner(timeline) => Some(ClockCorrelation::snapshot(timeline.as_ref())),
            Role::Consumer(_) => None,
        };

        let result = self.device.capture()?;
        let raw = self.device.bulk_transfer()?;

        let snapshots = match &mut self.role {
            Role::Owner(timeline) => {
                let post = ClockCorrelation::snapshot(timeline.as_ref());
                Some(pre.into_iter().chain([post]).collect())
            }
            Role::Consumer(tracker) => {
                tracker.drain();
                None
            }
        };

        tracing::info!(
            intervals = result.interval_count,
            bytes = raw.len(),
            due_start_micros = result.window.due_start_micros,
            due_finish_micros = result.window.due_finish_micros,
            "capture_complete"
        );

        self.capture = Some(CaptureData {
            window: result.window,
            interval_count: result.interval_count,
            raw,
            snapshots,
        });
        Ok(())
    }

    /// Correlations detection will use, as of now
    fn correlations(&mut self) -> Result<CorrelationLog, SessionError> {
        let capture = self.capture.as_ref().ok_or(SessionError::CaptureNotTaken)?;
        match (&mut self.role, &capture.snapshots) {
            (Role::Owner(_), Some(log)) => Ok(log.clone()),
            (Role::Consumer(tracker), _) => {
                tracker.drain();
                Ok(tracker.log().clone())
            }
            (Role::Owner(_), None) => Err(SessionError::CaptureNotTaken),
        }
    }

    /// Detect flashes and beeps on every active pin
    ///
    /// `dispersion` reports the wall clock dispersion claimed by the device
    /// under test at any wall clock time. Pins on which nothing was detected
    /// are left out of the result.
    ///
    /// # Errors
    /// A corrupt buffer, an uncalibratable capture or a missing correlation
    /// abort detection for the whole session.
    pub fn detect(&mut self, dispersion: &dyn DispersionSource) -> Result<&[TestEntry], SessionError> {
        let correlations = self.correlations()?;
        let capture = self.capture.as_ref().ok_or(SessionError::CaptureNotTaken)?;

        let channels = repackage(
            &self.pins,
            &self.config.pin_map,
            &capture.raw,
            capture.interval_count,
        )?;
        let detector = PulseDetector::new(
            &capture.window,
            &correlations,
            self.config.timeline_tick_rate,
            self.config.precision(),
        )?;

        let mut package = Vec::new();
        for channel in channels.into_values() {
            let duration = self.expected.duration_for(channel.pin);
            let channel = channel.with_event_duration(duration);
            let observed = detector.detect(&channel, dispersion)?;
            if observed.is_empty() {
                tracing::debug!(pin = %channel.pin, "no_events_detected");
                continue;
            }
            package.push(TestEntry {
                pin: channel.pin,
                observed: observed.events,
                expected_secs: self
                    .expected
                    .times_for(channel.pin)
                    .map(<[f64]>::to_vec)
                    .unwrap_or_default(),
            });
        }

        tracing::info!(
            pins = package.len(),
            correlations = correlations.len(),
            "detection_complete"
        );
        self.test_package = package;
        Ok(&self.test_package)
    }

    /// Entries produced by the last detection pass
    pub fn test_package(&self) -> &[TestEntry] {
        &self.test_package
    }

    /// Comparator for this session's pattern origin and tick rate
    pub fn comparator(&self) -> SequenceComparator {
        SequenceComparator::new(self.config.video_start_ticks, self.config.timeline_tick_rate)
    }

    /// Compare one entry with its expected pattern
    pub fn compare(&self, entry: &TestEntry) -> Result<ComparisonResult, CompareError> {
        self.comparator().compare(&entry.observed, &entry.expected_secs)
    }

    /// Compare every entry; a pin that cannot be compared does not stop the rest
    pub fn compare_all(&self) -> Vec<(Pin, Result<ComparisonResult, CompareError>)> {
        self.test_package
            .iter()
            .map(|entry| {
                let result = self.compare(entry);
                if let Err(e) = &result {
                    tracing::warn!(pin = %entry.pin, error = %e, "comparison_skipped");
                }
                (entry.pin, result)
            })
            .collect()
    }

    /// Everything needed to repeat detection offline
    ///
    /// `dispersion_nanos` is the worst case wall clock dispersion claimed
    /// during the capture; a replay applies it as a constant.
    ///
    /// # Errors
    /// [`SessionError::CaptureNotTaken`] before [`Self::capture`].
    pub fn recording(
        &mut self,
        dispersion_nanos: Option<f64>,
    ) -> Result<CaptureRecording, SessionError> {
        let correlations = self.correlations()?;
        let capture = self.capture.as_ref().ok_or(SessionError::CaptureNotTaken)?;
        Ok(CaptureRecording {
            recorded_at: Utc::now(),
            pins: self.pins.iter().collect(),
            pin_map: self.config.pin_map,
            interval_count: capture.interval_count,
            window: capture.window,
            samples: capture.raw.clone(),
            correlations,
            dispersion_nanos,
        })
    }
}
