//! E2E tests for complete capture sessions
//!
//! Drives the orchestrator against a simulated sampling device in both
//! timeline roles. The simulated device clock runs at exactly wall clock
//! rate with a fixed offset, and the timeline reads zero when the device
//! clock reads zero, so a pulse centred at device time `t` seconds should be
//! reported `t` seconds into the test pattern.

use approx::assert_abs_diff_eq;
use std::sync::Arc;
use synctester::analysis::compare::CompareError;
use synctester::capture::device::SimulatedDevice;
use synctester::capture::session::SessionError;
use synctester::clock::source::{CorrelatedClock, ManualWallClock, WallClock};
use synctester::dispersion;
use synctester::{
    CaptureOrchestrator, ClockCorrelation, ClockCorrelationTracker, ExpectedTimings,
    MeasurementConfig, Modality, Pin, PinSet, Role,
};

/// Wall clock minus device clock in the simulated device
const WALL_OFFSET: i64 = 1_000_000_000_000;

/// Sampling starts at device time 1 s and runs for 2 s
const INTERVALS: usize = 2000;

const PATTERN: [f64; 7] = [0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5];

fn config() -> MeasurementConfig {
    MeasurementConfig {
        timeline_tick_rate: 1000.0,
        ..MeasurementConfig::default()
    }
}

/// First interval of a 10 ms pulse centred at device time `secs` plus `delay_ms`
fn pulse_start(secs: f64, delay_ms: usize) -> usize {
    ((secs - 1.0) * 1000.0).round() as usize - 5 + delay_ms
}

fn starts(centres: &[f64], delay_ms: usize) -> Vec<usize> {
    centres.iter().map(|&c| pulse_start(c, delay_ms)).collect()
}

fn expected(pins: &[Pin]) -> ExpectedTimings {
    let mut expected = ExpectedTimings::new();
    for &pin in pins {
        expected.insert(pin, PATTERN.to_vec(), Some(0.010));
    }
    expected
}

fn timeline_origin() -> ClockCorrelation {
    ClockCorrelation {
        observed_at: 0,
        wall_clock: WALL_OFFSET,
        timeline: 0.0,
        speed: 1.0,
    }
}

#[test]
fn test_consumer_session_end_to_end() {
    let device = SimulatedDevice::new(INTERVALS)
        .with_pulses(0, Modality::Light, &starts(&[1.5, 2.0, 2.5], 3), 10)
        .with_pulses(1, Modality::Audio, &starts(&[1.5, 2.0, 2.5], 0), 10);
    let pins = PinSet::new([Pin::Light0, Pin::Audio0]).unwrap();

    let mut session = CaptureOrchestrator::new(
        device,
        Role::Consumer(ClockCorrelationTracker::new(1000.0)),
        pins,
        expected(&[Pin::Light0, Pin::Audio0]),
        config(),
    )
    .unwrap();

    let feed = session.correlation_feed().expect("consumer has a feed");
    assert!(feed.record(timeline_origin()));

    session.capture().unwrap();
    let package = session.detect(&dispersion::constant(0.0)).unwrap();
    assert_eq!(package.len(), 2);
    assert_eq!(package[0].pin, Pin::Light0);
    assert_eq!(package[1].pin, Pin::Audio0);

    let light = session.compare(&session.test_package()[0]).unwrap();
    assert_eq!(light.offset, 2, "first flash should match the one at 1.5 s");
    for d in &light.differences {
        assert_abs_diff_eq!(d.diff_secs, 0.003, epsilon = 1e-6);
        // 100 us half round trip, 2 us precision, one tick, half an interval
        assert_abs_diff_eq!(d.error_secs, 0.000102 + 0.001 + 0.0005, epsilon = 1e-6);
    }

    let audio = session.compare(&session.test_package()[1]).unwrap();
    assert_eq!(audio.offset, 2);
    for d in &audio.differences {
        assert_abs_diff_eq!(d.diff_secs, 0.0, epsilon = 1e-6);
    }
}

#[test]
fn test_owner_session_end_to_end() {
    let wall = Arc::new(ManualWallClock::new(WALL_OFFSET));
    let parent: Arc<dyn WallClock> = wall.clone();
    let timeline = Arc::new(CorrelatedClock::new(parent, 1000.0, 0.0));
    // Capture happens two seconds after the timeline started
    wall.advance(2_000_000_000);

    // A flash is already lit when sampling begins
    let mut flashes = vec![0];
    flashes.extend(starts(&[1.5, 2.0, 2.5], 0));
    let device = SimulatedDevice::new(INTERVALS).with_pulses(2, Modality::Light, &flashes, 10);
    let mut session = CaptureOrchestrator::new(
        device,
        Role::Owner(timeline),
        PinSet::new([Pin::Light1]).unwrap(),
        expected(&[Pin::Light1]),
        config(),
    )
    .unwrap();
    assert!(session.correlation_feed().is_none());

    session.capture().unwrap();
    session.detect(&dispersion::constant(0.0)).unwrap();

    let entry = &session.test_package()[0];
    let result = session.compare(entry).unwrap();
    // The flash in progress at the start is not reported
    assert_eq!(entry.observed.len(), 3);
    assert_eq!(result.offset, 2);
    for d in &result.differences {
        assert_abs_diff_eq!(d.diff_secs, 0.0, epsilon = 1e-6);
    }
}

#[test]
fn test_silent_pin_omitted_from_package() {
    let device = SimulatedDevice::new(INTERVALS)
        .with_pulses(0, Modality::Light, &starts(&[1.5, 2.0], 0), 10)
        .with_pulses(3, Modality::Audio, &[], 10);
    let mut session = CaptureOrchestrator::new(
        device,
        Role::Consumer(ClockCorrelationTracker::new(1000.0)),
        PinSet::new([Pin::Light0, Pin::Audio1]).unwrap(),
        expected(&[Pin::Light0, Pin::Audio1]),
        config(),
    )
    .unwrap();
    session.correlation_feed().unwrap().record(timeline_origin());

    session.capture().unwrap();
    let package = session.detect(&dispersion::constant(0.0)).unwrap();
    assert_eq!(package.len(), 1);
    assert_eq!(package[0].pin, Pin::Light0);
}

#[test]
fn test_dubious_pin_does_not_stop_others() {
    let device = SimulatedDevice::new(INTERVALS)
        .with_pulses(0, Modality::Light, &starts(&[1.5, 2.0, 2.5], 0), 10)
        .with_pulses(2, Modality::Light, &starts(&[1.5, 2.0, 2.5], 0), 10);
    let mut expected = expected(&[Pin::Light0]);
    // Only one expected event for a pin that will see three
    expected.insert(Pin::Light1, vec![2.0], Some(0.010));

    let mut session = CaptureOrchestrator::new(
        device,
        Role::Consumer(ClockCorrelationTracker::new(1000.0)),
        PinSet::new([Pin::Light0, Pin::Light1]).unwrap(),
        expected,
        config(),
    )
    .unwrap();
    session.correlation_feed().unwrap().record(timeline_origin());
    session.capture().unwrap();
    session.detect(&dispersion::constant(0.0)).unwrap();

    let results = session.compare_all();
    assert_eq!(results.len(), 2);
    assert!(results[0].1.is_ok());
    assert_eq!(
        results[1].1,
        Err(CompareError::DubiousInput {
            observed: 3,
            expected: 1
        })
    );
}

#[test]
fn test_correlations_from_listener_thread() {
    let device = SimulatedDevice::new(INTERVALS).with_pulses(
        0,
        Modality::Light,
        &starts(&[1.5, 2.0, 2.5], 0),
        10,
    );
    let mut session = CaptureOrchestrator::new(
        device,
        Role::Consumer(ClockCorrelationTracker::new(1000.0)),
        PinSet::new([Pin::Light0]).unwrap(),
        expected(&[Pin::Light0]),
        config(),
    )
    .unwrap();

    // The listener reports the same timeline repeatedly while capture runs
    let feed = session.correlation_feed().unwrap();
    let listener = std::thread::spawn(move || {
        for i in 0..20i64 {
            let at = WALL_OFFSET + i * 200_000_000;
            feed.record(ClockCorrelation {
                observed_at: at,
                wall_clock: at,
                timeline: (i * 200) as f64,
                speed: 1.0,
            });
        }
    });
    session.capture().unwrap();
    listener.join().unwrap();

    session.detect(&dispersion::constant(0.0)).unwrap();
    let result = session.compare(&session.test_package()[0]).unwrap();
    assert_eq!(result.offset, 2);
    for d in &result.differences {
        assert_abs_diff_eq!(d.diff_secs, 0.0, epsilon = 1e-6);
    }

    let recording = session.recording(None).unwrap();
    assert_eq!(recording.correlations.len(), 20);
}

#[test]
fn test_pin_count_mismatch_aborts_session() {
    let err = CaptureOrchestrator::new(
        SimulatedDevice::new(INTERVALS).misreport_active_pins(3),
        Role::Consumer(ClockCorrelationTracker::new(1000.0)),
        PinSet::new([Pin::Light0, Pin::Audio0]).unwrap(),
        expected(&[Pin::Light0, Pin::Audio0]),
        config(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        SessionError::PinCountMismatch {
            requested: 2,
            active: 3
        }
    ));
}
