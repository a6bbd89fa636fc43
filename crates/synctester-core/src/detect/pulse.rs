//! Pulse extraction from per-interval sample series
//!
//! Thresholds are calibrated against the data itself: the rising threshold
//! sits two thirds of the way from the quietest to the loudest reading and
//! the falling threshold one third of the way. A hold count bridges short
//! dips inside one pulse (backlight flicker, badly shaped tone bursts).

use crate::capture::repackage::Channel;
use crate::pins::Modality;

/// Smallest swing (in sample counts) that can contain a pulse
pub const NOISE_FLOOR_COUNTS: f64 = 8.0;

/// Rising and falling edge thresholds for one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Quietest level seen on the channel
    pub floor: f64,
    /// Loudest level seen on the channel
    pub peak: f64,
    pub rising: f64,
    pub falling: f64,
}

impl Thresholds {
    /// Calibrate from the lowest and highest level seen
    pub fn from_range(floor: f64, peak: f64) -> Self {
        Self {
            floor,
            peak,
            rising: (floor + 2.0 * peak) / 3.0,
            falling: (2.0 * floor + peak) / 3.0,
        }
    }

    /// Difference between the loudest and quietest level
    pub fn swing(&self) -> f64 {
        self.peak - self.floor
    }

    /// Whether the swing is large enough to contain any pulse
    pub fn above_noise_floor(&self) -> bool {
        self.swing() > NOISE_FLOOR_COUNTS
    }
}

/// Per-interval envelope size (`max - min`)
pub fn envelope(min: &[u8], max: &[u8]) -> Vec<f64> {
    min.iter()
        .zip(max)
        .map(|(&lo, &hi)| f64::from(hi) - f64::from(lo))
        .collect()
}

/// Series the pulse state machine runs over, with its thresholds
///
/// Light sensors report brightness directly so the maximum series is used.
/// Audio is AC coupled around mid-scale, so a beep shows up as a wide
/// envelope rather than a high reading.
pub fn detection_series(channel: &Channel) -> Option<(Vec<f64>, Thresholds)> {
    match channel.modality {
        Modality::Light => {
            let floor = channel.min.iter().min()?;
            let peak = channel.max.iter().max()?;
            let series = channel.max.iter().map(|&v| f64::from(v)).collect();
            Some((series, Thresholds::from_range(f64::from(*floor), f64::from(*peak))))
        }
        Modality::Audio => {
            let series = envelope(&channel.min, &channel.max);
            let floor = series.iter().copied().reduce(f64::min)?;
            let peak = series.iter().copied().reduce(f64::max)?;
            Some((series, Thresholds::from_range(floor, peak)))
        }
    }
}

/// Hold and minimum-width parameters, in sample intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseShape {
    /// Intervals a pulse is held high after dropping below the falling threshold
    pub hold_count: usize,
    /// Shortest run reported as a pulse
    pub min_count: usize,
}

impl Default for PulseShape {
    fn default() -> Self {
        Self {
            hold_count: 0,
            min_count: 1,
        }
    }
}

impl PulseShape {
    /// Derive from the approximate event duration (seconds)
    ///
    /// Flashes must last at least half their nominal duration; beeps three
    /// quarters. Both hold for half the duration.
    pub fn from_hint(modality: Modality, duration_secs: Option<f64>) -> Self {
        let Some(duration) = duration_secs.filter(|d| d.is_finite() && *d > 0.0) else {
            return Self::default();
        };
        let min_fraction = match modality {
            Modality::Light => 0.5,
            Modality::Audio => 0.75,
        };
        Self {
            hold_count: intervals(duration * 0.5),
            min_count: intervals(duration * min_fraction),
        }
    }
}

/// Whole 1 ms intervals in a duration, truncated
fn intervals(secs: f64) -> usize {
    (secs * 1000.0) as usize
}

/// Half-open run `[start, end)` of intervals forming one pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseRun {
    pub start: usize,
    pub end: usize,
}

impl PulseRun {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Plain midpoint index of the run
    pub fn midpoint(&self) -> f64 {
        (self.start + self.end - 1) as f64 / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Low,
    High,
}

/// Two-threshold pulse state machine
///
/// Starts in the high state and discards the run that initial state closes,
/// so a pulse already under way when sampling began is never reported with
/// a truncated width.
pub fn detect_runs(series: &[f64], thresholds: &Thresholds, shape: PulseShape) -> Vec<PulseRun> {
    let mut runs = Vec::new();
    let mut state = EdgeState::High;
    let mut ignore_first = true;
    let mut rise_index = 0usize;
    let mut latest_high: Option<usize> = None;

    for (i, &v) in series.iter().enumerate() {
        match state {
            EdgeState::Low => {
                if v >= thresholds.rising {
                    state = EdgeState::High;
                    rise_index = i;
                    latest_high = Some(i);
                }
            }
            EdgeState::High => {
                if v > thresholds.falling {
                    latest_high = Some(i);
                    continue;
                }
                let since_high = latest_high.map_or(i + 1, |h| i - h);
                if since_high <= shape.hold_count {
                    continue;
                }
                state = EdgeState::Low;
                if !ignore_first {
                    let run = PulseRun {
                        start: rise_index,
                        end: latest_high.map_or(0, |h| h + 1),
                    };
                    if run.len() >= shape.min_count {
                        runs.push(run);
                    }
                }
                ignore_first = false;
            }
        }
    }

    runs
}

/// Centre of a run, weighted by how far each interval rises above the floor
///
/// A flat-topped pulse gives the plain midpoint.
pub fn weighted_center(series: &[f64], run: PulseRun, floor: f64) -> f64 {
    let (sum, weighted) = (run.start..run.end)
        .filter_map(|i| series.get(i).map(|v| (i, (v - floor).max(0.0))))
        .fold((0.0, 0.0), |(sum, weighted), (i, w)| {
            (sum + w, weighted + w * i as f64)
        });
    if sum > 0.0 {
        weighted / sum
    } else {
        run.midpoint()
    }
}

/// Sample indices (fractional) of the centres of every pulse in a channel
pub fn pulse_centers(channel: &Channel) -> Vec<f64> {
    let Some((series, thresholds)) = detection_series(channel) else {
        return Vec::new();
    };
    if !thresholds.above_noise_floor() {
        tracing::debug!(
            pin = %channel.pin,
            swing = thresholds.swing(),
            "channel_below_noise_floor"
        );
        return Vec::new();
    }

    let shape = PulseShape::from_hint(channel.modality, channel.event_duration);
    let runs = detect_runs(&series, &thresholds, shape);
    tracing::debug!(
        pin = %channel.pin,
        rising = thresholds.rising,
        falling = thresholds.falling,
        hold = shape.hold_count,
        min = shape.min_count,
        pulses = runs.len(),
        "pulses_detected"
    );
    runs.into_iter()
        .map(|run| weighted_center(&series, run, thresholds.floor))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::Pin;
    use approx::assert_abs_diff_eq;

    fn square(len: usize, pulses: &[(usize, usize)], lo: f64, hi: f64) -> Vec<f64> {
        let mut series = vec![lo; len];
        for &(start, width) in pulses {
            for v in series.iter_mut().skip(start).take(width) {
                *v = hi;
            }
        }
        series
    }

    #[test]
    fn test_thresholds() {
        let t = Thresholds::from_range(30.0, 210.0);
        assert_abs_diff_eq!(t.rising, 150.0);
        assert_abs_diff_eq!(t.falling, 90.0);
        assert_abs_diff_eq!(t.swing(), 180.0);
        assert!(t.above_noise_floor());
        assert!(!Thresholds::from_range(100.0, 108.0).above_noise_floor());
    }

    #[test]
    fn test_pulse_shape_from_hint() {
        let light = PulseShape::from_hint(Modality::Light, Some(0.5));
        assert_eq!(light, PulseShape { hold_count: 250, min_count: 250 });

        let audio = PulseShape::from_hint(Modality::Audio, Some(0.5));
        assert_eq!(audio, PulseShape { hold_count: 250, min_count: 375 });

        assert_eq!(PulseShape::from_hint(Modality::Audio, None), PulseShape::default());
        assert_eq!(PulseShape::from_hint(Modality::Light, Some(-1.0)), PulseShape::default());
    }

    #[test]
    fn test_pulses_after_quiet_start() {
        let series = square(100, &[(10, 5), (40, 5), (70, 5)], 0.0, 100.0);
        let runs = detect_runs(&series, &Thresholds::from_range(0.0, 100.0), PulseShape::default());
        assert_eq!(
            runs,
            vec![
                PulseRun { start: 10, end: 15 },
                PulseRun { start: 40, end: 45 },
                PulseRun { start: 70, end: 75 }
            ]
        );
    }

    #[test]
    fn test_pulse_in_progress_at_start_is_dropped() {
        // Signal starts high: that partial pulse is the one ignored
        let series = square(60, &[(0, 5), (20, 5), (40, 5)], 0.0, 100.0);
        let runs = detect_runs(&series, &Thresholds::from_range(0.0, 100.0), PulseShape::default());
        assert_eq!(
            runs,
            vec![PulseRun { start: 20, end: 25 }, PulseRun { start: 40, end: 45 }]
        );
    }

    #[test]
    fn test_hold_bridges_short_dips() {
        let mut series = square(80, &[(5, 3), (30, 10)], 0.0, 100.0);
        series[34] = 0.0;
        series[35] = 0.0;

        let t = Thresholds::from_range(0.0, 100.0);
        let split = detect_runs(&series, &t, PulseShape { hold_count: 0, min_count: 1 });
        assert_eq!(split.len(), 3);

        let held = detect_runs(&series, &t, PulseShape { hold_count: 2, min_count: 1 });
        assert_eq!(
            held,
            vec![PulseRun { start: 5, end: 8 }, PulseRun { start: 30, end: 40 }]
        );
    }

    #[test]
    fn test_short_runs_rejected() {
        let series = square(80, &[(5, 3), (30, 2), (50, 6)], 0.0, 100.0);
        let runs = detect_runs(
            &series,
            &Thresholds::from_range(0.0, 100.0),
            PulseShape { hold_count: 0, min_count: 4 },
        );
        assert_eq!(runs, vec![PulseRun { start: 50, end: 56 }]);
    }

    #[test]
    fn test_unterminated_pulse_not_reported() {
        let series = square(50, &[(5, 3), (45, 5)], 0.0, 100.0);
        let runs = detect_runs(&series, &Thresholds::from_range(0.0, 100.0), PulseShape::default());
        assert_eq!(runs, vec![PulseRun { start: 5, end: 8 }]);
    }

    #[test]
    fn test_weighted_center() {
        let run = PulseRun { start: 10, end: 14 };
        let flat = square(20, &[(10, 4)], 0.0, 50.0);
        assert_abs_diff_eq!(weighted_center(&flat, run, 0.0), 11.5);
        assert_abs_diff_eq!(run.midpoint(), 11.5);

        let mut skewed = flat.clone();
        skewed[13] = 150.0;
        // weights 50, 50, 50, 150 over indices 10..14
        assert_abs_diff_eq!(weighted_center(&skewed, run, 0.0), 12.0);

        // All weights zero falls back to the midpoint
        assert_abs_diff_eq!(weighted_center(&flat, run, 50.0), 11.5);
    }

    #[test]
    fn test_envelope() {
        assert_eq!(envelope(&[126, 6, 120], &[130, 250, 135]), vec![4.0, 244.0, 15.0]);
    }

    fn channel(pin: Pin, samples: &[(u8, u8)], duration: Option<f64>) -> Channel {
        Channel {
            pin,
            modality: pin.modality(),
            max: samples.iter().map(|s| s.0).collect(),
            min: samples.iter().map(|s| s.1).collect(),
            event_duration: duration,
        }
    }

    #[test]
    fn test_pulse_centers_light_and_audio() {
        let mut light = vec![(30u8, 30u8); 200];
        let mut audio = vec![(130u8, 126u8); 200];
        for start in [20, 80, 140] {
            for i in start..start + 10 {
                light[i] = (220, 210);
                audio[i] = (250, 6);
            }
        }

        let centers = pulse_centers(&channel(Pin::Light0, &light, Some(0.010)));
        assert_eq!(centers.len(), 3);
        assert_abs_diff_eq!(centers[0], 24.5);
        assert_abs_diff_eq!(centers[2], 144.5);

        let centers = pulse_centers(&channel(Pin::Audio0, &audio, Some(0.010)));
        assert_eq!(centers, vec![24.5, 84.5, 144.5]);
    }

    #[test]
    fn test_quiet_channel_yields_nothing() {
        let quiet = vec![(131u8, 125u8); 100];
        assert!(pulse_centers(&channel(Pin::Audio1, &quiet, Some(0.02))).is_empty());
        assert!(pulse_centers(&channel(Pin::Light1, &[], None)).is_empty());
    }
}
