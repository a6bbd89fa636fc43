//! Capture device contract
//!
//! The sampling microcontroller is a black box behind [`CaptureDevice`]:
//! pins are activated, the device is prepared for a capture duration, a
//! single capture is run, and the sample buffer is fetched with a bulk
//! transfer. Each interval is 1 ms; for every active pin the device stores
//! the maximum then the minimum reading seen during that interval, one
//! unsigned byte each, in ascending channel index order.
//!
//! The device clock is a 32-bit microsecond counter that wraps roughly
//! every 71 minutes. [`CaptureWindow::unwrapped`] restores ordering.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::pins::{ChannelSlots, Modality, PIN_COUNT};

/// Device sample buffer size in bytes
pub const DEVICE_BUFFER_BYTES: usize = 90 * 1024;

/// Bytes stored per active pin per sample interval (max, min)
pub const BYTES_PER_PIN_INTERVAL: usize = 2;

/// Sample intervals per second
pub const INTERVALS_PER_SEC: usize = 1000;

/// Period of the device's microsecond counter
pub const DEVICE_CLOCK_WRAP_MICROS: u64 = 1 << 32;

const DEVICE_CLOCK_WRAP_NANOS: i64 = (DEVICE_CLOCK_WRAP_MICROS * 1000) as i64;

/// Errors raised by a capture device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device protocol error: {0}")]
    Protocol(String),

    #[error("Invalid device channel: {0}")]
    InvalidChannel(usize),

    #[error("Capture requested before the device was prepared")]
    NotPrepared,

    #[error("Bulk transfer requested before a capture was taken")]
    NoCaptureData,
}

/// Request/response timing exchange between host and device
///
/// Host stamps are wall clock nanoseconds; device stamps are device clock
/// nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTrip {
    /// Wall clock time the request was sent (t1)
    pub request_sent: i64,
    /// Device time the request arrived (t2)
    pub device_received: i64,
    /// Device time the response left (t3)
    pub device_responded: i64,
    /// Wall clock time the response arrived (t4)
    pub response_received: i64,
}

/// When sampling ran on the device, plus the timing exchanges bracketing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureWindow {
    /// Device time (micros) the first interval began
    pub due_start_micros: u64,
    /// Device time (micros) the last interval ended
    pub due_finish_micros: u64,
    /// Exchange immediately before sampling
    pub pre: RoundTrip,
    /// Exchange immediately after sampling
    pub post: RoundTrip,
}

impl CaptureWindow {
    pub fn due_start_nanos(&self) -> f64 {
        self.due_start_micros as f64 * 1000.0
    }

    pub fn due_finish_nanos(&self) -> f64 {
        self.due_finish_micros as f64 * 1000.0
    }

    /// Undo device clock wrap so that the stamps increase in capture order
    ///
    /// Idempotent.
    pub fn unwrapped(mut self) -> Self {
        if self.pre.device_responded < self.pre.device_received {
            self.pre.device_responded += DEVICE_CLOCK_WRAP_NANOS;
        }
        if ((self.due_start_micros * 1000) as i64) < self.pre.device_responded {
            self.due_start_micros += DEVICE_CLOCK_WRAP_MICROS;
        }
        if self.due_finish_micros < self.due_start_micros {
            self.due_finish_micros += DEVICE_CLOCK_WRAP_MICROS;
        }
        if self.post.device_received < (self.due_finish_micros * 1000) as i64 {
            self.post.device_received += DEVICE_CLOCK_WRAP_NANOS;
        }
        if self.post.device_responded < self.post.device_received {
            self.post.device_responded += DEVICE_CLOCK_WRAP_NANOS;
        }
        self
    }
}

/// Result of a device capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapture {
    pub window: CaptureWindow,
    /// Number of 1 ms intervals sampled
    pub interval_count: usize,
}

/// Capture device collaborator
///
/// Single shot: after `prepare`, exactly one `capture` then one
/// `bulk_transfer`.
pub trait CaptureDevice {
    /// Enable sampling of a device channel during the next capture
    fn activate(&mut self, channel: usize) -> Result<(), DeviceError>;

    /// Prepare a capture of the given duration
    ///
    /// Returns the number of channels the device will sample.
    fn prepare(&mut self, duration: Duration) -> Result<usize, DeviceError>;

    /// Run the capture and report when it happened
    fn capture(&mut self) -> Result<DeviceCapture, DeviceError>;

    /// Fetch the sample buffer of the last capture
    fn bulk_transfer(&mut self) -> Result<Vec<u8>, DeviceError>;
}

/// Longest capture (whole seconds) the device buffer holds for `n_pins`
pub fn max_capture_secs(n_pins: usize) -> u64 {
    if n_pins == 0 {
        return 0;
    }
    (DEVICE_BUFFER_BYTES / (INTERVALS_PER_SEC * n_pins * BYTES_PER_PIN_INTERVAL)) as u64
}

/// Check a requested capture length against the device buffer
///
/// A request of zero or less asks for the longest possible capture.
/// Returns `None` if the request cannot be satisfied.
pub fn check_capture_time(requested_secs: i64, n_pins: usize) -> Option<u64> {
    let max = max_capture_secs(n_pins);
    if max == 0 {
        return None;
    }
    match u64::try_from(requested_secs) {
        Ok(0) | Err(_) => Some(max),
        Ok(secs) if secs <= max => Some(secs),
        Ok(_) => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimState {
    Idle,
    Prepared,
    Captured,
}

/// In-memory capture device
///
/// Plays back per-channel `(max, min)` samples and synthesises timing
/// exchanges from a fixed wall clock offset. Device stamps are reported
/// modulo the 32-bit microsecond counter, as the hardware does.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    channels: ChannelSlots<Vec<(u8, u8)>>,
    active: [bool; PIN_COUNT],
    activations: Vec<usize>,
    interval_count: usize,
    start_micros: u64,
    wall_offset_nanos: i64,
    round_trip_nanos: i64,
    reported_active: Option<usize>,
    recorded_window: Option<CaptureWindow>,
    recorded_buffer: Option<Vec<u8>>,
    state: SimState,
}

impl SimulatedDevice {
    /// Device that will sample `interval_count` intervals starting at 1 s
    pub fn new(interval_count: usize) -> Self {
        Self {
            channels: ChannelSlots::new(),
            active: [false; PIN_COUNT],
            activations: Vec::new(),
            interval_count,
            start_micros: 1_000_000,
            wall_offset_nanos: 1_000_000_000_000,
            round_trip_nanos: 200_000,
            reported_active: None,
            recorded_window: None,
            recorded_buffer: None,
            state: SimState::Idle,
        }
    }

    /// Use explicit samples for a channel, padded with zeros to length
    ///
    /// A channel the device does not have is ignored; activating it later
    /// fails with [`DeviceError::InvalidChannel`].
    pub fn with_channel(mut self, channel: usize, max: &[u8], min: &[u8]) -> Self {
        if channel >= PIN_COUNT {
            tracing::warn!(channel, "simulated_channel_ignored");
            return self;
        }
        let mut samples: Vec<(u8, u8)> = max.iter().copied().zip(min.iter().copied()).collect();
        samples.resize(self.interval_count, (0, 0));
        self.channels.insert(channel, samples);
        self
    }

    /// Synthesise a channel with rectangular pulses
    ///
    /// Each pulse starts at an interval in `starts` and lasts `width`
    /// intervals. Out of range channels are ignored as in [`Self::with_channel`].
    pub fn with_pulses(
        mut self,
        channel: usize,
        modality: Modality,
        starts: &[usize],
        width: usize,
    ) -> Self {
        if channel >= PIN_COUNT {
            tracing::warn!(channel, "simulated_channel_ignored");
            return self;
        }
        let (idle, active) = match modality {
            Modality::Light => ((30, 30), (220, 210)),
            Modality::Audio => ((130, 126), (250, 6)),
        };
        let mut samples = vec![idle; self.interval_count];
        for &start in starts {
            for sample in samples.iter_mut().skip(start).take(width) {
                *sample = active;
            }
        }
        self.channels.insert(channel, samples);
        self
    }

    /// Device time (micros) at which sampling starts
    pub fn with_start_micros(mut self, micros: u64) -> Self {
        self.start_micros = micros;
        self
    }

    /// Wall clock minus device clock (nanos)
    pub fn with_wall_offset(mut self, nanos: i64) -> Self {
        self.wall_offset_nanos = nanos;
        self
    }

    pub fn with_round_trip(mut self, nanos: i64) -> Self {
        self.round_trip_nanos = nanos;
        self
    }

    /// Report this many active channels from `prepare` regardless of activations
    pub fn misreport_active_pins(mut self, count: usize) -> Self {
        self.reported_active = Some(count);
        self
    }

    /// Replay a recorded window instead of synthesising one
    pub fn with_window(mut self, window: CaptureWindow) -> Self {
        self.recorded_window = Some(window);
        self
    }

    /// Return this buffer verbatim from `bulk_transfer`
    ///
    /// Per-channel samples are not consulted, so a buffer of the wrong
    /// length reaches the caller unchanged.
    pub fn with_raw_buffer(mut self, raw: Vec<u8>) -> Self {
        self.recorded_buffer = Some(raw);
        self
    }

    /// Channels activated so far, in activation order
    pub fn activations(&self) -> &[usize] {
        &self.activations
    }

    fn wrap_micros(micros: u64) -> u64 {
        micros % DEVICE_CLOCK_WRAP_MICROS
    }

    fn exchange_at(&self, device_micros: u64) -> RoundTrip {
        let device_nanos = (device_micros * 1000) as i64;
        let wall = device_nanos + self.wall_offset_nanos;
        let reported = (Self::wrap_micros(device_micros) * 1000) as i64;
        RoundTrip {
            request_sent: wall - self.round_trip_nanos / 2,
            device_received: reported,
            device_responded: reported,
            response_received: wall + self.round_trip_nanos / 2,
        }
    }

    fn synthesised_window(&self) -> CaptureWindow {
        let finish = self.start_micros + (self.interval_count * INTERVALS_PER_SEC) as u64;
        CaptureWindow {
            due_start_micros: Self::wrap_micros(self.start_micros),
            due_finish_micros: Self::wrap_micros(finish),
            pre: self.exchange_at(self.start_micros.saturating_sub(500)),
            post: self.exchange_at(finish + 500),
        }
    }
}

impl CaptureDevice for SimulatedDevice {
    fn activate(&mut self, channel: usize) -> Result<(), DeviceError> {
        if channel >= PIN_COUNT {
            return Err(DeviceError::InvalidChannel(channel));
        }
        self.active[channel] = true;
        self.activations.push(channel);
        Ok(())
    }

    fn prepare(&mut self, duration: Duration) -> Result<usize, DeviceError> {
        let active = self.active.iter().filter(|&&a| a).count();
        tracing::debug!(
            active,
            duration_secs = duration.as_secs_f64(),
            intervals = self.interval_count,
            "simulated_device_prepared"
        );
        self.state = SimState::Prepared;
        Ok(self.reported_active.unwrap_or(active))
    }

    fn capture(&mut self) -> Result<DeviceCapture, DeviceError> {
        if self.state != SimState::Prepared {
            return Err(DeviceError::NotPrepared);
        }
        self.state = SimState::Captured;
        let window = self
            .recorded_window
            .unwrap_or_else(|| self.synthesised_window());
        Ok(DeviceCapture {
            window,
            interval_count: self.interval_count,
        })
    }

    fn bulk_transfer(&mut self) -> Result<Vec<u8>, DeviceError> {
        if self.state != SimState::Captured {
            return Err(DeviceError::NoCaptureData);
        }
        if let Some(raw) = &self.recorded_buffer {
            return Ok(raw.clone());
        }
        let active: Vec<usize> = (0..PIN_COUNT).filter(|&i| self.active[i]).collect();
        let mut raw = Vec::with_capacity(self.interval_count * active.len() * BYTES_PER_PIN_INTERVAL);
        for interval in 0..self.interval_count {
            for &channel in &active {
                let (max, min) = self
                    .channels
                    .get(channel)
                    .and_then(|s| s.get(interval).copied())
                    .unwrap_or((0, 0));
                raw.push(max);
                raw.push(min);
            }
        }
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_capacity() {
        assert_eq!(max_capture_secs(1), 46);
        assert_eq!(max_capture_secs(2), 23);
        assert_eq!(max_capture_secs(4), 11);
        assert_eq!(max_capture_secs(0), 0);
    }

    #[test]
    fn test_check_capture_time() {
        assert_eq!(check_capture_time(-1, 2), Some(23));
        assert_eq!(check_capture_time(0, 4), Some(11));
        assert_eq!(check_capture_time(10, 4), Some(10));
        assert_eq!(check_capture_time(12, 4), None);
        assert_eq!(check_capture_time(5, 0), None);
    }

    #[test]
    fn test_unwrap_without_wrap_is_identity() {
        let device = SimulatedDevice::new(100);
        let window = device.synthesised_window();
        assert_eq!(window.unwrapped(), window);
    }

    #[test]
    fn test_unwrap_across_counter_wrap() {
        // Sampling starts 30 ms before the counter wraps and runs for 100 ms
        let start = DEVICE_CLOCK_WRAP_MICROS - 30_000;
        let device = SimulatedDevice::new(100).with_start_micros(start);
        let window = device.synthesised_window();
        assert!(window.due_finish_micros < window.due_start_micros);

        let fixed = window.unwrapped();
        assert_eq!(fixed.due_start_micros, start);
        assert_eq!(fixed.due_finish_micros, start + 100_000);
        assert!(fixed.post.device_received > (fixed.due_finish_micros * 1000) as i64);
        assert_eq!(fixed.unwrapped(), fixed);
    }

    #[test]
    fn test_simulated_state_machine() {
        let mut device = SimulatedDevice::new(10);
        assert!(matches!(device.capture(), Err(DeviceError::NotPrepared)));
        assert!(matches!(device.bulk_transfer(), Err(DeviceError::NoCaptureData)));
        assert!(matches!(device.activate(4), Err(DeviceError::InvalidChannel(4))));

        device.activate(2).unwrap();
        assert_eq!(device.prepare(Duration::from_secs(1)).unwrap(), 1);
        let capture = device.capture().unwrap();
        assert_eq!(capture.interval_count, 10);
        assert_eq!(device.bulk_transfer().unwrap().len(), 20);
    }

    #[test]
    fn test_simulated_bulk_transfer_interleaves_by_channel() {
        let mut device = SimulatedDevice::new(2)
            .with_channel(3, &[30, 31], &[20, 21])
            .with_channel(0, &[10, 11], &[0, 1]);
        device.activate(3).unwrap();
        device.activate(0).unwrap();
        device.prepare(Duration::from_secs(1)).unwrap();
        device.capture().unwrap();

        let raw = device.bulk_transfer().unwrap();
        assert_eq!(raw, vec![10, 0, 30, 20, 11, 1, 31, 21]);
        assert_eq!(device.activations(), &[3, 0]);
    }

    #[test]
    fn test_out_of_range_channel_is_ignored() {
        let mut device = SimulatedDevice::new(10)
            .with_pulses(7, Modality::Light, &[2], 3)
            .with_channel(4, &[1], &[1]);
        assert!(matches!(device.activate(7), Err(DeviceError::InvalidChannel(7))));
        device.activate(0).unwrap();
        device.prepare(Duration::from_secs(1)).unwrap();
        device.capture().unwrap();
        assert_eq!(device.bulk_transfer().unwrap(), vec![0; 20]);
    }

    #[test]
    fn test_raw_buffer_returned_verbatim() {
        let mut device = SimulatedDevice::new(10)
            .with_pulses(0, Modality::Light, &[2], 3)
            .with_raw_buffer(vec![9, 8, 7]);
        device.activate(0).unwrap();
        device.prepare(Duration::from_secs(1)).unwrap();
        device.capture().unwrap();
        assert_eq!(device.bulk_transfer().unwrap(), vec![9, 8, 7]);
    }
}
