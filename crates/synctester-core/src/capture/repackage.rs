//! Flat capture buffer to per-pin channels
//!
//! The device interleaves its buffer by interval: for each interval, each
//! active channel in ascending index order contributes its maximum then
//! its minimum reading.

use thiserror::Error;

use super::device::BYTES_PER_PIN_INTERVAL;
use crate::pins::{ChannelSlots, Modality, Pin, PinMap, PinSet};

/// Errors raised while repackaging a capture buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepackageError {
    #[error("Corrupt capture: expected {expected} bytes of sample data, got {actual}")]
    CorruptCapture { expected: usize, actual: usize },
}

/// Sample series recorded for one pin
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub pin: Pin,
    pub modality: Modality,
    /// Lowest reading in each interval
    pub min: Vec<u8>,
    /// Highest reading in each interval
    pub max: Vec<u8>,
    /// Approximate duration of one flash or beep in seconds
    pub event_duration: Option<f64>,
}

impl Channel {
    fn empty(pin: Pin, capacity: usize) -> Self {
        Self {
            pin,
            modality: pin.modality(),
            min: Vec::with_capacity(capacity),
            max: Vec::with_capacity(capacity),
            event_duration: None,
        }
    }

    /// Attach the event duration hint
    pub fn with_event_duration(mut self, secs: Option<f64>) -> Self {
        self.event_duration = secs;
        self
    }

    /// Number of sample intervals
    pub fn len(&self) -> usize {
        self.min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_empty()
    }
}

/// Split a raw capture buffer into one [`Channel`] per active pin
///
/// Slots are indexed by device channel; pins not in `pins` are `None`.
///
/// # Errors
/// [`RepackageError::CorruptCapture`] unless `raw` holds exactly two bytes
/// per active pin per interval.
pub fn repackage(
    pins: &PinSet,
    pin_map: &PinMap,
    raw: &[u8],
    interval_count: usize,
) -> Result<ChannelSlots<Channel>, RepackageError> {
    let expected = BYTES_PER_PIN_INTERVAL * pins.len() * interval_count;
    if raw.len() != expected {
        return Err(RepackageError::CorruptCapture {
            expected,
            actual: raw.len(),
        });
    }

    let mut channels = ChannelSlots::new();
    for pin in pins.iter() {
        channels.insert(pin_map.index(pin), Channel::empty(pin, interval_count));
    }

    let mut bytes = raw.chunks_exact(BYTES_PER_PIN_INTERVAL);
    for _ in 0..interval_count {
        for (_, channel) in channels.iter_mut() {
            if let Some(pair) = bytes.next() {
                channel.max.push(pair[0]);
                channel.min.push(pair[1]);
            }
        }
    }

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Interleave `(max, min)` pairs per channel in ascending channel order
    fn interleave(series: &[Vec<(u8, u8)>]) -> Vec<u8> {
        let intervals = series.first().map(Vec::len).unwrap_or(0);
        let mut raw = Vec::new();
        for i in 0..intervals {
            for s in series {
                raw.push(s[i].0);
                raw.push(s[i].1);
            }
        }
        raw
    }

    #[test]
    fn test_single_pin() {
        let pins = PinSet::new([Pin::Audio0]).unwrap();
        let raw = vec![200, 50, 130, 126, 129, 127];

        let channels = repackage(&pins, &PinMap::default(), &raw, 3).unwrap();
        assert_eq!(channels.present_count(), 1);
        let channel = channels.get(1).unwrap();
        assert_eq!(channel.pin, Pin::Audio0);
        assert_eq!(channel.modality, Modality::Audio);
        assert_eq!(channel.max, vec![200, 130, 129]);
        assert_eq!(channel.min, vec![50, 126, 127]);
        assert_eq!(channel.event_duration, None);
    }

    #[test]
    fn test_interleaved_pins_recover_inputs_exactly() {
        let light0: Vec<(u8, u8)> = (0..50).map(|i| (i * 2, i)).collect();
        let light1: Vec<(u8, u8)> = (0..50).map(|i| (255 - i, 100 + i)).collect();
        let audio1: Vec<(u8, u8)> = (0..50).map(|i| (i + 128, 127 - i)).collect();
        let raw = interleave(&[light0.clone(), light1.clone(), audio1.clone()]);

        // Requested out of order; buffer is always in channel order
        let pins = PinSet::new([Pin::Audio1, Pin::Light0, Pin::Light1]).unwrap();
        let channels = repackage(&pins, &PinMap::default(), &raw, 50).unwrap();

        assert!(channels.get(1).is_none());
        for (index, expected) in [(0, &light0), (2, &light1), (3, &audio1)] {
            let channel = channels.get(index).unwrap();
            let max: Vec<u8> = expected.iter().map(|s| s.0).collect();
            let min: Vec<u8> = expected.iter().map(|s| s.1).collect();
            assert_eq!(channel.max, max, "max mismatch on channel {}", index);
            assert_eq!(channel.min, min, "min mismatch on channel {}", index);
        }
    }

    #[test]
    fn test_custom_pin_map() {
        let map = PinMap::new([3, 2, 1, 0]).unwrap();
        let pins = PinSet::new([Pin::Light0, Pin::Audio1]).unwrap();
        // Audio1 is channel 0 so comes first in the buffer
        let raw = vec![9, 8, 1, 0];

        let channels = repackage(&pins, &map, &raw, 1).unwrap();
        assert_eq!(channels.get(0).unwrap().pin, Pin::Audio1);
        assert_eq!(channels.get(0).unwrap().max, vec![9]);
        assert_eq!(channels.get(3).unwrap().pin, Pin::Light0);
        assert_eq!(channels.get(3).unwrap().min, vec![0]);
    }

    #[test]
    fn test_size_mismatch_is_corrupt() {
        let pins = PinSet::new([Pin::Light0, Pin::Audio0]).unwrap();
        let err = repackage(&pins, &PinMap::default(), &[0; 7], 2).unwrap_err();
        assert_eq!(
            err,
            RepackageError::CorruptCapture {
                expected: 8,
                actual: 7
            }
        );
        assert!(repackage(&pins, &PinMap::default(), &[0; 10], 2).is_err());
    }

    #[test]
    fn test_zero_intervals() {
        let pins = PinSet::new([Pin::Light1]).unwrap();
        let channels = repackage(&pins, &PinMap::default(), &[], 0).unwrap();
        assert!(channels.get(2).unwrap().is_empty());
    }
}
