//! Sensor input identifiers and the fixed-size per-channel containers
//!
//! The capture device has four inputs: two light sensors and two audio
//! inputs. Each input is sampled on a fixed device channel index given by
//! the [`PinMap`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of inputs on the capture device
pub const PIN_COUNT: usize = 4;

/// Errors raised while naming or mapping pins
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PinError {
    #[error("Unrecognised pin identifier: {0:?}")]
    Unrecognised(String),

    #[error("Pin {0} requested more than once")]
    Duplicate(Pin),

    #[error("No pins requested")]
    Empty,

    #[error("Invalid pin map: {0}")]
    InvalidPinMap(String),
}

/// What kind of sensor is attached to a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Light sensor watching the screen for flashes
    Light,
    /// Audio input listening for beeps
    Audio,
}

/// One of the four capture inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pin {
    #[serde(rename = "LIGHT_0")]
    Light0,
    #[serde(rename = "AUDIO_0")]
    Audio0,
    #[serde(rename = "LIGHT_1")]
    Light1,
    #[serde(rename = "AUDIO_1")]
    Audio1,
}

impl Pin {
    /// Every pin, in default device channel order
    pub const ALL: [Pin; PIN_COUNT] = [Pin::Light0, Pin::Audio0, Pin::Light1, Pin::Audio1];

    /// Canonical name as used in metadata and on the command line
    pub fn name(self) -> &'static str {
        match self {
            Pin::Light0 => "LIGHT_0",
            Pin::Audio0 => "AUDIO_0",
            Pin::Light1 => "LIGHT_1",
            Pin::Audio1 => "AUDIO_1",
        }
    }

    /// Sensor modality. Always a pure function of the pin.
    pub fn modality(self) -> Modality {
        match self {
            Pin::Light0 | Pin::Light1 => Modality::Light,
            Pin::Audio0 | Pin::Audio1 => Modality::Audio,
        }
    }

    /// True if this pin carries an audio input
    pub fn is_audio(self) -> bool {
        self.modality() == Modality::Audio
    }

    fn ordinal(self) -> usize {
        match self {
            Pin::Light0 => 0,
            Pin::Audio0 => 1,
            Pin::Light1 => 2,
            Pin::Audio1 => 3,
        }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pin {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pin::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PinError::Unrecognised(s.to_string()))
    }
}

/// Fixed mapping from pin to capture device channel index
///
/// Always a permutation of `0..PIN_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Pin, usize>", into = "BTreeMap<Pin, usize>")]
pub struct PinMap {
    indices: [usize; PIN_COUNT],
}

impl PinMap {
    /// Build a map from channel indices given in [`Pin::ALL`] order
    pub fn new(indices: [usize; PIN_COUNT]) -> Result<Self, PinError> {
        let mut seen = [false; PIN_COUNT];
        for &index in &indices {
            if index >= PIN_COUNT {
                return Err(PinError::InvalidPinMap(format!(
                    "channel index {} out of range",
                    index
                )));
            }
            if seen[index] {
                return Err(PinError::InvalidPinMap(format!(
                    "channel index {} assigned twice",
                    index
                )));
            }
            seen[index] = true;
        }
        Ok(Self { indices })
    }

    /// Device channel index for a pin
    pub fn index(&self, pin: Pin) -> usize {
        self.indices[pin.ordinal()]
    }

    /// Pin sampled on a device channel index
    pub fn pin_at(&self, index: usize) -> Option<Pin> {
        Pin::ALL.into_iter().find(|&p| self.index(p) == index)
    }
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            indices: [0, 1, 2, 3],
        }
    }
}

impl TryFrom<BTreeMap<Pin, usize>> for PinMap {
    type Error = PinError;

    fn try_from(map: BTreeMap<Pin, usize>) -> Result<Self, Self::Error> {
        let mut indices = [0; PIN_COUNT];
        for pin in Pin::ALL {
            indices[pin.ordinal()] = *map
                .get(&pin)
                .ok_or_else(|| PinError::InvalidPinMap(format!("no entry for {}", pin)))?;
        }
        Self::new(indices)
    }
}

impl From<PinMap> for BTreeMap<Pin, usize> {
    fn from(map: PinMap) -> Self {
        Pin::ALL.into_iter().map(|p| (p, map.index(p))).collect()
    }
}

/// Ordered, duplicate-free, non-empty set of pins to sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinSet {
    pins: Vec<Pin>,
}

impl PinSet {
    pub fn new(pins: impl IntoIterator<Item = Pin>) -> Result<Self, PinError> {
        let mut out: Vec<Pin> = Vec::new();
        for pin in pins {
            if out.contains(&pin) {
                return Err(PinError::Duplicate(pin));
            }
            out.push(pin);
        }
        if out.is_empty() {
            return Err(PinError::Empty);
        }
        Ok(Self { pins: out })
    }

    /// Parse pin names such as `"LIGHT_0"` or `"audio_1"`
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, PinError> {
        let pins = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<Vec<Pin>, _>>()?;
        Self::new(pins)
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn contains(&self, pin: Pin) -> bool {
        self.pins.contains(&pin)
    }

    pub fn iter(&self) -> impl Iterator<Item = Pin> + '_ {
        self.pins.iter().copied()
    }
}

/// One optional slot per device channel
///
/// Inactive channels are `None`. Iteration is in ascending channel index,
/// which is also the order the device interleaves its sample data.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSlots<T> {
    slots: [Option<T>; PIN_COUNT],
}

impl<T> ChannelSlots<T> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Place a value in a slot, returning any previous occupant
    ///
    /// # Panics
    /// If `index >= PIN_COUNT`. Indices come from a validated [`PinMap`].
    pub fn insert(&mut self, index: usize, value: T) -> Option<T> {
        self.slots[index].replace(value)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn is_present(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Number of populated slots
    pub fn present_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Populated slots with their channel index, ascending
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (i, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|v| (i, v)))
    }

    /// Consume into the populated values, ascending channel index
    pub fn into_values(self) -> impl Iterator<Item = T> {
        self.slots.into_iter().flatten()
    }
}

impl<T> Default for ChannelSlots<T> {
    fn default() -> Self {
        Self::new()
    }
}
