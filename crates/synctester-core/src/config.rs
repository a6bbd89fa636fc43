//! Measurement configuration and test pattern metadata
//!
//! Both are JSON files. The measurement config is optional and falls back
//! to defaults; pattern metadata is written by the test pattern generator
//! and is required for every pin being measured.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::detect::Precision;
use crate::pins::{Modality, Pin, PinMap};

fn default_wall_clock_precision() -> f64 {
    1_000.0
}

fn default_device_clock_precision() -> f64 {
    // micros() on the device resolves to 1 us
    1_000.0
}

fn default_tick_rate() -> f64 {
    90_000.0
}

fn default_capture_secs() -> i64 {
    -1
}

/// Settings shared by every capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Precision the wall clock is read with (nanos)
    #[serde(default = "default_wall_clock_precision")]
    pub wall_clock_precision_nanos: f64,
    /// Precision the device clock is read with (nanos)
    #[serde(default = "default_device_clock_precision")]
    pub device_clock_precision_nanos: f64,
    /// Synchronisation timeline ticks per second
    #[serde(default = "default_tick_rate")]
    pub timeline_tick_rate: f64,
    /// Timeline position (ticks) at which the test pattern starts
    #[serde(default)]
    pub video_start_ticks: f64,
    /// Requested capture length; zero or less means as long as possible
    #[serde(default = "default_capture_secs")]
    pub capture_secs: i64,
    /// Pass/fail tolerance (seconds); no verdict if absent
    #[serde(default)]
    pub tolerance_secs: Option<f64>,
    #[serde(default)]
    pub pin_map: PinMap,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            wall_clock_precision_nanos: default_wall_clock_precision(),
            device_clock_precision_nanos: default_device_clock_precision(),
            timeline_tick_rate: default_tick_rate(),
            video_start_ticks: 0.0,
            capture_secs: default_capture_secs(),
            tolerance_secs: None,
            pin_map: PinMap::default(),
        }
    }
}

impl MeasurementConfig {
    /// Load from disk, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    pub fn precision(&self) -> Precision {
        Precision {
            wall_clock_nanos: self.wall_clock_precision_nanos,
            device_clock_nanos: self.device_clock_precision_nanos,
        }
    }
}

/// Metadata written alongside a generated test pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMetadata {
    /// Centre time (seconds since pattern start) of every flash and beep
    pub event_centre_times: Vec<f64>,
    pub approx_beep_duration_secs: f64,
    pub approx_flash_duration_secs: f64,
}

impl PatternMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pattern metadata {}", path.display()))?;
        let metadata = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse pattern metadata {}", path.display()))?;
        Ok(metadata)
    }

    /// Event duration hint (seconds) for the kind of event a pin detects
    pub fn duration_for(&self, pin: Pin) -> f64 {
        match pin.modality() {
            Modality::Light => self.approx_flash_duration_secs,
            Modality::Audio => self.approx_beep_duration_secs,
        }
    }
}

/// Expected event times and duration hints per pin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpectedTimings {
    pub times: BTreeMap<Pin, Vec<f64>>,
    pub durations: BTreeMap<Pin, f64>,
}

impl ExpectedTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pin: Pin, times: Vec<f64>, duration_secs: Option<f64>) {
        self.times.insert(pin, times);
        if let Some(duration) = duration_secs {
            self.durations.insert(pin, duration);
        }
    }

    /// Assemble from the metadata file of each pin's pattern
    pub fn from_metadata<'a>(pins: impl IntoIterator<Item = (Pin, &'a PatternMetadata)>) -> Self {
        let mut timings = Self::new();
        for (pin, metadata) in pins {
            timings.insert(
                pin,
                metadata.event_centre_times.clone(),
                Some(metadata.duration_for(pin)),
            );
        }
        timings
    }

    pub fn times_for(&self, pin: Pin) -> Option<&[f64]> {
        self.times.get(&pin).map(Vec::as_slice)
    }

    pub fn duration_for(&self, pin: Pin) -> Option<f64> {
        self.durations.get(&pin).copied()
    }
}
