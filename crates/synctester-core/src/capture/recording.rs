//! Recorded captures for offline replay
//!
//! A recording keeps everything detection needs: the raw buffer, the
//! capture window and the correlations in force during the capture. It is
//! stored as pretty JSON so that a fixture can be inspected by eye.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::device::{CaptureWindow, SimulatedDevice};
use crate::clock::correlation::CorrelationLog;
use crate::pins::{Pin, PinMap};

/// One capture, as taken by a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecording {
    /// When the recording was written
    pub recorded_at: DateTime<Utc>,
    /// Pins that were sampled
    pub pins: Vec<Pin>,
    /// Pin to device channel mapping in force
    #[serde(default)]
    pub pin_map: PinMap,
    /// Number of 1 ms intervals captured
    pub interval_count: usize,
    pub window: CaptureWindow,
    /// Raw interleaved sample buffer
    pub samples: Vec<u8>,
    /// Wall clock to timeline correlations in force during the capture
    pub correlations: CorrelationLog,
    /// Worst case wall clock dispersion (nanos) claimed during the capture
    #[serde(default)]
    pub dispersion_nanos: Option<f64>,
}

impl CaptureRecording {
    /// Load a recording from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording {}", path.display()))?;
        let recording = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse recording {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded capture recording");
        Ok(recording)
    }

    /// Save to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), bytes = self.samples.len(), "Capture recording saved");
        Ok(())
    }

    /// A simulated device that replays this capture byte for byte
    ///
    /// The buffer is handed back untouched, so a recording whose length does
    /// not match its pins and interval count is rejected as corrupt when the
    /// replay session repackages it.
    pub fn replay_device(&self) -> SimulatedDevice {
        SimulatedDevice::new(self.interval_count)
            .with_window(self.window)
            .with_raw_buffer(self.samples.clone())
    }
}
