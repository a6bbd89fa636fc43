//! Machine readable replay report

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use synctester::analysis::compare::{CompareError, ComparisonResult};
use synctester::Pin;

/// Outcome for one pin
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinReport {
    pub pin: Pin,
    /// Index of the expected event matched by the first observation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_index: Option<usize>,
    /// `(difference, error bound)` pairs in seconds
    pub diffs_and_errors: Vec<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PinReport {
    pub fn new(
        pin: Pin,
        result: &Result<ComparisonResult, CompareError>,
        passed: Option<bool>,
    ) -> Self {
        match result {
            Ok(result) => Self {
                pin,
                match_index: Some(result.offset),
                diffs_and_errors: result
                    .differences
                    .iter()
                    .map(|d| (d.diff_secs, d.error_secs))
                    .collect(),
                passed,
                error: None,
            },
            Err(e) => Self {
                pin,
                match_index: None,
                diffs_and_errors: Vec::new(),
                passed: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub captured_at: DateTime<Utc>,
    pub replayed_at: DateTime<Utc>,
    pub pins: Vec<PinReport>,
}

impl ReplayReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!(path = %path.display(), "Report saved");
        Ok(())
    }
}
