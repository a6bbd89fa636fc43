//! Alignment of observed event times against the expected pattern
//!
//! The capture usually starts part way through the test pattern, so the
//! first observed event could match any expected event. Every candidate
//! alignment is scored by the variance of its differences: the right one
//! leaves a near constant residual clock offset while a wrong one is
//! dominated by the pattern's own event spacing.
//!
//! Patterns with perfectly regular spacing score several alignments the same.
//! Those ties go to the alignment with the smallest mean difference, then
//! the earliest.

use thiserror::Error;

use super::stats::{mean, population_variance};
use crate::detect::DetectedEvent;

/// Relative tolerance within which two variances count as equal
const VARIANCE_TIE_TOLERANCE: f64 = 1e-6;

/// Variances at or below this are treated as zero
const VARIANCE_ZERO: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompareError {
    #[error("Dubious input: {observed} observed events cannot be matched against {expected} expected")]
    DubiousInput { observed: usize, expected: usize },
}

/// Best start offset into the expected sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    /// Index of the expected event the first observation matches
    pub offset: usize,
    /// Population variance of the differences at this offset
    pub variance: f64,
    /// Mean difference at this offset
    pub mean: f64,
}

fn variances_tie(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs());
    scale <= VARIANCE_ZERO || (a - b).abs() <= VARIANCE_TIE_TOLERANCE * scale
}

/// Find the offset `k` minimising the variance of `observed[i] - expected[k + i]`
///
/// # Errors
/// [`CompareError::DubiousInput`] if `observed` is empty or longer than
/// `expected`.
pub fn best_alignment(observed: &[f64], expected: &[f64]) -> Result<Alignment, CompareError> {
    let (m, n) = (observed.len(), expected.len());
    if m == 0 || m > n {
        return Err(CompareError::DubiousInput {
            observed: m,
            expected: n,
        });
    }

    let mut best: Option<Alignment> = None;
    let mut diffs = Vec::with_capacity(m);
    for offset in 0..=(n - m) {
        diffs.clear();
        diffs.extend(
            observed
                .iter()
                .zip(&expected[offset..offset + m])
                .map(|(o, e)| o - e),
        );
        let candidate = Alignment {
            offset,
            variance: population_variance(&diffs),
            mean: mean(&diffs),
        };

        best = match best {
            None => Some(candidate),
            Some(current) if variances_tie(candidate.variance, current.variance) => {
                if candidate.mean.abs() < current.mean.abs() {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
            Some(current) if candidate.variance < current.variance => Some(candidate),
            keep => keep,
        };
    }

    // m <= n guarantees at least one candidate
    best.ok_or(CompareError::DubiousInput {
        observed: m,
        expected: n,
    })
}

/// Difference between one observed event and its matched expected time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingDifference {
    /// Observed minus expected (seconds); positive means late
    pub diff_secs: f64,
    /// Measurement error bound either side of `diff_secs` (seconds)
    pub error_secs: f64,
}

/// Outcome of comparing one pin's observations with its pattern
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    /// Index of the expected event matched by the first observation
    pub offset: usize,
    /// Every expected time, in seconds since the pattern origin
    pub expected_secs: Vec<f64>,
    /// One entry per observed event
    pub differences: Vec<TimingDifference>,
}

impl ComparisonResult {
    /// Expected time (seconds) the first observation was matched with
    pub fn first_matched_secs(&self) -> Option<f64> {
        self.expected_secs.get(self.offset).copied()
    }

    pub fn diffs_secs(&self) -> Vec<f64> {
        self.differences.iter().map(|d| d.diff_secs).collect()
    }
}

/// Compares observed timeline events with expected pattern times
///
/// Expected times are seconds since the pattern started; the pattern starts
/// at `origin_ticks` on a timeline running at `tick_rate` ticks per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceComparator {
    origin_ticks: f64,
    tick_rate: f64,
}

impl SequenceComparator {
    pub fn new(origin_ticks: f64, tick_rate: f64) -> Self {
        Self {
            origin_ticks,
            tick_rate,
        }
    }

    pub fn to_ticks(&self, secs: f64) -> f64 {
        self.origin_ticks + secs * self.tick_rate
    }

    pub fn to_secs(&self, ticks: f64) -> f64 {
        (ticks - self.origin_ticks) / self.tick_rate
    }

    /// Align and measure one pin
    ///
    /// # Errors
    /// [`CompareError::DubiousInput`] if nothing was observed or more events
    /// were observed than expected.
    pub fn compare(
        &self,
        observed: &[DetectedEvent],
        expected_secs: &[f64],
    ) -> Result<ComparisonResult, CompareError> {
        let expected_ticks: Vec<f64> = expected_secs.iter().map(|&s| self.to_ticks(s)).collect();
        let observed_ticks: Vec<f64> = observed.iter().map(|e| e.time).collect();

        let alignment = best_alignment(&observed_ticks, &expected_ticks)?;
        tracing::debug!(
            offset = alignment.offset,
            variance = alignment.variance,
            mean_ticks = alignment.mean,
            "alignment_selected"
        );

        let differences = observed
            .iter()
            .zip(&expected_ticks[alignment.offset..])
            .map(|(event, expected)| TimingDifference {
                diff_secs: (event.time - expected) / self.tick_rate,
                error_secs: event.error_bound / self.tick_rate,
            })
            .collect();

        Ok(ComparisonResult {
            offset: alignment.offset,
            expected_secs: expected_ticks.iter().map(|&t| self.to_secs(t)).collect(),
            differences,
        })
    }
}
