//! Summary statistics and the tolerance verdict for one pin

use std::fmt;

use super::compare::{ComparisonResult, TimingDifference};

/// Arithmetic mean; zero for no data
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population variance (divides by `n`, not `n - 1`); zero for no data
pub fn population_variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|v| (v - m).powi(2)).sum::<f64>() / data.len() as f64
}

/// Seconds rounded to the nearest whole millisecond
pub fn secs_to_nearest_milli(secs: f64) -> i64 {
    (secs * 1000.0).round() as i64
}

/// Gap separating two ranges, or zero if they overlap
///
/// Negative when `a` lies below `b`, positive when above.
pub fn gap_between_ranges(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (a_lo, a_hi) = a;
    let (b_lo, b_hi) = b;
    if a_lo > b_hi {
        a_lo - b_hi
    } else if a_hi < b_lo {
        a_hi - b_lo
    } else {
        0.0
    }
}

/// Whether each observation could lie within `±tolerance` of expected
///
/// An observation passes when its error range overlaps the tolerance range.
/// Returns the overall verdict and, per observation, the signed amount by
/// which the tolerance was exceeded (zero for a pass).
pub fn within_tolerance(differences: &[TimingDifference], tolerance: f64) -> (bool, Vec<f64>) {
    let exceeded: Vec<f64> = differences
        .iter()
        .map(|d| {
            gap_between_ranges(
                (d.diff_secs - d.error_secs, d.diff_secs + d.error_secs),
                (-tolerance, tolerance),
            )
        })
        .collect();
    let passed = exceeded.iter().all(|&gap| gap == 0.0);
    (passed, exceeded)
}

/// Label for a signed offset (observed minus expected)
pub fn early_late(value: f64) -> &'static str {
    if value > 0.0 {
        "(LATE)"
    } else if value < 0.0 {
        "(EARLY)"
    } else {
        ""
    }
}

/// Tolerance check outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ToleranceVerdict {
    pub tolerance_secs: f64,
    pub passed: bool,
    /// Per observation, seconds outside tolerance beyond its error bound
    pub exceeded_by: Vec<f64>,
}

impl ToleranceVerdict {
    pub fn failures(&self) -> usize {
        self.exceeded_by.iter().filter(|&&e| e != 0.0).count()
    }
}

/// Statistics reported for one pin
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSummary {
    /// Expected time (seconds) the first observation matched
    pub first_expected_secs: f64,
    pub count: usize,
    pub min_offset_millis: i64,
    pub mean_offset_millis: i64,
    pub max_offset_millis: i64,
    pub std_dev_millis: i64,
    pub min_error_millis: f64,
    pub mean_error_millis: f64,
    pub max_error_millis: f64,
    pub tolerance: Option<ToleranceVerdict>,
}

impl ResultSummary {
    pub fn from_comparison(result: &ComparisonResult, tolerance_secs: Option<f64>) -> Self {
        let diffs: Vec<f64> = result.differences.iter().map(|d| d.diff_secs).collect();
        let errors: Vec<f64> = result.differences.iter().map(|d| d.error_secs).collect();

        let min_of = |v: &[f64]| v.iter().copied().reduce(f64::min).unwrap_or(0.0);
        let max_of = |v: &[f64]| v.iter().copied().reduce(f64::max).unwrap_or(0.0);

        let tolerance = tolerance_secs.map(|tol| {
            let (passed, exceeded_by) = within_tolerance(&result.differences, tol);
            ToleranceVerdict {
                tolerance_secs: tol,
                passed,
                exceeded_by,
            }
        });

        Self {
            first_expected_secs: result.first_matched_secs().unwrap_or(0.0),
            count: diffs.len(),
            min_offset_millis: secs_to_nearest_milli(min_of(&diffs)),
            mean_offset_millis: secs_to_nearest_milli(mean(&diffs)),
            max_offset_millis: secs_to_nearest_milli(max_of(&diffs)),
            std_dev_millis: secs_to_nearest_milli(population_variance(&diffs).sqrt()),
            min_error_millis: min_of(&errors) * 1000.0,
            mean_error_millis: mean(&errors) * 1000.0,
            max_error_millis: max_of(&errors) * 1000.0,
            tolerance,
        }
    }

    pub fn passed(&self) -> Option<bool> {
        self.tolerance.as_ref().map(|t| t.passed)
    }
}

impl fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "First observed event matched the one expected at {:.3} seconds into the test sequence. {} readings recorded.",
            self.first_expected_secs, self.count
        )?;
        writeln!(f)?;
        writeln!(f, "Offsets between observed and expected:")?;
        for (label, millis) in [
            ("Lowest        ", self.min_offset_millis),
            ("AVERAGE (mean)", self.mean_offset_millis),
            ("Highest       ", self.max_offset_millis),
        ] {
            writeln!(
                f,
                "    {}: {:7}   milliseconds {}",
                label,
                millis,
                early_late(millis as f64)
            )?;
        }
        writeln!(f, "    Std. deviation: {:9.1} milliseconds", self.std_dev_millis as f64)?;
        writeln!(f)?;
        writeln!(f, "Total measurement error bounds:")?;
        writeln!(f, "    Lowest        : {:8.3} milliseconds", self.min_error_millis)?;
        writeln!(f, "    Average (mean): {:8.3} milliseconds", self.mean_error_millis)?;
        writeln!(f, "    Highest       : {:8.3} milliseconds", self.max_error_millis)?;

        if let Some(verdict) = &self.tolerance {
            writeln!(f)?;
            writeln!(
                f,
                "Accuracy tolerance of {:.3} milliseconds",
                verdict.tolerance_secs * 1000.0
            )?;
            if verdict.passed {
                writeln!(f, "    PASSED ... all observations within tolerance (allowing for error bounds)")?;
            } else {
                writeln!(
                    f,
                    "    FAILED ... {} of {} observations outside tolerance (allowing for error bounds)",
                    verdict.failures(),
                    self.count
                )?;
                for (i, exceeded) in verdict.exceeded_by.iter().enumerate() {
                    if *exceeded != 0.0 {
                        let millis = exceeded * 1000.0;
                        writeln!(
                            f,
                            "        Observation {} outside tolerance by {:.3} milliseconds {}",
                            i + 1,
                            millis,
                            early_late(millis)
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}
