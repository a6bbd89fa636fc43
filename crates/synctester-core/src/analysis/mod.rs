//! Matching observed events against the expected pattern
//!
//! - Alignment search and per-event differences ([`compare`])
//! - Summary statistics and the tolerance verdict ([`stats`])

pub mod compare;
pub mod stats;

pub use compare::{CompareError, ComparisonResult, SequenceComparator, TimingDifference};
pub use stats::ResultSummary;
