//! Clock domains and the mappings between them
//!
//! - Wall clock and synchronisation timeline clock handles ([`source`])
//! - Correlation log, tracker and feed for the timeline mapping ([`correlation`])

pub mod correlation;
pub mod source;

use thiserror::Error;

/// Errors raised when converting between clock domains
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClockError {
    #[error("No wall clock to timeline correlation has been recorded")]
    EmptyCorrelationLog,
}
