//! Flash and beep detection
//!
//! - Threshold calibration and the pulse state machine ([`pulse`])
//! - Device, wall clock and timeline conversions with error bounds ([`timing`])
//! - Per-capture detector producing timeline event times ([`detector`])

pub mod detector;
pub mod pulse;
pub mod timing;

pub use detector::{DetectedEvent, ObservedEvent, PulseDetector};
pub use timing::{Precision, TimingError};
