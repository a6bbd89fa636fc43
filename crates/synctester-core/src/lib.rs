//! Synctester Core - Capture, clock correlation, detection and comparison
//!
//! This library measures how accurately a TV or companion screen application
//! presents light flashes and audio beeps relative to the synchronisation
//! timeline it is following. A sampling microcontroller records light sensor
//! and audio inputs; this crate maps every sample back onto the
//! synchronisation timeline and matches the detected events against the
//! expected test pattern.

pub mod analysis;
pub mod capture;
pub mod clock;
pub mod config;
pub mod detect;
pub mod dispersion;
pub mod pins;

pub use analysis::compare::{ComparisonResult, SequenceComparator};
pub use capture::session::{CaptureOrchestrator, Role, TestEntry};
pub use clock::correlation::{ClockCorrelation, ClockCorrelationTracker, CorrelationLog};
pub use config::{ExpectedTimings, MeasurementConfig, PatternMetadata};
pub use detect::detector::PulseDetector;
pub use pins::{Modality, Pin, PinMap, PinSet};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Date this crate was built (set by build.rs)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Wall clock tick rate (the wall clock counts nanoseconds)
pub const WALL_CLOCK_TICK_RATE: f64 = 1_000_000_000.0;

/// Length of one device sample interval in nanoseconds (1 ms blocks)
pub const SAMPLE_INTERVAL_NANOS: f64 = 1_000_000.0;
