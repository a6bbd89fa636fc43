//! Synctester - timing accuracy measurement for companion screen synchronisation
//!
//! This library re-exports the capture, clock correlation, detection and
//! comparison functionality from `synctester-core`.

pub use synctester_core::analysis;
pub use synctester_core::capture;
pub use synctester_core::clock;
pub use synctester_core::config;
pub use synctester_core::detect;
pub use synctester_core::dispersion;
pub use synctester_core::pins;

pub use synctester_core::{
    CaptureOrchestrator, ClockCorrelation, ClockCorrelationTracker, ComparisonResult,
    CorrelationLog, ExpectedTimings, MeasurementConfig, PatternMetadata, PulseDetector, Role,
    SequenceComparator, TestEntry,
};
pub use synctester_core::{Modality, Pin, PinMap, PinSet};
pub use synctester_core::{BUILD_DATE, VERSION};
