//! Capture session handling
//!
//! This module contains everything between the sampling device and the
//! detector:
//! - Capture device contract and a simulated device ([`device`])
//! - Flat buffer to per-pin channel reshaping ([`repackage`])
//! - Recorded captures for offline replay ([`recording`])
//! - Session orchestration for both timeline roles ([`session`])

pub mod device;
pub mod recording;
pub mod repackage;
pub mod session;
