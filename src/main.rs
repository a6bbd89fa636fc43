//! Synctester - replay a recorded capture and report timing accuracy
//!
//! Runs detection and comparison offline against a capture recorded by a
//! measurement session, so that thresholds and alignment can be checked
//! without the sampling hardware attached.

mod cli;
mod report;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use std::collections::BTreeMap;
use tracing::{info, warn};

use cli::{Command, ReplayArgs};
use report::{PinReport, ReplayReport};
use synctester::analysis::stats::ResultSummary;
use synctester::capture::recording::CaptureRecording;
use synctester::dispersion;
use synctester::{
    CaptureOrchestrator, ClockCorrelationTracker, ExpectedTimings, MeasurementConfig,
    PatternMetadata, PinSet, Role,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("synctester=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match cli::parse(&args) {
        Ok(Command::Help) => print_help(),
        Ok(Command::Version) => {
            println!("synctester {} (built {})", synctester::VERSION, synctester::BUILD_DATE);
        }
        Ok(Command::Replay(replay)) => run_replay(&replay)?,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
        }
    }
    Ok(())
}

fn print_help() {
    println!("Usage: synctester --capture FILE --pin NAME=METADATA [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --capture FILE        Recorded capture to replay (JSON)");
    println!("  -p, --pin NAME=FILE       Pattern metadata for a pin (repeatable)");
    println!("                            NAME is LIGHT_0, AUDIO_0, LIGHT_1 or AUDIO_1");
    println!("      --config FILE         Measurement configuration (JSON)");
    println!("  -t, --tolerance MS        Pass/fail tolerance in milliseconds");
    println!("      --json FILE           Also write the results as JSON");
    println!("  -v, --version             Show version");
    println!("  -h, --help                Show this help");
    println!();
    println!("Example:");
    println!("  synctester -c capture.json -p LIGHT_0=pattern.json -p AUDIO_0=pattern.json -t 10");
}

fn run_replay(args: &ReplayArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => MeasurementConfig::load(path),
        None => MeasurementConfig::default(),
    };
    if let Some(ms) = args.tolerance_millis {
        config.tolerance_secs = Some(ms / 1000.0);
    }

    let recording = CaptureRecording::load(&args.capture)?;
    let pins = PinSet::new(recording.pins.iter().copied())
        .context("Recorded capture has an invalid pin list")?;

    let mut metadata = BTreeMap::new();
    for (pin, path) in &args.patterns {
        metadata.insert(*pin, PatternMetadata::load(path)?);
    }
    for pin in pins.iter() {
        if !metadata.contains_key(&pin) {
            bail!("No pattern metadata given for {} (use --pin {}=FILE)", pin, pin);
        }
    }
    let expected = ExpectedTimings::from_metadata(metadata.iter().map(|(pin, m)| (*pin, m)));

    // The recording already fits the device buffer
    config.pin_map = recording.pin_map;
    config.capture_secs = -1;

    println!(
        "Replaying capture taken {} ({} pins, {} ms)",
        recording.recorded_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        pins.len(),
        recording.interval_count
    );
    println!();

    let tracker = ClockCorrelationTracker::new(config.timeline_tick_rate);
    let mut session = CaptureOrchestrator::new(
        recording.replay_device(),
        Role::Consumer(tracker),
        pins,
        expected,
        config.clone(),
    )?;

    // Stand in for the protocol listener that ran during the capture
    if let Some(feed) = session.correlation_feed() {
        for correlation in recording.correlations.iter() {
            feed.record(*correlation);
        }
    }

    session.capture()?;
    let dispersion = dispersion::constant(recording.dispersion_nanos.unwrap_or(0.0));
    let detected = session.detect(&dispersion)?.len();
    info!(pins = detected, "Replay detection finished");

    let mut reports = Vec::new();
    for (pin, result) in session.compare_all() {
        println!("==== {} ====", pin);
        let passed = match &result {
            Ok(comparison) => {
                let summary = ResultSummary::from_comparison(comparison, config.tolerance_secs);
                println!("{}", summary);
                summary.passed()
            }
            Err(e) => {
                warn!(pin = %pin, error = %e, "Pin skipped");
                println!("Could not compare: {}", e);
                println!();
                None
            }
        };
        reports.push(PinReport::new(pin, &result, passed));
    }

    if reports.is_empty() {
        println!("No flashes or beeps detected on any pin.");
    }

    if let Some(path) = &args.json {
        ReplayReport {
            captured_at: recording.recorded_at,
            replayed_at: Utc::now(),
            pins: reports,
        }
        .save(path)?;
    }

    Ok(())
}
