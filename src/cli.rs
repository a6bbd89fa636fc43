//! Command line parsing for the replay tool

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use synctester::Pin;

#[derive(Error, Debug, PartialEq)]
pub enum ArgError {
    #[error("{0} requires a value")]
    MissingValue(&'static str),

    #[error("Invalid value for {flag}: {value}")]
    InvalidValue { flag: &'static str, value: String },

    #[error("Unknown argument: {0}")]
    Unknown(String),

    #[error("--capture is required")]
    NoCapture,
}

/// What the user asked for
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Version,
    Replay(ReplayArgs),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReplayArgs {
    pub capture: PathBuf,
    pub config: Option<PathBuf>,
    /// Pattern metadata file per pin
    pub patterns: Vec<(Pin, PathBuf)>,
    pub tolerance_millis: Option<f64>,
    /// Write a JSON report here as well as printing
    pub json: Option<PathBuf>,
}

fn value<'a>(args: &'a [String], i: usize, flag: &'static str) -> Result<&'a str, ArgError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or(ArgError::MissingValue(flag))
}

/// Parse arguments, excluding the program name
pub fn parse(args: &[String]) -> Result<Command, ArgError> {
    let mut capture: Option<PathBuf> = None;
    let mut replay = ReplayArgs::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-v" => return Ok(Command::Version),
            "--capture" | "-c" => {
                capture = Some(PathBuf::from(value(args, i, "--capture")?));
                i += 2;
                continue;
            }
            "--config" => {
                replay.config = Some(PathBuf::from(value(args, i, "--config")?));
                i += 2;
                continue;
            }
            "--json" => {
                replay.json = Some(PathBuf::from(value(args, i, "--json")?));
                i += 2;
                continue;
            }
            "--pin" | "-p" => {
                let spec = value(args, i, "--pin")?;
                let invalid = || ArgError::InvalidValue {
                    flag: "--pin",
                    value: spec.to_string(),
                };
                let (name, path) = spec.split_once('=').ok_or_else(invalid)?;
                let pin = Pin::from_str(name).map_err(|_| invalid())?;
                replay.patterns.push((pin, PathBuf::from(path)));
                i += 2;
                continue;
            }
            "--tolerance" | "-t" => {
                let raw = value(args, i, "--tolerance")?;
                let millis = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|ms| *ms >= 0.0)
                    .ok_or_else(|| ArgError::InvalidValue {
                        flag: "--tolerance",
                        value: raw.to_string(),
                    })?;
                replay.tolerance_millis = Some(millis);
                i += 2;
                continue;
            }
            arg => return Err(ArgError::Unknown(arg.to_string())),
        }
    }

    replay.capture = capture.ok_or(ArgError::NoCapture)?;
    Ok(Command::Replay(replay))
}
