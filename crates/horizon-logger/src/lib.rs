mod log_codec;
mod logger;
mod playback;

pub use log_codec::*;
pub use logger::*;
pub use playback::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Trace => LogLevel::Trace,
        }
    }
}

/// A `log` record as stored in the log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    pub source: String,
}

/// Telemetry of one control tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// Index of the tick since the driver was created.
    pub tick: u64,
    /// Simulated time at the start of the tick, in seconds.
    pub time: f64,
    /// Measured plant state.
    pub state: Vec<f64>,
    /// Target the controller was tracking.
    pub target: Vec<f64>,
    /// Control applied to the plant.
    pub control: Vec<f64>,
    /// Cost of the solution the control was taken from.
    pub cost: f64,
    /// Name of the solver variant, e.g. `"nonlinear"`.
    pub controller: String,
    /// Whether the solver had to fall back to the zero sequence.
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogMessage {
    Line(LogLine),
    Tick(TickRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedMessage {
    /// Seconds since the logger was initialized.
    pub timestamp: f64,
    pub message: LogMessage,
}
