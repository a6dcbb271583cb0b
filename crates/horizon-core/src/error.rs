use thiserror::Error;

/// Configuration errors. Raised when a controller is constructed, never at solve time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Prediction horizon must be at least 1")]
    ZeroPredictionHorizon,

    #[error("Control horizon must be at least 1")]
    ZeroControlHorizon,

    #[error("Control horizon {control} exceeds prediction horizon {prediction}")]
    ControlHorizonExceedsPrediction { control: usize, prediction: usize },

    #[error("Invalid control bounds: min={min}, max={max}")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Invalid dt: {0} (must be > 0)")]
    NonPositiveDt(f64),

    #[error("{matrix} must be square and {expected}x{expected}, got {rows}x{cols}")]
    WeightShape {
        matrix: &'static str,
        expected: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Weight matrices must only contain finite values")]
    NonFiniteWeight,

    #[error("Invalid solver option: {0}")]
    InvalidSolverOption(String),

    #[error("Invalid adaptive schedule: {0}")]
    InvalidSchedule(String),

    #[error("Unknown controller {0:?}, expected one of nonlinear, linear, adaptive")]
    UnknownController(String),
}

/// Errors surfaced by a solve.
///
/// Ordinary suboptimality (hitting the iteration cap, a singular QP) is not an error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MpcError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Prediction model failed at step {step}: {reason}")]
    Model { step: usize, reason: String },

    #[error("{what} dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

impl MpcError {
    pub fn dimension(what: &'static str, expected: usize, got: usize) -> Self {
        MpcError::DimensionMismatch {
            what,
            expected,
            got,
        }
    }
}
