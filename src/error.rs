//! Engine error taxonomy.
//!
//! Every failure the engine can produce is recoverable: callers decide how to
//! surface it. The CLI maps each variant to a process exit code.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Unknown model id.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Calibration sample below the configured minimum.
    #[error("Insufficient sample: {actual} observations, at least {required} required")]
    InsufficientSample { required: usize, actual: usize },

    /// Valuation attempted before the model was calibrated.
    #[error("Model {0} has not been calibrated")]
    ModelNotCalibrated(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A denominator that must be non-zero was zero.
    #[error("Division by zero: {0}")]
    DivisionByZero(String),

    /// A declared transformation cannot be applied to the attribute value.
    #[error("Cannot apply {transformation} transformation to variable '{variable}' (value {value})")]
    Transformation {
        variable: String,
        transformation: String,
        value: f64,
    },

    /// Calibration exceeded its time budget; the model keeps its previous state.
    #[error("Calibration of model {model_id} timed out after {seconds:.1}s")]
    Timeout { model_id: String, seconds: f64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn division_by_zero(message: impl Into<String>) -> Self {
        Self::DivisionByZero(message.into())
    }

    /// Process exit code for the `cama` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Config(_) => 2,
            EngineError::InvalidInput(_)
            | EngineError::DivisionByZero(_)
            | EngineError::Transformation { .. } => 3,
            EngineError::ModelNotFound(_)
            | EngineError::ModelNotCalibrated(_)
            | EngineError::InsufficientSample { .. } => 4,
            EngineError::Timeout { .. } => 5,
        }
    }
}

/// Reject NaN/Infinity before it leaves the engine.
pub fn ensure_finite(value: f64, what: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::invalid(format!("{what} is not a finite number")))
    }
}
