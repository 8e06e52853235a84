//! Model calibration.
//!
//! Responsibilities:
//!
//! - build the transformed design matrix from property records
//! - fit it with a pluggable estimator (least squares by default)
//! - compute VIF, residual diagnostics and influential observations

pub mod diagnostics;
pub mod fitter;

pub use diagnostics::*;
pub use fitter::*;
