//! Valuation model evaluation and the model registry.
//!
//! Evaluation is kept as small, pure functions so calibration and valuation
//! share exactly the same design-row construction.

pub mod model;
pub mod registry;
pub mod variable;

pub use model::*;
pub use registry::*;
pub use variable::*;
