//! Batch-level audits over populations of valued properties.

pub mod quality;
pub mod ratio;

pub use quality::*;
pub use ratio::*;
