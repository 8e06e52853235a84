//! Input data sources. The engine owns no persistence; the synthetic
//! generator stands in for the data-access collaborator in demos and tests.

pub mod sample;

pub use sample::*;
