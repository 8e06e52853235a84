//! Domain types shared across the engine.
//!
//! - property and demographic input records (`property`)
//! - the valuation model entity and calibration outputs (`model`)
//! - reference-table rows (`reference`)

pub mod model;
pub mod property;
pub mod reference;

pub use model::*;
pub use property::*;
pub use reference::*;
