//! Cost-basis adjustments: physical depreciation, obsolescence and the cost
//! approach that combines them with land value.

pub mod approach;
pub mod depreciation;
pub mod obsolescence;

pub use approach::*;
pub use depreciation::*;
pub use obsolescence::*;
