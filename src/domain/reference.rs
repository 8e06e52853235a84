//! Immutable reference tables: depreciation schedule and location factors.

use serde::{Deserialize, Serialize};

/// Physical depreciation percentage for an (effective age, quality class) cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepreciationTableEntry {
    pub effective_age: f64,
    pub quality_class: String,
    pub percentage: f64,
}

/// Multiplicative market adjustment for a neighborhood.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationAdjustmentFactor {
    pub factor: f64,
    pub confidence: f64,
}

impl LocationAdjustmentFactor {
    /// Applied when a neighborhood has no factor on file.
    pub const NEUTRAL: LocationAdjustmentFactor = LocationAdjustmentFactor {
        factor: 1.0,
        confidence: 1.0,
    };
}

impl Default for LocationAdjustmentFactor {
    fn default() -> Self {
        Self::NEUTRAL
    }
}
