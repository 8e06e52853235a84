//! Physical depreciation.
//!
//! Given an effective age and a quality class we:
//! - step-look-up the class schedule (greatest tabulated age not above the
//!   effective age; no interpolation)
//! - fall back to straight-line age-life when the class or a matching row is
//!   missing

use std::collections::HashMap;

use tracing::debug;

use crate::domain::{DepreciationTableEntry, normalize_key};
use crate::error::{EngineError, Result};

/// Typical economic life for the age-life fallback, in years.
pub const ECONOMIC_LIFE_YEARS: f64 = 70.0;
/// Ceiling on age-life depreciation, in percent.
pub const MAX_AGE_LIFE_PERCENT: f64 = 80.0;

/// Straight-line age-life depreciation in percent, clamped to `[0, 80]`.
pub fn age_life_depreciation(effective_age: f64) -> f64 {
    (effective_age / ECONOMIC_LIFE_YEARS * 100.0).clamp(0.0, MAX_AGE_LIFE_PERCENT)
}

#[derive(Debug, Clone, Default)]
pub struct DepreciationEngine {
    /// Normalized class -> (age, percentage) sorted by age.
    schedules: HashMap<String, Vec<(f64, f64)>>,
}

impl DepreciationEngine {
    pub fn new(table: &[DepreciationTableEntry]) -> Self {
        let mut schedules: HashMap<String, Vec<(f64, f64)>> = HashMap::new();
        for entry in table {
            schedules
                .entry(normalize_key(&entry.quality_class))
                .or_default()
                .push((entry.effective_age, entry.percentage));
        }
        for rows in schedules.values_mut() {
            rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
        Self { schedules }
    }

    pub fn has_class(&self, quality_class: &str) -> bool {
        self.schedules.contains_key(&normalize_key(quality_class))
    }

    /// Physical depreciation percentage for `effective_age` years at `quality_class`.
    pub fn physical_depreciation(&self, effective_age: f64, quality_class: &str) -> Result<f64> {
        if !(effective_age.is_finite() && effective_age >= 0.0) {
            return Err(EngineError::invalid(format!(
                "Effective age must be a non-negative number, got {effective_age}"
            )));
        }

        let step = self
            .schedules
            .get(&normalize_key(quality_class))
            .and_then(|rows| rows.iter().take_while(|(age, _)| *age <= effective_age).last())
            .map(|(_, pct)| *pct);

        match step {
            Some(pct) => Ok(pct),
            None => {
                debug!(quality_class, effective_age, "No depreciation row; using age-life");
                Ok(age_life_depreciation(effective_age))
            }
        }
    }
}
