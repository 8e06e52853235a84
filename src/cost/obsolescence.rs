//! Functional and external obsolescence by rule-based point accumulation,
//! and the compounding of all three depreciation components.

use serde::{Deserialize, Serialize};

use crate::domain::{DemographicRecord, PropertyRecord};

pub const MAX_FUNCTIONAL_PERCENT: f64 = 30.0;
pub const MAX_EXTERNAL_PERCENT: f64 = 25.0;
pub const MAX_ACCRUED_PERCENT: f64 = 90.0;

const BED_BATH_RATIO_LIMIT: f64 = 2.5;
const SYSTEMS_AGE_LIMIT: f64 = 25.0;
const UNEMPLOYMENT_BASELINE: f64 = 6.0;

/// Accrued depreciation broken down by component, all in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccruedDepreciation {
    pub physical: f64,
    pub functional: f64,
    pub external: f64,
    pub total: f64,
}

impl AccruedDepreciation {
    /// Combine components sequentially: each later component applies only to
    /// the value left after the earlier ones. Capped at 90%.
    pub fn compound(physical: f64, functional: f64, external: f64) -> Self {
        let remaining_after_physical = 1.0 - physical / 100.0;
        let total = physical
            + remaining_after_physical * functional
            + remaining_after_physical * (1.0 - functional / 100.0) * external;
        Self {
            physical,
            functional,
            external,
            total: total.min(MAX_ACCRUED_PERCENT),
        }
    }

    /// Share of replacement cost that survives depreciation.
    pub fn remaining_fraction(&self) -> f64 {
        1.0 - self.total / 100.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObsolescenceEstimator;

impl ObsolescenceEstimator {
    pub fn new() -> Self {
        Self
    }

    pub fn functional_obsolescence(&self, property: &PropertyRecord) -> f64 {
        let mut points = 0.0;

        if let (Some(beds), Some(baths)) = (property.bedrooms, property.bathrooms) {
            if baths > 0.0 && beds / baths > BED_BATH_RATIO_LIMIT {
                points += 5.0;
            }
        }
        if property.has_irregular_floor_plan {
            points += 7.0;
        }
        if property.has_outdated_features {
            points += 5.0;
        }

        // Only a recorded systems age scores; building age is already charged
        // as physical depreciation.
        if let Some(systems_age) = property.systems_age {
            if systems_age > SYSTEMS_AGE_LIMIT {
                points += ((systems_age - SYSTEMS_AGE_LIMIT) * 0.5).min(10.0);
            }
        }

        points.min(MAX_FUNCTIONAL_PERCENT)
    }

    pub fn external_obsolescence(&self, property: &PropertyRecord, demographics: Option<&DemographicRecord>) -> f64 {
        let mut points = 0.0;

        if property.proximity_to_negative_externality {
            points += 10.0;
        }
        if property.is_in_declining_neighborhood {
            points += 8.0;
        }
        if let Some(rate) = demographics.and_then(|d| d.unemployment_rate) {
            if rate.is_finite() && rate > UNEMPLOYMENT_BASELINE {
                points += (rate - UNEMPLOYMENT_BASELINE) * 0.5;
            }
        }
        if property.has_zoning_issues {
            points += 12.0;
        }

        points.min(MAX_EXTERNAL_PERCENT)
    }
}
