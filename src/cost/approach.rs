//! Cost approach: land value plus depreciated replacement cost.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ReferenceData;
use crate::cost::depreciation::DepreciationEngine;
use crate::cost::obsolescence::{AccruedDepreciation, ObsolescenceEstimator};
use crate::domain::{DemographicRecord, PropertyRecord};
use crate::error::{EngineError, Result, ensure_finite};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostApproachValue {
    pub replacement_cost_new: f64,
    pub depreciation: AccruedDepreciation,
    pub depreciated_improvements: f64,
    pub land_value: f64,
    pub value: f64,
}

/// Physical depreciation plus obsolescence for one assessment year.
#[derive(Debug, Clone)]
pub struct CostEngine {
    depreciation: DepreciationEngine,
    obsolescence: ObsolescenceEstimator,
    assessment_year: i32,
}

impl CostEngine {
    pub fn new(reference: &ReferenceData, assessment_year: i32) -> Self {
        Self {
            depreciation: DepreciationEngine::new(&reference.depreciation_table),
            obsolescence: ObsolescenceEstimator::new(),
            assessment_year,
        }
    }

    pub fn depreciation(&self) -> &DepreciationEngine {
        &self.depreciation
    }

    pub fn obsolescence(&self) -> &ObsolescenceEstimator {
        &self.obsolescence
    }

    pub fn assessment_year(&self) -> i32 {
        self.assessment_year
    }

    /// Physical depreciation at the property's effective age and quality class.
    pub fn physical_depreciation(&self, property: &PropertyRecord) -> Result<f64> {
        self.depreciation
            .physical_depreciation(property.effective_age(self.assessment_year), property.quality_class())
    }

    pub fn accrued_depreciation(
        &self,
        property: &PropertyRecord,
        demographics: Option<&DemographicRecord>,
    ) -> Result<AccruedDepreciation> {
        let physical = self.physical_depreciation(property)?;
        let functional = self.obsolescence.functional_obsolescence(property);
        let external = self.obsolescence.external_obsolescence(property, demographics);
        let accrued = AccruedDepreciation::compound(physical, functional, external);
        debug!(
            property = %property.id,
            physical,
            functional,
            external,
            total = accrued.total,
            "Accrued depreciation"
        );
        Ok(accrued)
    }

    pub fn cost_approach(
        &self,
        property: &PropertyRecord,
        replacement_cost_new: f64,
        land_value: f64,
        demographics: Option<&DemographicRecord>,
    ) -> Result<CostApproachValue> {
        for (what, v) in [("Replacement cost new", replacement_cost_new), ("Land value", land_value)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(EngineError::invalid(format!("{what} must be a non-negative number, got {v}")));
            }
        }
        let depreciation = self.accrued_depreciation(property, demographics)?;
        let depreciated_improvements = replacement_cost_new * depreciation.remaining_fraction();
        Ok(CostApproachValue {
            replacement_cost_new,
            depreciation,
            depreciated_improvements,
            land_value,
            value: ensure_finite(land_value + depreciated_improvements, "Cost approach value")?,
        })
    }
}

/// Land value per unit of area.
pub fn land_unit_rate(land_value: f64, land_area: f64) -> Result<f64> {
    if land_area == 0.0 {
        return Err(EngineError::division_by_zero("Land area is zero"));
    }
    if !(land_area.is_finite() && land_area > 0.0) {
        return Err(EngineError::invalid(format!("Land area must be positive, got {land_area}")));
    }
    ensure_finite(land_value / land_area, "Land unit rate")
}
