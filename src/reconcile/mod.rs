//! Reconciliation of the cost, sales-comparison and income approaches.
//!
//! Given up to three approach values for one property we:
//! - score each present approach's reliability from property characteristics
//! - weight approaches by reliability share
//! - round the weighted value to the nearest 100
//! - derive a confidence from how much the raw approach values disagree

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ReferenceData;
use crate::cost::{DepreciationEngine, ECONOMIC_LIFE_YEARS};
use crate::domain::PropertyRecord;
use crate::error::{EngineError, Result, ensure_finite};
use crate::math::{mean, population_std_dev};

const ROUNDING_UNIT: f64 = 100.0;
const COST_FLOOR: f64 = 0.3;
const SALES_FLOOR: f64 = 0.5;
const INCOME_FLOOR: f64 = 0.3;
/// Physical depreciation (percent) above which the cost approach is discounted.
const HEAVY_DEPRECIATION: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Approach {
    Cost,
    SalesComparison,
    Income,
}

impl Approach {
    pub fn as_str(self) -> &'static str {
        match self {
            Approach::Cost => "cost",
            Approach::SalesComparison => "sales comparison",
            Approach::Income => "income",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApproachValue {
    pub approach: Approach,
    pub value: f64,
    pub reliability: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverride {
    pub reason: String,
    pub user: String,
    pub timestamp: DateTime<Utc>,
    /// The computed value the override replaced.
    pub original_value: f64,
    pub override_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueReconciliation {
    pub approaches: Vec<ApproachValue>,
    pub final_value: f64,
    /// Weight-averaged reliability, 0-100.
    pub reliability_score: f64,
    /// 0-1; one minus the coefficient of variation of the approach values.
    pub confidence: f64,
    pub manual_override: Option<ManualOverride>,
}

impl ValueReconciliation {
    /// The value produced by reconciliation, regardless of any override.
    pub fn computed_value(&self) -> f64 {
        self.manual_override
            .as_ref()
            .map_or(self.final_value, |o| o.original_value)
    }

    /// Replace the final value, keeping the computed one in the audit record.
    pub fn apply_override(
        mut self,
        value: f64,
        reason: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Self> {
        let reason = reason.into();
        let user = user.into();
        if reason.trim().is_empty() || user.trim().is_empty() {
            return Err(EngineError::invalid("Manual override requires a reason and a user"));
        }
        if !(value.is_finite() && value >= 0.0) {
            return Err(EngineError::invalid(format!("Override value must be non-negative, got {value}")));
        }

        let original_value = self.computed_value();
        info!(user = %user, original_value, override_value = value, "Manual value override");
        self.manual_override = Some(ManualOverride {
            reason,
            user,
            timestamp: Utc::now(),
            original_value,
            override_value: value,
        });
        self.final_value = value;
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct ValueReconciler {
    depreciation: DepreciationEngine,
    assessment_year: i32,
}

impl ValueReconciler {
    pub fn new(reference: &ReferenceData, assessment_year: i32) -> Self {
        Self {
            depreciation: DepreciationEngine::new(&reference.depreciation_table),
            assessment_year,
        }
    }

    pub fn cost_reliability(&self, property: &PropertyRecord) -> Result<f64> {
        let age = property.effective_age(self.assessment_year);
        let mut r = 1.0 - age / ECONOMIC_LIFE_YEARS;
        if self.depreciation.physical_depreciation(age, property.quality_class())? > HEAVY_DEPRECIATION {
            r *= 0.8;
        }
        Ok(r.clamp(COST_FLOOR, 1.0))
    }

    pub fn sales_reliability(&self, property: &PropertyRecord) -> f64 {
        let mut r = if property.property_type.is_standard_residential() {
            0.9
        } else {
            0.8
        };
        if property.is_unique {
            r *= 0.7;
        }
        f64::clamp(r, SALES_FLOOR, 1.0)
    }

    pub fn income_reliability(&self, property: &PropertyRecord) -> f64 {
        let r: f64 = if property.property_type.is_income_producing() {
            0.9
        } else {
            0.5
        };
        r.clamp(INCOME_FLOOR, 1.0)
    }

    pub fn reconcile(
        &self,
        cost: Option<f64>,
        sales: Option<f64>,
        income: Option<f64>,
        property: &PropertyRecord,
    ) -> Result<ValueReconciliation> {
        let mut present = Vec::with_capacity(3);
        for (approach, value) in [
            (Approach::Cost, cost),
            (Approach::SalesComparison, sales),
            (Approach::Income, income),
        ] {
            let Some(value) = value else { continue };
            if !(value.is_finite() && value >= 0.0) {
                return Err(EngineError::invalid(format!(
                    "{} approach value must be non-negative, got {value}",
                    approach.as_str()
                )));
            }
            let reliability = match approach {
                Approach::Cost => self.cost_reliability(property)?,
                Approach::SalesComparison => self.sales_reliability(property),
                Approach::Income => self.income_reliability(property),
            };
            present.push((approach, value, reliability));
        }
        if present.is_empty() {
            return Err(EngineError::invalid("Reconciliation requires at least one approach value"));
        }

        let total_reliability: f64 = present.iter().map(|p| p.2).sum();
        let approaches: Vec<ApproachValue> = present
            .iter()
            .map(|&(approach, value, reliability)| ApproachValue {
                approach,
                value,
                reliability,
                weight: reliability / total_reliability,
            })
            .collect();

        let weighted: f64 = approaches.iter().map(|a| a.weight * a.value).sum();
        let final_value = (weighted / ROUNDING_UNIT).round() * ROUNDING_UNIT;
        let reliability_score: f64 = approaches.iter().map(|a| a.weight * a.reliability).sum::<f64>() * 100.0;

        let confidence = if approaches.len() == 1 {
            1.0
        } else {
            let values: Vec<f64> = approaches.iter().map(|a| a.value).collect();
            let m = mean(&values).unwrap_or(0.0);
            if m == 0.0 {
                return Err(EngineError::division_by_zero("Approach values average to zero"));
            }
            let cv = population_std_dev(&values).unwrap_or(0.0) / m;
            (1.0 - cv).max(0.0)
        };

        debug!(
            property = %property.id,
            approaches = approaches.len(),
            final_value,
            confidence,
            "Values reconciled"
        );
        Ok(ValueReconciliation {
            approaches,
            final_value: ensure_finite(final_value, "Reconciled value")?,
            reliability_score: ensure_finite(reliability_score, "Reliability score")?,
            confidence: ensure_finite(confidence, "Confidence")?,
            manual_override: None,
        })
    }
}
