//! Valuation model entity and calibration outputs.

use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::PropertyRecord;

/// Functional form of a valuation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Additive,
    /// Fitted on `ln(value)`; predictions are exponentiated.
    Multiplicative,
    Hybrid,
    Nonlinear,
}

impl ModelType {
    pub fn is_log_linear(self) -> bool {
        matches!(self, ModelType::Multiplicative)
    }
}

/// Semantic role of a regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    #[default]
    Continuous,
    /// `attribute=level` dummy.
    Categorical,
    Spatial,
    /// Boolean property flag.
    Indicator,
    Transformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transformation {
    #[default]
    None,
    Log,
    Square,
    Sqrt,
    Inverse,
    Standardize,
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transformation::None => "none",
            Transformation::Log => "log",
            Transformation::Square => "square",
            Transformation::Sqrt => "sqrt",
            Transformation::Inverse => "inverse",
            Transformation::Standardize => "standardize",
        };
        f.write_str(s)
    }
}

/// Centring constants captured at calibration for `standardize` variables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Standardization {
    pub mean: f64,
    pub std_dev: f64,
}

/// Per-variable regression estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableEstimate {
    pub coefficient: f64,
    /// Inference is undefined for an exact fit.
    pub std_error: Option<f64>,
    pub t_value: Option<f64>,
    pub p_value: Option<f64>,
    /// Share of explained scale, normalized across variables to sum to 1.
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVariable {
    pub name: String,
    pub kind: VariableKind,
    pub transformation: Transformation,
    /// `None` until the model is calibrated.
    pub estimate: Option<VariableEstimate>,
    pub standardization: Option<Standardization>,
}

impl ModelVariable {
    pub fn new(name: impl Into<String>, kind: VariableKind, transformation: Transformation) -> Self {
        Self {
            name: name.into(),
            kind,
            transformation,
            estimate: None,
            standardization: None,
        }
    }

    pub fn continuous(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::Continuous, Transformation::None)
    }
}

/// Goodness-of-fit and in-sample ratio statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitStatistics {
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
    pub cod: f64,
    pub prd: f64,
    /// `None` when the sample's market values do not vary.
    pub prb: Option<f64>,
    /// Mean absolute percentage error, in percent.
    pub mape: f64,
    pub rmse: f64,
    pub sample_size: usize,
}

/// Input to `ModelRegistry::create_model`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub model_type: ModelType,
    pub dependent_variable: String,
    pub variables: Vec<ModelVariable>,
    pub property_class: String,
    #[serde(default)]
    pub neighborhood: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationModel {
    pub id: String,
    pub name: String,
    pub model_type: ModelType,
    pub dependent_variable: String,
    pub variables: Vec<ModelVariable>,
    pub intercept: Option<f64>,
    pub fit: Option<FitStatistics>,
    pub created_at: DateTime<Utc>,
    pub last_calibrated: Option<DateTime<Utc>>,
    pub property_class: String,
    pub neighborhood: Option<String>,
}

impl ValuationModel {
    pub fn is_calibrated(&self) -> bool {
        self.fit.is_some() && self.intercept.is_some()
    }
}

/// One observed sale used for calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationSample {
    pub property: PropertyRecord,
    /// Observed value of the dependent variable (normally the sale price).
    pub observed: f64,
    /// Optional WLS weight; missing weights count as 1.
    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimationMethod {
    Ols,
    Wls,
}

/// Multicollinearity band for a VIF value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VifLevel {
    Acceptable,
    Caution,
    Problematic,
}

impl VifLevel {
    pub fn classify(vif: f64) -> Self {
        if vif < 2.5 {
            VifLevel::Acceptable
        } else if vif <= 5.0 {
            VifLevel::Caution
        } else {
            VifLevel::Problematic
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VifEntry {
    pub variable: String,
    pub vif: f64,
    pub level: VifLevel,
}

/// Outcome of a residual hypothesis test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
    /// `true` when the null hypothesis is rejected at 5%.
    pub rejected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialAutocorrelation {
    pub morans_i: f64,
    pub expected_i: f64,
    pub z_score: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidualDiagnostics {
    /// Jarque-Bera; rejection means residuals are not normal. `None` for an
    /// exact fit.
    pub normality: Option<TestOutcome>,
    /// Breusch-Pagan; rejection means heteroscedastic residuals.
    pub heteroscedasticity: Option<TestOutcome>,
    pub spatial_autocorrelation: Option<SpatialAutocorrelation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationResult {
    pub model_id: String,
    pub method: EstimationMethod,
    pub intercept: f64,
    pub variables: Vec<ModelVariable>,
    pub fit: FitStatistics,
    pub vif: Vec<VifEntry>,
    pub diagnostics: ResidualDiagnostics,
    /// Sample indices whose Cook's distance exceeds the influence cut-off.
    pub influential_observations: Vec<usize>,
    pub calibrated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vif_bands() {
        assert_eq!(VifLevel::classify(1.2), VifLevel::Acceptable);
        assert_eq!(VifLevel::classify(2.5), VifLevel::Caution);
        assert_eq!(VifLevel::classify(5.0), VifLevel::Caution);
        assert_eq!(VifLevel::classify(7.3), VifLevel::Problematic);
    }
}
