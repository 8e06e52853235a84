//! Model evaluation.
//!
//! Calibration and valuation share two primitives:
//! - build a design row for a property (for the regression)
//! - predict the model value for a property (for valuation and residuals)

use crate::domain::{ModelVariable, PropertyRecord, ValuationModel};
use crate::error::{EngineError, Result, ensure_finite};
use crate::models::variable::{AttributeSource, apply_transformation};

/// Bind every variable of a model to its attribute source.
pub fn bind_variables(variables: &[ModelVariable]) -> Result<Vec<AttributeSource>> {
    variables.iter().map(AttributeSource::resolve).collect()
}

/// Fill a design row for `property`. The row includes the constant term first.
///
/// # Panics
/// Panics if `out` is shorter than `variables.len() + 1` or `sources` is
/// shorter than `variables`.
pub fn fill_design_row(
    variables: &[ModelVariable],
    sources: &[AttributeSource],
    property: &PropertyRecord,
    assessment_year: i32,
    out: &mut [f64],
) -> Result<()> {
    out[0] = 1.0;
    for (j, (variable, source)) in variables.iter().zip(sources).enumerate() {
        let raw = source.raw_value(property, assessment_year);
        out[j + 1] = apply_transformation(
            &variable.name,
            variable.transformation,
            raw,
            variable.standardization,
        )?;
    }
    Ok(())
}

/// `intercept + Σ transform(attr_i) · coef_i` for a calibrated model.
pub fn linear_predictor(
    model: &ValuationModel,
    sources: &[AttributeSource],
    property: &PropertyRecord,
    assessment_year: i32,
) -> Result<f64> {
    let intercept = model
        .intercept
        .ok_or_else(|| EngineError::ModelNotCalibrated(model.id.clone()))?;

    let mut row = vec![0.0; model.variables.len() + 1];
    fill_design_row(&model.variables, sources, property, assessment_year, &mut row)?;

    let mut value = intercept;
    for (variable, x) in model.variables.iter().zip(&row[1..]) {
        let estimate = variable
            .estimate
            .ok_or_else(|| EngineError::ModelNotCalibrated(model.id.clone()))?;
        value += estimate.coefficient * x;
    }
    Ok(value)
}

/// Model value before location adjustment and rounding.
pub fn predict(model: &ValuationModel, property: &PropertyRecord, assessment_year: i32) -> Result<f64> {
    if !model.is_calibrated() {
        return Err(EngineError::ModelNotCalibrated(model.id.clone()));
    }
    let sources = bind_variables(&model.variables)?;
    let lp = linear_predictor(model, &sources, property, assessment_year)?;
    let value = if model.model_type.is_log_linear() { lp.exp() } else { lp };
    ensure_finite(value, "Model prediction")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitStatistics, ModelType, Transformation, VariableEstimate, VariableKind};
    use chrono::Utc;

    fn estimate(coefficient: f64) -> Option<VariableEstimate> {
        Some(VariableEstimate {
            coefficient,
            std_error: Some(1.0),
            t_value: Some(coefficient),
            p_value: Some(0.01),
            importance: 0.5,
        })
    }

    fn calibrated(model_type: ModelType) -> ValuationModel {
        let mut area = ModelVariable::continuous("buildingArea");
        area.estimate = estimate(100.0);
        let mut lot = ModelVariable::new("lotSize", VariableKind::Continuous, Transformation::Sqrt);
        lot.estimate = estimate(50.0);
        ValuationModel {
            id: "m-1".into(),
            name: "test".into(),
            model_type,
            dependent_variable: "salePrice".into(),
            variables: vec![area, lot],
            intercept: Some(20_000.0),
            fit: Some(FitStatistics {
                r_squared: 0.9,
                adjusted_r_squared: 0.89,
                cod: 8.0,
                prd: 1.0,
                prb: Some(0.0),
                mape: 7.0,
                rmse: 1000.0,
                sample_size: 40,
            }),
            created_at: Utc::now(),
            last_calibrated: Some(Utc::now()),
            property_class: "residential".into(),
            neighborhood: None,
        }
    }

    #[test]
    fn additive_prediction_sums_terms() {
        let property = PropertyRecord {
            building_area: Some(1500.0),
            lot_size: Some(6400.0),
            ..Default::default()
        };
        let v = predict(&calibrated(ModelType::Additive), &property, 2024).unwrap();
        assert_eq!(v, 20_000.0 + 150_000.0 + 50.0 * 80.0);
    }

    #[test]
    fn uncalibrated_model_cannot_predict() {
        let mut model = calibrated(ModelType::Additive);
        model.fit = None;
        let err = predict(&model, &PropertyRecord::default(), 2024).unwrap_err();
        assert_eq!(err, EngineError::ModelNotCalibrated("m-1".into()));
    }

    #[test]
    fn multiplicative_overflow_is_an_error() {
        let property = PropertyRecord {
            building_area: Some(1500.0),
            lot_size: Some(6400.0),
            ..Default::default()
        };
        let err = predict(&calibrated(ModelType::Multiplicative), &property, 2024).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
