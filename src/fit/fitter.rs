//! Model calibration against a sales sample.
//!
//! Given:
//! - a model specification (variables, transformations, functional form)
//! - observed sales with optional weights
//!
//! we:
//! - extract and transform each declared attribute into a design matrix
//! - fit the dependent variable with the configured `RegressionEstimator`
//! - derive per-variable inference, VIF, residual diagnostics and influence
//! - score the in-sample fit with ratio-study statistics
//!
//! The result is a detached `Calibration`; the registry decides when to
//! write it back to the stored model.

use std::fmt::Debug;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::warn;

use crate::audit::ratio::{SalePair, ratio_statistics};
use crate::domain::{
    CalibrationSample, EstimationMethod, FitStatistics, ModelVariable, ResidualDiagnostics,
    Standardization, Transformation, ValuationModel, VariableEstimate, VifEntry,
};
use crate::error::{EngineError, Result};
use crate::fit::diagnostics::{
    breusch_pagan, influential_observations, jarque_bera, morans_i, variance_inflation_factors,
};
use crate::math::{RegressionFit, mean, population_std_dev, sample_std_dev, weighted_least_squares};
use crate::models::{bind_variables, fill_design_row};

/// Pluggable fitting algorithm.
///
/// `x` carries the intercept in column 0; implementations must return
/// coefficients in column order.
pub trait RegressionEstimator: Debug + Send + Sync {
    fn estimate(&self, x: &DMatrix<f64>, y: &DVector<f64>, weights: &[f64]) -> Result<RegressionFit>;
}

/// Ordinary / weighted least squares.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastSquares;

impl RegressionEstimator for LeastSquares {
    fn estimate(&self, x: &DMatrix<f64>, y: &DVector<f64>, weights: &[f64]) -> Result<RegressionFit> {
        weighted_least_squares(x, y, weights)
    }
}

/// Options that affect how a model is calibrated.
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub assessment_year: i32,
    /// Cook's distance cut-off numerator (`factor / n`).
    pub cooks_distance_factor: f64,
}

/// A finished calibration, not yet applied to a stored model.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub method: EstimationMethod,
    pub intercept: f64,
    pub variables: Vec<ModelVariable>,
    pub fit: FitStatistics,
    pub vif: Vec<VifEntry>,
    pub diagnostics: ResidualDiagnostics,
    pub influential_observations: Vec<usize>,
}

/// Calibrate `model` against `samples`.
pub fn calibrate(
    model: &ValuationModel,
    samples: &[CalibrationSample],
    estimator: &dyn RegressionEstimator,
    opts: &FitOptions,
) -> Result<Calibration> {
    if samples.is_empty() {
        return Err(EngineError::InsufficientSample {
            required: model.variables.len() + 2,
            actual: 0,
        });
    }
    if model.variables.is_empty() {
        return Err(EngineError::invalid("Model declares no variables"));
    }

    let sources = bind_variables(&model.variables)?;
    let k = model.variables.len();
    let n = samples.len();

    for (i, s) in samples.iter().enumerate() {
        if !(s.observed.is_finite() && s.observed > 0.0) {
            return Err(EngineError::invalid(format!(
                "Sample {i}: observed {} must be a positive finite value",
                model.dependent_variable
            )));
        }
    }

    let weights: Vec<f64> = samples.iter().map(|s| s.weight.unwrap_or(1.0)).collect();
    let method = if weights.iter().all(|w| *w == 1.0) {
        EstimationMethod::Ols
    } else {
        EstimationMethod::Wls
    };

    // Capture centring constants before any row is transformed.
    let mut variables = model.variables.clone();
    for (j, variable) in variables.iter_mut().enumerate() {
        variable.estimate = None;
        variable.standardization = None;
        if variable.transformation != Transformation::Standardize {
            continue;
        }
        let raw: Vec<f64> = samples
            .iter()
            .map(|s| sources[j].raw_value(&s.property, opts.assessment_year))
            .collect();
        let centre = mean(&raw).unwrap_or(0.0);
        let std_dev = sample_std_dev(&raw).unwrap_or(0.0);
        if !(std_dev.is_finite() && std_dev > 0.0) {
            return Err(EngineError::Transformation {
                variable: variable.name.clone(),
                transformation: variable.transformation.to_string(),
                value: centre,
            });
        }
        variable.standardization = Some(Standardization {
            mean: centre,
            std_dev,
        });
    }

    let rows: Vec<Vec<f64>> = samples
        .par_iter()
        .map(|s| -> Result<Vec<f64>> {
            let mut row = vec![0.0; k + 1];
            fill_design_row(&variables, &sources, &s.property, opts.assessment_year, &mut row)?;
            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;

    let x = DMatrix::from_fn(n, k + 1, |r, c| rows[r][c]);
    let log_linear = model.model_type.is_log_linear();
    let y = DVector::from_iterator(
        n,
        samples
            .iter()
            .map(|s| if log_linear { s.observed.ln() } else { s.observed }),
    );

    let fit = estimator.estimate(&x, &y, &weights)?;
    if fit.coefficients.len() != k + 1 {
        return Err(EngineError::invalid("Estimator returned the wrong number of coefficients"));
    }

    // Importance: |β| · sd(x) / sd(y), normalized to sum to one.
    let y_sd = population_std_dev(y.as_slice()).unwrap_or(0.0);
    let mut raw_importance = Vec::with_capacity(k);
    for j in 1..=k {
        let column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
        let x_sd = population_std_dev(&column).unwrap_or(0.0);
        let scaled = if y_sd > 0.0 {
            fit.coefficients[j].abs() * x_sd / y_sd
        } else {
            0.0
        };
        raw_importance.push(scaled);
    }
    let importance_total: f64 = raw_importance.iter().sum();

    for (j, variable) in variables.iter_mut().enumerate() {
        let c = j + 1;
        variable.estimate = Some(VariableEstimate {
            coefficient: fit.coefficients[c],
            std_error: fit.std_errors[c],
            t_value: fit.t_values[c],
            p_value: fit.p_values[c],
            importance: if importance_total > 0.0 {
                raw_importance[j] / importance_total
            } else {
                0.0
            },
        });
    }

    let names: Vec<String> = variables.iter().map(|v| v.name.clone()).collect();
    let vif = variance_inflation_factors(&x, &names)?;

    let working: Vec<f64> = fit
        .residuals
        .iter()
        .zip(&weights)
        .map(|(e, w)| e * w.sqrt())
        .collect();
    // Residual tests have nothing to measure on an exact fit.
    let diagnostics = if fit.exact {
        ResidualDiagnostics {
            normality: None,
            heteroscedasticity: None,
            spatial_autocorrelation: None,
        }
    } else {
        let coords: Option<Vec<(f64, f64)>> = samples.iter().map(|s| s.property.coordinates()).collect();
        ResidualDiagnostics {
            normality: Some(jarque_bera(&working)?),
            heteroscedasticity: Some(breusch_pagan(&x, &working)?),
            spatial_autocorrelation: coords.and_then(|c| morans_i(&c, &working)),
        }
    };
    let influential = influential_observations(
        &working,
        &fit.leverage,
        fit.sigma2,
        k + 1,
        opts.cooks_distance_factor,
    );

    let fit_stats = in_sample_statistics(samples, &fit, log_linear)?;

    Ok(Calibration {
        method,
        intercept: fit.coefficients[0],
        variables,
        fit: fit_stats,
        vif,
        diagnostics,
        influential_observations: influential,
    })
}

/// Ratio statistics, MAPE and RMSE of fitted values on the value scale.
///
/// MAPE and RMSE cover every sample. The ratio statistics only cover samples
/// with a positive fitted value, since a ratio needs a positive assessment.
fn in_sample_statistics(
    samples: &[CalibrationSample],
    fit: &RegressionFit,
    log_linear: bool,
) -> Result<FitStatistics> {
    let predicted: Vec<f64> = fit
        .fitted
        .iter()
        .map(|f| if log_linear { f.exp() } else { *f })
        .collect();

    let mut pairs = Vec::with_capacity(samples.len());
    let mut abs_pct = 0.0;
    let mut sq = 0.0;
    for (s, p) in samples.iter().zip(&predicted) {
        if !p.is_finite() {
            return Err(EngineError::invalid("Calibrated model produces non-finite values"));
        }
        if *p > 0.0 {
            pairs.push(SalePair {
                market_value: s.observed,
                assessed_value: *p,
            });
        }
        abs_pct += ((p - s.observed) / s.observed).abs();
        sq += (p - s.observed).powi(2);
    }

    let excluded = samples.len() - pairs.len();
    if excluded > 0 {
        warn!(
            excluded,
            remaining = pairs.len(),
            "Non-positive fitted values left out of in-sample ratio statistics"
        );
    }
    if pairs.len() < 2 {
        return Err(EngineError::InsufficientSample {
            required: 2,
            actual: pairs.len(),
        });
    }

    let n = samples.len() as f64;
    let ratios = ratio_statistics(&pairs)?;

    Ok(FitStatistics {
        r_squared: fit.r_squared,
        adjusted_r_squared: fit.adjusted_r_squared,
        cod: ratios.cod,
        prd: ratios.prd,
        prb: ratios.prb,
        mape: abs_pct / n * 100.0,
        rmse: (sq / n).sqrt(),
        sample_size: samples.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelType, PropertyRecord, VariableKind};
    use chrono::Utc;

    fn model(variables: Vec<ModelVariable>, model_type: ModelType) -> ValuationModel {
        ValuationModel {
            id: "m".into(),
            name: "m".into(),
            model_type,
            dependent_variable: "salePrice".into(),
            variables,
            intercept: None,
            fit: None,
            created_at: Utc::now(),
            last_calibrated: None,
            property_class: "residential".into(),
            neighborhood: None,
        }
    }

    /// price = 25_000 + 110·area + 4_000·bathrooms with a deterministic wiggle.
    fn samples(n: usize) -> Vec<CalibrationSample> {
        (0..n)
            .map(|i| {
                let area = 1_000.0 + 37.0 * i as f64;
                let baths = 1.0 + (i % 3) as f64;
                let wiggle = if i % 2 == 0 { 1_500.0 } else { -1_500.0 };
                CalibrationSample {
                    property: PropertyRecord {
                        id: format!("P{i}"),
                        building_area: Some(area),
                        bathrooms: Some(baths),
                        ..Default::default()
                    },
                    observed: 25_000.0 + 110.0 * area + 4_000.0 * baths + wiggle,
                    weight: None,
                }
            })
            .collect()
    }

    fn opts() -> FitOptions {
        FitOptions {
            assessment_year: 2024,
            cooks_distance_factor: 4.0,
        }
    }

    #[test]
    fn additive_calibration_recovers_coefficients() {
        let m = model(
            vec![
                ModelVariable::continuous("buildingArea"),
                ModelVariable::continuous("bathrooms"),
            ],
            ModelType::Additive,
        );
        let cal = calibrate(&m, &samples(40), &LeastSquares, &opts()).unwrap();

        assert_eq!(cal.method, EstimationMethod::Ols);
        let area = cal.variables[0].estimate.unwrap();
        assert!((area.coefficient - 110.0).abs() < 2.0, "area β = {}", area.coefficient);
        assert!(area.p_value.unwrap() < 0.001);
        assert!(cal.diagnostics.normality.is_some());
        assert!(cal.fit.r_squared > 0.99);
        assert!(cal.fit.adjusted_r_squared <= cal.fit.r_squared);
        assert!(cal.fit.cod < 5.0);
        assert_eq!(cal.fit.sample_size, 40);
        let importance: f64 = cal
            .variables
            .iter()
            .map(|v| v.estimate.unwrap().importance)
            .sum();
        assert!((importance - 1.0).abs() < 1e-9);
        assert_eq!(cal.vif.len(), 2);
        assert!(cal.diagnostics.spatial_autocorrelation.is_none());
    }

    #[test]
    fn weights_switch_to_wls() {
        let m = model(vec![ModelVariable::continuous("buildingArea")], ModelType::Additive);
        let mut s = samples(35);
        s[0].weight = Some(2.0);
        let cal = calibrate(&m, &s, &LeastSquares, &opts()).unwrap();
        assert_eq!(cal.method, EstimationMethod::Wls);
    }

    #[test]
    fn standardize_captures_centring() {
        let m = model(
            vec![ModelVariable::new(
                "buildingArea",
                VariableKind::Continuous,
                Transformation::Standardize,
            )],
            ModelType::Multiplicative,
        );
        let cal = calibrate(&m, &samples(30), &LeastSquares, &opts()).unwrap();
        let s = cal.variables[0].standardization.unwrap();
        assert!((s.mean - (1_000.0 + 37.0 * 14.5)).abs() < 1e-9);
        assert!(s.std_dev > 0.0);
    }

    #[test]
    fn log_of_missing_attribute_fails_with_variable_name() {
        let m = model(
            vec![ModelVariable::new("lotSize", VariableKind::Continuous, Transformation::Log)],
            ModelType::Additive,
        );
        let err = calibrate(&m, &samples(30), &LeastSquares, &opts()).unwrap_err();
        assert!(matches!(err, EngineError::Transformation { ref variable, .. } if variable == "lotSize"));
    }

    #[test]
    fn non_positive_observation_is_rejected() {
        let m = model(vec![ModelVariable::continuous("buildingArea")], ModelType::Additive);
        let mut s = samples(30);
        s[3].observed = 0.0;
        assert!(matches!(
            calibrate(&m, &s, &LeastSquares, &opts()),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn noiseless_sample_is_recovered_exactly() {
        let m = model(
            vec![
                ModelVariable::continuous("buildingArea"),
                ModelVariable::continuous("bathrooms"),
            ],
            ModelType::Additive,
        );
        let mut s = samples(40);
        for sample in &mut s {
            let area = sample.property.building_area.unwrap_or(0.0);
            let baths = sample.property.bathrooms.unwrap_or(0.0);
            sample.observed = 25_000.0 + 110.0 * area + 4_000.0 * baths;
        }
        let cal = calibrate(&m, &s, &LeastSquares, &opts()).unwrap();

        assert!((cal.intercept - 25_000.0).abs() < 1e-4);
        let area = cal.variables[0].estimate.unwrap();
        let baths = cal.variables[1].estimate.unwrap();
        assert!((area.coefficient - 110.0).abs() < 1e-7);
        assert!((baths.coefficient - 4_000.0).abs() < 1e-5);
        assert_eq!(area.p_value, None);
        assert_eq!(baths.std_error, None);
        assert_eq!(cal.fit.r_squared, 1.0);
        assert!(cal.fit.cod < 1e-6);
        assert!(cal.diagnostics.normality.is_none());
        assert!(cal.diagnostics.heteroscedasticity.is_none());
        assert!(cal.influential_observations.is_empty());
    }

    #[test]
    fn negative_fitted_values_are_left_out_of_ratio_statistics() {
        // A steep line through large parcels plus a cluster of small parcels:
        // the fitted line is negative at the small parcels.
        let m = model(vec![ModelVariable::continuous("buildingArea")], ModelType::Additive);
        let mut s: Vec<CalibrationSample> = (0..40)
            .map(|i| {
                let area = 1_000.0 + 50.0 * i as f64;
                let wiggle = if i % 2 == 0 { 500.0 } else { -500.0 };
                CalibrationSample {
                    property: PropertyRecord {
                        id: format!("L{i}"),
                        building_area: Some(area),
                        ..Default::default()
                    },
                    observed: 60.0 * area - 20_000.0 + wiggle,
                    weight: None,
                }
            })
            .collect();
        for i in 0..4 {
            s.push(CalibrationSample {
                property: PropertyRecord {
                    id: format!("S{i}"),
                    building_area: Some(100.0 + 10.0 * i as f64),
                    ..Default::default()
                },
                observed: 1_000.0,
                weight: None,
            });
        }

        let cal = calibrate(&m, &s, &LeastSquares, &opts()).unwrap();
        assert_eq!(cal.fit.sample_size, 44);
        assert!(cal.fit.cod.is_finite());
        assert!(cal.fit.mape > 0.0);
        assert!(cal.intercept < 0.0);
    }
}
