//! Post-fit regression diagnostics.
//!
//! - variance inflation factors (multicollinearity)
//! - Jarque-Bera (residual normality)
//! - Breusch-Pagan (heteroscedasticity)
//! - Moran's I on residuals (spatial autocorrelation)
//! - Cook's distance (influential observations)

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

use crate::domain::{SpatialAutocorrelation, TestOutcome, VifEntry, VifLevel};
use crate::error::{EngineError, Result};
use crate::math::{auxiliary_r_squared, skewness_kurtosis};

/// Significance level for the residual tests.
pub const ALPHA: f64 = 0.05;

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// VIF for each regressor column of `x` (column 0 is the intercept).
pub fn variance_inflation_factors(x: &DMatrix<f64>, names: &[String]) -> Result<Vec<VifEntry>> {
    let k = x.ncols().saturating_sub(1);
    if k != names.len() {
        return Err(EngineError::invalid("VIF names do not match regressor count"));
    }
    if k == 1 {
        return Ok(vec![VifEntry {
            variable: names[0].clone(),
            vif: 1.0,
            level: VifLevel::Acceptable,
        }]);
    }

    let n = x.nrows();
    let mut out = Vec::with_capacity(k);
    for j in 1..=k {
        let others: Vec<usize> = (0..=k).filter(|&c| c != j).collect();
        let aux = DMatrix::from_fn(n, others.len(), |r, c| x[(r, others[c])]);
        let target = DVector::from_fn(n, |r, _| x[(r, j)]);
        let r2 = auxiliary_r_squared(&aux, &target)?;
        let tolerance = 1.0 - r2;
        if tolerance <= 1e-12 {
            return Err(EngineError::invalid(format!(
                "Variable '{}' is perfectly collinear with the other regressors",
                names[j - 1]
            )));
        }
        let vif = 1.0 / tolerance;
        out.push(VifEntry {
            variable: names[j - 1].clone(),
            vif,
            level: VifLevel::classify(vif),
        });
    }
    Ok(out)
}

/// Jarque-Bera normality test; rejection means non-normal residuals.
pub fn jarque_bera(residuals: &[f64]) -> Result<TestOutcome> {
    let n = residuals.len() as f64;
    let (skew, kurt) = skewness_kurtosis(residuals)
        .ok_or_else(|| EngineError::division_by_zero("Residuals have zero variance"))?;
    let statistic = n / 6.0 * (skew * skew + (kurt - 3.0).powi(2) / 4.0);
    chi_squared_outcome(statistic, 2.0)
}

/// Breusch-Pagan LM test: `n · R²` of squared residuals on the regressors.
pub fn breusch_pagan(x: &DMatrix<f64>, residuals: &[f64]) -> Result<TestOutcome> {
    let df = x.ncols().saturating_sub(1);
    if df == 0 {
        return Ok(TestOutcome {
            statistic: 0.0,
            p_value: 1.0,
            rejected: false,
        });
    }
    let e2 = DVector::from_iterator(residuals.len(), residuals.iter().map(|e| e * e));
    let r2 = auxiliary_r_squared(x, &e2)?;
    chi_squared_outcome(residuals.len() as f64 * r2, df as f64)
}

fn chi_squared_outcome(statistic: f64, df: f64) -> Result<TestOutcome> {
    if !statistic.is_finite() {
        return Err(EngineError::invalid("Test statistic is not finite"));
    }
    let dist = ChiSquared::new(df)
        .map_err(|e| EngineError::invalid(format!("Chi-squared distribution error: {e}")))?;
    let p_value = (1.0 - dist.cdf(statistic)).clamp(0.0, 1.0);
    Ok(TestOutcome {
        statistic,
        p_value,
        rejected: p_value < ALPHA,
    })
}

/// Great-circle distance in kilometres between two (lat, lon) points in degrees.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let h = ((lat2 - lat1) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lon2 - lon1) / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Moran's I of residuals with inverse-distance weights, under the
/// normality assumption.
///
/// Returns `None` when the statistic is undefined (fewer than three points,
/// all points coincident, or degenerate variance).
pub fn morans_i(coords: &[(f64, f64)], residuals: &[f64]) -> Option<SpatialAutocorrelation> {
    let n = coords.len();
    if n < 3 || residuals.len() != n {
        return None;
    }
    let mean = residuals.iter().sum::<f64>() / n as f64;
    let z: Vec<f64> = residuals.iter().map(|e| e - mean).collect();
    let denom: f64 = z.iter().map(|v| v * v).sum();
    if denom <= 0.0 {
        return None;
    }

    // Per-row: (Σ_j w_ij, Σ_j w_ij², Σ_j w_ij z_i z_j). Weights are symmetric.
    let rows: Vec<(f64, f64, f64)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut sum = 0.0;
            let mut sq = 0.0;
            let mut cross = 0.0;
            for j in 0..n {
                if i == j {
                    continue;
                }
                let d = haversine_km(coords[i], coords[j]);
                if d <= 0.0 {
                    continue;
                }
                let w = 1.0 / d;
                sum += w;
                sq += w * w;
                cross += w * z[i] * z[j];
            }
            (sum, sq, cross)
        })
        .collect();

    let w_total: f64 = rows.iter().map(|r| r.0).sum();
    if w_total <= 0.0 {
        return None;
    }
    let s1: f64 = 2.0 * rows.iter().map(|r| r.1).sum::<f64>();
    let s2: f64 = rows.iter().map(|r| (2.0 * r.0).powi(2)).sum();
    let cross: f64 = rows.iter().map(|r| r.2).sum();

    let nf = n as f64;
    let morans_i = nf / w_total * cross / denom;
    let expected_i = -1.0 / (nf - 1.0);
    let variance = (nf * nf * s1 - nf * s2 + 3.0 * w_total * w_total)
        / ((nf * nf - 1.0) * w_total * w_total)
        - expected_i * expected_i;
    if !(variance.is_finite() && variance > 0.0) {
        return None;
    }
    let z_score = (morans_i - expected_i) / variance.sqrt();
    let normal = Normal::new(0.0, 1.0).ok()?;
    let p_value = (2.0 * (1.0 - normal.cdf(z_score.abs()))).clamp(0.0, 1.0);

    morans_i.is_finite().then_some(SpatialAutocorrelation {
        morans_i,
        expected_i,
        z_score,
        p_value,
    })
}

/// Indices whose Cook's distance exceeds `factor / n`.
///
/// `residuals` are the weighted residuals, `sigma2` the residual variance and
/// `p` the parameter count (intercept included).
pub fn influential_observations(
    residuals: &[f64],
    leverage: &[f64],
    sigma2: f64,
    p: usize,
    factor: f64,
) -> Vec<usize> {
    let n = residuals.len();
    if n == 0 || sigma2 <= 0.0 {
        return Vec::new();
    }
    let cutoff = factor / n as f64;
    residuals
        .iter()
        .zip(leverage)
        .enumerate()
        .filter_map(|(i, (&e, &h))| {
            // A leverage of one pins the fit to this point.
            if h >= 1.0 - 1e-12 {
                return Some(i);
            }
            let d = e * e / (p as f64 * sigma2) * h / (1.0 - h).powi(2);
            (d > cutoff).then_some(i)
        })
        .collect()
}
