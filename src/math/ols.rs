//! Weighted least squares with classical inference.
//!
//! Every calibration reduces to:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! Implementation choices:
//! - Rows are scaled by `sqrt(w_i)` and the resulting OLS problem is solved by
//!   SVD, which stays well-behaved on tall design matrices.
//! - Standard errors come from `σ² (X_w^T X_w)^{-1}`. A rank-deficient design
//!   (collinear regressors) has no such inverse and is rejected.
//! - An exact fit keeps its coefficients; standard errors, t-values and
//!   p-values are undefined there and reported as `None`.
//! - Leverage is the diagonal of the weighted hat matrix; it feeds Cook's
//!   distance in the calibration diagnostics.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{EngineError, Result};

/// Relative SSE below which a fit is treated as exact.
const EXACT_FIT_TOLERANCE: f64 = 1e-14;

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Full output of a weighted regression. Index 0 is the intercept column.
#[derive(Debug, Clone)]
pub struct RegressionFit {
    pub coefficients: Vec<f64>,
    /// `None` throughout when the fit is exact.
    pub std_errors: Vec<Option<f64>>,
    pub t_values: Vec<Option<f64>>,
    pub p_values: Vec<Option<f64>>,
    pub fitted: Vec<f64>,
    /// Unweighted residuals `y - ŷ`.
    pub residuals: Vec<f64>,
    pub leverage: Vec<f64>,
    /// Weighted residual sum of squares.
    pub sse: f64,
    /// Residual variance estimate `sse / (n - p)`; zero for an exact fit.
    pub sigma2: f64,
    /// The sample lies on the fitted surface up to rounding.
    pub exact: bool,
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
    pub df_resid: usize,
}

/// Fit `y ~ X` by weighted least squares. `x` must already contain the
/// intercept column.
pub fn weighted_least_squares(x: &DMatrix<f64>, y: &DVector<f64>, w: &[f64]) -> Result<RegressionFit> {
    let n = x.nrows();
    let p = x.ncols();
    if y.len() != n || w.len() != n {
        return Err(EngineError::invalid("Design matrix, response and weights differ in length"));
    }
    if n <= p {
        return Err(EngineError::InsufficientSample {
            required: p + 1,
            actual: n,
        });
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(EngineError::invalid("Design matrix or response contains non-finite values"));
    }
    if w.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
        return Err(EngineError::invalid("Regression weights must be finite and positive"));
    }

    let sw: Vec<f64> = w.iter().map(|v| v.sqrt()).collect();
    let mut xw = x.clone();
    let mut yw = y.clone();
    for i in 0..n {
        for j in 0..p {
            xw[(i, j)] *= sw[i];
        }
        yw[i] *= sw[i];
    }

    let beta = solve_least_squares(&xw, &yw)
        .ok_or_else(|| EngineError::invalid("Design matrix is too ill-conditioned to solve"))?;
    let xtx_inv = (xw.transpose() * &xw).try_inverse().ok_or_else(|| {
        EngineError::invalid("Design matrix is rank deficient (perfectly collinear regressors)")
    })?;

    let fitted_v = x * &beta;
    let fitted: Vec<f64> = fitted_v.iter().copied().collect();
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(yi, fi)| yi - fi).collect();

    let w_sum: f64 = w.iter().sum();
    let y_bar = y.iter().zip(w).map(|(yi, wi)| wi * yi).sum::<f64>() / w_sum;
    let sst: f64 = y.iter().zip(w).map(|(yi, wi)| wi * (yi - y_bar).powi(2)).sum();
    if sst <= 0.0 {
        return Err(EngineError::division_by_zero("Dependent variable has zero variance"));
    }

    let sse: f64 = residuals.iter().zip(w).map(|(r, wi)| wi * r * r).sum();
    if !sse.is_finite() {
        return Err(EngineError::invalid("Residual sum of squares is not finite"));
    }
    let df_resid = n - p;
    // Rounding noise on an exact fit would otherwise produce astronomic t-values.
    let exact = sse <= sst * EXACT_FIT_TOLERANCE;
    let (sigma2, r_squared) = if exact {
        (0.0, 1.0)
    } else {
        (sse / df_resid as f64, 1.0 - sse / sst)
    };
    let adjusted_r_squared = 1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / df_resid as f64;

    let mut std_errors = vec![None; p];
    let mut t_values = vec![None; p];
    let mut p_values = vec![None; p];
    if !exact {
        let t_dist = StudentsT::new(0.0, 1.0, df_resid as f64)
            .map_err(|e| EngineError::invalid(format!("Student-t distribution error: {e}")))?;
        for j in 0..p {
            let se = (sigma2 * xtx_inv[(j, j)]).sqrt();
            if !(se.is_finite() && se > 0.0) {
                return Err(EngineError::division_by_zero(format!(
                    "Standard error of coefficient {j} is zero"
                )));
            }
            let t = beta[j] / se;
            std_errors[j] = Some(se);
            t_values[j] = Some(t);
            p_values[j] = Some((2.0 * (1.0 - t_dist.cdf(t.abs()))).clamp(0.0, 1.0));
        }
    }

    let leverage: Vec<f64> = (0..n)
        .map(|i| {
            let row = xw.row(i);
            (row * &xtx_inv * row.transpose())[(0, 0)]
        })
        .collect();

    Ok(RegressionFit {
        coefficients: beta.iter().copied().collect(),
        std_errors,
        t_values,
        p_values,
        fitted,
        residuals,
        leverage,
        sse,
        sigma2,
        exact,
        r_squared,
        adjusted_r_squared,
        df_resid,
    })
}

/// R² of an unweighted auxiliary regression (VIF, Breusch-Pagan).
///
/// A constant response has nothing to explain and yields `0.0`.
pub fn auxiliary_r_squared(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<f64> {
    let beta = solve_least_squares(x, y)
        .ok_or_else(|| EngineError::invalid("Auxiliary regression is ill-conditioned"))?;
    let n = y.len() as f64;
    let y_bar = y.iter().sum::<f64>() / n;
    let sst: f64 = y.iter().map(|v| (v - y_bar).powi(2)).sum();
    if sst <= f64::EPSILON * n {
        return Ok(0.0);
    }
    let fitted = x * beta;
    let sse: f64 = y.iter().zip(fitted.iter()).map(|(a, b)| (a - b).powi(2)).sum();
    Ok((1.0 - sse / sst).clamp(0.0, 1.0))
}
