//! Reporting utilities: valuation residuals, rankings and terminal output.

use std::cmp::Ordering;

use serde::Serialize;

use crate::data::SyntheticSale;
use crate::error::{EngineError, Result};

pub mod format;

pub use format::*;

/// Model value against observed sale price for one parcel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationResidual {
    pub property_id: String,
    pub neighborhood: Option<String>,
    pub sale_price: f64,
    pub model_value: f64,
    /// `model_value - sale_price`.
    pub residual: f64,
    /// Residual as a percentage of the sale price.
    pub residual_pct: f64,
}

/// Most over- and under-valued parcels (top-N each side).
#[derive(Debug, Clone, Default)]
pub struct Rankings {
    pub over: Vec<ValuationResidual>,
    pub under: Vec<ValuationResidual>,
}

/// Pair each sale with its model value.
pub fn compute_residuals(sales: &[SyntheticSale], values: &[f64]) -> Result<Vec<ValuationResidual>> {
    if sales.len() != values.len() {
        return Err(EngineError::invalid("Sales and model values differ in length"));
    }
    let mut out = Vec::with_capacity(sales.len());
    for (s, &v) in sales.iter().zip(values) {
        if s.sale_price <= 0.0 {
            return Err(EngineError::division_by_zero(format!(
                "Sale price of {} is not positive",
                s.property.id
            )));
        }
        let residual = v - s.sale_price;
        out.push(ValuationResidual {
            property_id: s.property.id.clone(),
            neighborhood: s.property.neighborhood.clone(),
            sale_price: s.sale_price,
            model_value: v,
            residual,
            residual_pct: residual / s.sale_price * 100.0,
        });
    }
    Ok(out)
}

/// Rank by percentage residual.
pub fn rank_residuals(residuals: &[ValuationResidual], top_n: usize) -> Rankings {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.residual_pct.partial_cmp(&a.residual_pct).unwrap_or(Ordering::Equal));
    let over = sorted.iter().take(top_n).cloned().collect();
    let under = sorted.iter().rev().take(top_n).cloned().collect();
    Rankings { over, under }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PropertyRecord;

    fn sale(id: &str, price: f64) -> SyntheticSale {
        SyntheticSale {
            property: PropertyRecord {
                id: id.into(),
                ..Default::default()
            },
            sale_price: price,
        }
    }

    #[test]
    fn residuals_and_rankings() {
        let sales = vec![sale("A", 100_000.0), sale("B", 200_000.0), sale("C", 300_000.0)];
        let residuals = compute_residuals(&sales, &[110_000.0, 190_000.0, 300_000.0]).unwrap();
        assert!((residuals[0].residual_pct - 10.0).abs() < 1e-9);
        assert!((residuals[1].residual_pct + 5.0).abs() < 1e-9);

        let rankings = rank_residuals(&residuals, 1);
        assert_eq!(rankings.over[0].property_id, "A");
        assert_eq!(rankings.under[0].property_id, "B");
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(compute_residuals(&[sale("A", 1.0)], &[]).is_err());
    }
}
