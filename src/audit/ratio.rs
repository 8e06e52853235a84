//! IAAO ratio-study statistics.
//!
//! For each sale, `ratio = assessed / market`. From the ratios we compute:
//!
//! - median, mean and weighted mean (`Σ assessed / Σ market`)
//! - COD: mean absolute deviation from the median, as % of the median
//! - COV: standard deviation as % of the mean
//! - PRD: mean / weighted mean (> 1 regressive, < 1 progressive)
//! - PRB: slope of `ratio - mean` on centred `ln(market)`
//!
//! and judge COD, PRD and PRB against the configured standards. PRB has no
//! slope when every market value is the same (a single sale included); it is
//! then reported as `None` and fails its band.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RatioStudyThresholds;
use crate::error::{EngineError, Result, ensure_finite};
use crate::math::{mean, median_mut, population_covariance, population_variance, quantile_sorted, sample_std_dev};

/// Minimum variance of `ln(market)` for PRB to be defined.
const MIN_LOG_VARIANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalePair {
    pub market_value: f64,
    pub assessed_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioPercentiles {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatioStatistics {
    pub count: usize,
    pub median_ratio: f64,
    pub mean_ratio: f64,
    pub weighted_mean_ratio: f64,
    pub cod: f64,
    pub cov: f64,
    pub prd: f64,
    pub prb: Option<f64>,
    /// Sample standard deviation of the ratios.
    pub standard_deviation: f64,
    pub min_ratio: f64,
    pub max_ratio: f64,
    pub percentiles: RatioPercentiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatioStudyResult {
    #[serde(flatten)]
    pub statistics: RatioStatistics,
    pub cod_pass: bool,
    pub prd_pass: bool,
    pub prb_pass: bool,
    pub passed: bool,
}

/// A sale tagged with the stratum (neighborhood, class, ...) it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratifiedPair {
    pub stratum: String,
    pub pair: SalePair,
}

/// Per-stratum outcome; a stratum with invalid sales keeps its error.
#[derive(Debug, Clone, PartialEq)]
pub struct StratumResult {
    pub stratum: String,
    pub count: usize,
    pub result: Result<RatioStudyResult>,
}

/// Compute the ratio statistics without judging them.
pub fn ratio_statistics(pairs: &[SalePair]) -> Result<RatioStatistics> {
    if pairs.is_empty() {
        return Err(EngineError::invalid("Ratio study requires at least one sale"));
    }

    let mut ratios = Vec::with_capacity(pairs.len());
    let mut log_market = Vec::with_capacity(pairs.len());
    let mut sum_assessed = 0.0;
    let mut sum_market = 0.0;
    for (i, p) in pairs.iter().enumerate() {
        if p.market_value == 0.0 {
            return Err(EngineError::division_by_zero(format!("Sale {i} has zero market value")));
        }
        if !(p.market_value.is_finite() && p.market_value > 0.0) {
            return Err(EngineError::invalid(format!(
                "Sale {i} has invalid market value {}",
                p.market_value
            )));
        }
        if !(p.assessed_value.is_finite() && p.assessed_value > 0.0) {
            return Err(EngineError::invalid(format!(
                "Sale {i} has invalid assessed value {}",
                p.assessed_value
            )));
        }
        ratios.push(p.assessed_value / p.market_value);
        log_market.push(p.market_value.ln());
        sum_assessed += p.assessed_value;
        sum_market += p.market_value;
    }

    let mean_ratio = mean(&ratios).unwrap_or(0.0);
    let weighted_mean_ratio = sum_assessed / sum_market;
    let standard_deviation = sample_std_dev(&ratios).unwrap_or(0.0);

    let mut sorted = ratios.clone();
    let median_ratio = median_mut(&mut sorted).unwrap_or(0.0);
    let avg_abs_dev = ratios.iter().map(|r| (r - median_ratio).abs()).sum::<f64>() / ratios.len() as f64;
    let cod = avg_abs_dev / median_ratio * 100.0;
    let cov = standard_deviation / mean_ratio * 100.0;
    let prd = mean_ratio / weighted_mean_ratio;

    let log_variance = population_variance(&log_market).unwrap_or(0.0);
    let prb = if log_variance > MIN_LOG_VARIANCE {
        let slope = population_covariance(&ratios, &log_market).unwrap_or(0.0) / log_variance;
        Some(ensure_finite(slope, "PRB")?)
    } else {
        debug!(count = pairs.len(), "Market values do not vary; PRB undefined");
        None
    };

    let q = |p: f64| quantile_sorted(&sorted, p).unwrap_or(median_ratio);
    let percentiles = RatioPercentiles {
        p10: q(0.10),
        p25: q(0.25),
        p50: q(0.50),
        p75: q(0.75),
        p90: q(0.90),
    };

    Ok(RatioStatistics {
        count: pairs.len(),
        median_ratio: ensure_finite(median_ratio, "Median ratio")?,
        mean_ratio: ensure_finite(mean_ratio, "Mean ratio")?,
        weighted_mean_ratio: ensure_finite(weighted_mean_ratio, "Weighted mean ratio")?,
        cod: ensure_finite(cod, "COD")?,
        cov: ensure_finite(cov, "COV")?,
        prd: ensure_finite(prd, "PRD")?,
        prb,
        standard_deviation,
        min_ratio: sorted[0],
        max_ratio: sorted[sorted.len() - 1],
        percentiles,
    })
}

#[derive(Debug, Clone, Default)]
pub struct RatioStudyAnalyzer {
    thresholds: RatioStudyThresholds,
}

impl RatioStudyAnalyzer {
    pub fn new(thresholds: RatioStudyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RatioStudyThresholds {
        &self.thresholds
    }

    pub fn perform_ratio_study(&self, pairs: &[SalePair]) -> Result<RatioStudyResult> {
        let statistics = ratio_statistics(pairs)?;
        let result = self.evaluate(statistics);
        info!(
            count = statistics.count,
            median = statistics.median_ratio,
            cod = statistics.cod,
            prd = statistics.prd,
            prb = ?statistics.prb,
            passed = result.passed,
            "Ratio study complete"
        );
        Ok(result)
    }

    /// Apply the pass bands to precomputed statistics.
    pub fn evaluate(&self, statistics: RatioStatistics) -> RatioStudyResult {
        let t = &self.thresholds;
        let cod_pass = statistics.cod <= t.max_cod;
        let prd_pass = (t.min_prd..=t.max_prd).contains(&statistics.prd);
        let prb_pass = statistics
            .prb
            .is_some_and(|prb| (t.min_prb..=t.max_prb).contains(&prb));
        RatioStudyResult {
            statistics,
            cod_pass,
            prd_pass,
            prb_pass,
            passed: cod_pass && prd_pass && prb_pass,
        }
    }

    /// One study per stratum, ordered by stratum key.
    pub fn perform_stratified_study(&self, pairs: &[StratifiedPair]) -> Vec<StratumResult> {
        let mut groups: BTreeMap<&str, Vec<SalePair>> = BTreeMap::new();
        for p in pairs {
            groups.entry(p.stratum.as_str()).or_default().push(p.pair);
        }

        let groups: Vec<(&str, Vec<SalePair>)> = groups.into_iter().collect();
        groups
            .par_iter()
            .map(|(stratum, sales)| {
                let result = ratio_statistics(sales).map(|s| self.evaluate(s));
                if let Err(e) = &result {
                    debug!(stratum = %stratum, error = %e, "Stratum skipped");
                }
                StratumResult {
                    stratum: stratum.to_string(),
                    count: sales.len(),
                    result,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(market_value: f64, assessed_value: f64) -> SalePair {
        SalePair {
            market_value,
            assessed_value,
        }
    }

    fn reference_sales() -> Vec<SalePair> {
        vec![
            pair(100_000.0, 95_000.0),
            pair(200_000.0, 200_000.0),
            pair(150_000.0, 157_500.0),
        ]
    }

    #[test]
    fn three_sale_reference_study() {
        let result = RatioStudyAnalyzer::default()
            .perform_ratio_study(&reference_sales())
            .unwrap();
        let s = result.statistics;

        assert!((s.median_ratio - 1.0).abs() < 1e-12);
        assert!((s.mean_ratio - 1.0).abs() < 1e-12);
        assert!((s.weighted_mean_ratio - 452_500.0 / 450_000.0).abs() < 1e-12);
        assert!((s.cod - 10.0 / 3.0).abs() < 1e-9);
        assert!((s.prd - 450_000.0 / 452_500.0).abs() < 1e-9);
        assert!((s.cov - 5.0).abs() < 1e-9);
        assert_eq!(s.min_ratio, 0.95);
        assert_eq!(s.max_ratio, 1.05);
        assert!(result.cod_pass);
        assert!(result.prd_pass);
    }

    #[test]
    fn even_count_median_averages_middle_ratios() {
        let sales = vec![
            pair(100_000.0, 90_000.0),
            pair(120_000.0, 120_000.0),
            pair(140_000.0, 154_000.0),
            pair(160_000.0, 192_000.0),
        ];
        let s = ratio_statistics(&sales).unwrap();
        assert!((s.median_ratio - 1.05).abs() < 1e-12);
    }

    #[test]
    fn regressive_roll_fails_prd_and_prb() {
        let sales = vec![
            pair(100_000.0, 120_000.0),
            pair(200_000.0, 200_000.0),
            pair(400_000.0, 320_000.0),
        ];
        let result = RatioStudyAnalyzer::default().perform_ratio_study(&sales).unwrap();
        assert!(result.statistics.prd > 1.03);
        assert!(result.statistics.prb.unwrap() < -0.05);
        assert!(!result.prd_pass);
        assert!(!result.prb_pass);
        assert!(!result.passed);
    }

    #[test]
    fn zero_market_value_is_division_by_zero() {
        let err = ratio_statistics(&[pair(0.0, 1.0), pair(10.0, 10.0)]).unwrap_err();
        assert!(matches!(err, EngineError::DivisionByZero(_)));
        let err = ratio_statistics(&[pair(10.0, 0.0), pair(20.0, 10.0)]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(matches!(ratio_statistics(&[]), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn identical_market_values_leave_prb_undefined() {
        let sales = [pair(100.0, 90.0), pair(100.0, 110.0)];
        let result = RatioStudyAnalyzer::default().perform_ratio_study(&sales).unwrap();
        let s = result.statistics;
        assert_eq!(s.prb, None);
        assert!((s.median_ratio - 1.0).abs() < 1e-12);
        assert!((s.cod - 10.0).abs() < 1e-9);
        assert!((s.prd - 1.0).abs() < 1e-12);
        assert!(result.cod_pass);
        assert!(result.prd_pass);
        assert!(!result.prb_pass);
        assert!(!result.passed);
    }

    #[test]
    fn single_sale_still_measures_level() {
        let s = ratio_statistics(&[pair(250_000.0, 240_000.0)]).unwrap();
        assert_eq!(s.count, 1);
        assert!((s.median_ratio - 0.96).abs() < 1e-12);
        assert_eq!(s.cod, 0.0);
        assert_eq!(s.cov, 0.0);
        assert!((s.prd - 1.0).abs() < 1e-12);
        assert_eq!(s.prb, None);
    }

    #[test]
    fn stratified_study_reports_every_stratum() {
        let mut pairs: Vec<StratifiedPair> = reference_sales()
            .into_iter()
            .map(|pair| StratifiedPair {
                stratum: "BC-KEN-01".into(),
                pair,
            })
            .collect();
        pairs.push(StratifiedPair {
            stratum: "BC-BEN-01".into(),
            pair: pair(250_000.0, 240_000.0),
        });
        pairs.push(StratifiedPair {
            stratum: "BC-WRI-01".into(),
            pair: pair(0.0, 240_000.0),
        });

        let out = RatioStudyAnalyzer::default().perform_stratified_study(&pairs);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].stratum, "BC-BEN-01");
        let single = out[0].result.as_ref().unwrap();
        assert_eq!(single.statistics.prb, None);
        assert!(!single.passed);
        assert_eq!(out[1].count, 3);
        assert!(out[1].result.as_ref().unwrap().cod_pass);
        assert_eq!(out[2].stratum, "BC-WRI-01");
        assert!(matches!(out[2].result, Err(EngineError::DivisionByZero(_))));
    }
}
