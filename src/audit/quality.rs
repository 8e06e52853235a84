//! Batch quality control over a set of valuations.
//!
//! Two independent checks per record:
//! - value outlier: population z-score of `value` across the batch
//! - assessment gap: relative distance from the prior assessed value
//!
//! Records are annotated, never adjusted.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::QualityThresholds;
use crate::error::{EngineError, Result};
use crate::math::{mean, population_std_dev};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationRecord {
    pub property_id: String,
    pub value: f64,
    #[serde(default)]
    pub assessed_value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlagKind {
    Outlier,
    AssessmentGap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityFlag {
    pub kind: FlagKind,
    pub severity: Severity,
    /// z-score for outliers, relative gap for assessment gaps.
    pub metric: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedValuation {
    #[serde(flatten)]
    pub record: ValuationRecord,
    pub z_score: f64,
    pub flags: Vec<QualityFlag>,
}

impl FlaggedValuation {
    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySummary {
    pub total: usize,
    pub flagged: usize,
    pub outliers: usize,
    pub assessment_gaps: usize,
    pub high_severity: usize,
}

impl QualitySummary {
    pub fn from_results(results: &[FlaggedValuation]) -> Self {
        let mut s = QualitySummary {
            total: results.len(),
            ..Default::default()
        };
        for r in results {
            if r.is_flagged() {
                s.flagged += 1;
            }
            for f in &r.flags {
                match f.kind {
                    FlagKind::Outlier => s.outliers += 1,
                    FlagKind::AssessmentGap => s.assessment_gaps += 1,
                }
                if f.severity == Severity::High {
                    s.high_severity += 1;
                }
            }
        }
        s
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityController {
    thresholds: QualityThresholds,
}

impl QualityController {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    /// Severity for a z-score, or `None` if it is within bounds.
    pub fn classify_outlier(&self, z: f64) -> Option<Severity> {
        let z = z.abs();
        if z > self.thresholds.high_severity_z {
            Some(Severity::High)
        } else if z > self.thresholds.outlier_z {
            Some(Severity::Medium)
        } else {
            None
        }
    }

    /// Severity for a relative assessment gap, or `None` if it is within bounds.
    pub fn classify_gap(&self, gap: f64) -> Option<Severity> {
        if gap > self.thresholds.high_severity_gap {
            Some(Severity::High)
        } else if gap > self.thresholds.assessment_gap {
            Some(Severity::Medium)
        } else {
            None
        }
    }

    pub fn perform_quality_control(&self, valuations: &[ValuationRecord]) -> Result<Vec<FlaggedValuation>> {
        if valuations.is_empty() {
            return Ok(Vec::new());
        }
        for v in valuations {
            if !v.value.is_finite() {
                return Err(EngineError::invalid(format!(
                    "Valuation for {} is not a finite number",
                    v.property_id
                )));
            }
        }

        let values: Vec<f64> = valuations.iter().map(|v| v.value).collect();
        let mu = mean(&values).unwrap_or(0.0);
        let sigma = population_std_dev(&values).unwrap_or(0.0);
        if valuations.len() > 1 && sigma <= 0.0 {
            return Err(EngineError::division_by_zero(
                "Valuation batch has zero standard deviation",
            ));
        }

        let mut out = Vec::with_capacity(valuations.len());
        for v in valuations {
            let z_score = if sigma > 0.0 { (v.value - mu) / sigma } else { 0.0 };
            let mut flags = Vec::new();

            if let Some(severity) = self.classify_outlier(z_score) {
                flags.push(QualityFlag {
                    kind: FlagKind::Outlier,
                    severity,
                    metric: z_score,
                    message: format!("Value is {:.2} standard deviations from the batch mean", z_score.abs()),
                });
            }

            if let Some(assessed) = v.assessed_value {
                if assessed == 0.0 {
                    return Err(EngineError::division_by_zero(format!(
                        "Assessed value for {} is zero",
                        v.property_id
                    )));
                }
                if !assessed.is_finite() {
                    return Err(EngineError::invalid(format!(
                        "Assessed value for {} is not a finite number",
                        v.property_id
                    )));
                }
                let gap = ((v.value - assessed) / assessed).abs();
                if let Some(severity) = self.classify_gap(gap) {
                    flags.push(QualityFlag {
                        kind: FlagKind::AssessmentGap,
                        severity,
                        metric: gap,
                        message: format!("Value differs from assessment by {:.1}%", gap * 100.0),
                    });
                }
            }

            if flags.iter().any(|f| f.severity == Severity::High) {
                warn!(property = %v.property_id, value = v.value, "High-severity quality flag");
            }
            out.push(FlaggedValuation {
                record: v.clone(),
                z_score,
                flags,
            });
        }

        let summary = QualitySummary::from_results(&out);
        info!(
            total = summary.total,
            flagged = summary.flagged,
            outliers = summary.outliers,
            gaps = summary.assessment_gaps,
            "Quality control complete"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, value: f64, assessed_value: Option<f64>) -> ValuationRecord {
        ValuationRecord {
            property_id: id.into(),
            value,
            assessed_value,
        }
    }

    #[test]
    fn outlier_severity_bands() {
        let qc = QualityController::default();
        assert_eq!(qc.classify_outlier(2.6), Some(Severity::Medium));
        assert_eq!(qc.classify_outlier(-2.6), Some(Severity::Medium));
        assert_eq!(qc.classify_outlier(2.49), None);
        assert_eq!(qc.classify_outlier(2.5), None);
        assert_eq!(qc.classify_outlier(3.6), Some(Severity::High));
    }

    #[test]
    fn batch_with_z_of_two_point_six_is_medium() {
        // Mean 0, population variance 1: ±2.6 plus ten pairs at ±sqrt(0.424).
        let b = 0.424_f64.sqrt();
        let mut xs = vec![2.6, -2.6];
        for _ in 0..10 {
            xs.push(b);
            xs.push(-b);
        }
        let batch: Vec<ValuationRecord> = xs
            .iter()
            .enumerate()
            .map(|(i, x)| record(&format!("P{i}"), 300_000.0 + 10_000.0 * x, None))
            .collect();

        let out = QualityController::default().perform_quality_control(&batch).unwrap();
        assert!((out[0].z_score - 2.6).abs() < 1e-9);
        assert_eq!(out[0].flags.len(), 1);
        assert_eq!(out[0].flags[0].kind, FlagKind::Outlier);
        assert_eq!(out[0].flags[0].severity, Severity::Medium);
        assert_eq!(out.iter().filter(|r| r.is_flagged()).count(), 2);
        assert_eq!(out[5].record.value, batch[5].value);
    }

    #[test]
    fn nothing_flagged_below_threshold() {
        let batch: Vec<ValuationRecord> = (1..=10)
            .map(|i| record(&format!("P{i}"), 100_000.0 + 5_000.0 * i as f64, None))
            .collect();
        let out = QualityController::default().perform_quality_control(&batch).unwrap();
        assert!(out.iter().all(|r| !r.is_flagged()));
        assert!(out.iter().all(|r| r.z_score.abs() < 2.5));
    }

    #[test]
    fn extreme_value_is_high_severity() {
        // 16 identical values and one outlier: z = sqrt(16) = 4.
        let mut batch: Vec<ValuationRecord> = (0..16).map(|i| record(&format!("P{i}"), 200_000.0, None)).collect();
        batch.push(record("X", 300_000.0, None));
        let out = QualityController::default().perform_quality_control(&batch).unwrap();
        let last = out.last().unwrap();
        assert!((last.z_score - 4.0).abs() < 1e-9);
        assert_eq!(last.flags[0].severity, Severity::High);
    }

    #[test]
    fn assessment_gap_severity() {
        let batch = vec![
            record("A", 120_000.0, Some(100_000.0)),
            record("B", 130_000.0, Some(100_000.0)),
            record("C", 110_000.0, Some(100_000.0)),
        ];
        let out = QualityController::default().perform_quality_control(&batch).unwrap();
        assert_eq!(out[0].flags[0].kind, FlagKind::AssessmentGap);
        assert_eq!(out[0].flags[0].severity, Severity::Medium);
        assert_eq!(out[1].flags[0].severity, Severity::High);
        assert!(!out[2].is_flagged());

        let summary = QualitySummary::from_results(&out);
        assert_eq!(summary.assessment_gaps, 2);
        assert_eq!(summary.high_severity, 1);
    }

    #[test]
    fn degenerate_batches() {
        let qc = QualityController::default();
        assert!(qc.perform_quality_control(&[]).unwrap().is_empty());

        let single = qc.perform_quality_control(&[record("A", 1.0, None)]).unwrap();
        assert_eq!(single[0].z_score, 0.0);

        let flat = [record("A", 5.0, None), record("B", 5.0, None)];
        assert!(matches!(
            qc.perform_quality_control(&flat),
            Err(EngineError::DivisionByZero(_))
        ));

        let zero = [record("A", 5.0, Some(0.0)), record("B", 6.0, None)];
        assert!(matches!(
            qc.perform_quality_control(&zero),
            Err(EngineError::DivisionByZero(_))
        ));
    }
}
