//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the valuation and audit code stays free of presentation concerns
//! - output changes are localized

use crate::audit::{FlaggedValuation, QualitySummary, RatioStudyResult, StratumResult};
use crate::config::RatioStudyThresholds;
use crate::cost::CostApproachValue;
use crate::domain::{CalibrationResult, ModelVariable, Transformation, ValuationModel};
use crate::reconcile::ValueReconciliation;
use crate::report::{Rankings, ValuationResidual};

/// Model header, coefficient table, fit statistics and diagnostics.
pub fn format_calibration(model: &ValuationModel, result: &CalibrationResult) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== cama - Model calibration: {} ===\n", model.name));
    out.push_str(&format!(
        "Id: {} | type: {:?} | class: {} | method: {:?}\n",
        model.id, model.model_type, model.property_class, result.method
    ));
    out.push_str(&format!(
        "Sample: n={} | R²={:.4} | adj R²={:.4}\n",
        result.fit.sample_size, result.fit.r_squared, result.fit.adjusted_r_squared
    ));
    out.push_str(&format!(
        "In-sample: COD={:.2} PRD={:.3} PRB={} MAPE={:.2}% RMSE={:.0}\n",
        result.fit.cod,
        result.fit.prd,
        optional(result.fit.prb, 4),
        result.fit.mape,
        result.fit.rmse
    ));

    out.push('\n');
    out.push_str(
        format!(
            "{:<22} {:>14} {:>12} {:>9} {:>9} {:>7} {:>7} {:<11}\n",
            "variable", "coefficient", "std err", "t", "p", "imp", "vif", "vif level"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(&rule(&[22, 14, 12, 9, 9, 7, 7, 11]));

    out.push_str(&format!("{:<22} {:>14.4}\n", "(intercept)", result.intercept));
    for (variable, vif) in result.variables.iter().zip(&result.vif) {
        let Some(e) = variable.estimate else { continue };
        out.push_str(
            format!(
                "{:<22} {:>14.4} {:>12} {:>9} {:>9} {:>7.3} {:>7.2} {:<11}\n",
                truncate(&label(variable), 22),
                e.coefficient,
                optional(e.std_error, 4),
                optional(e.t_value, 3),
                optional(e.p_value, 4),
                e.importance,
                vif.vif,
                format!("{:?}", vif.level).to_lowercase(),
            )
            .trim_end(),
        );
        out.push('\n');
    }

    let d = &result.diagnostics;
    out.push_str("\nResidual diagnostics:\n");
    match &d.normality {
        Some(t) => out.push_str(&format!(
            "- normality (Jarque-Bera): stat={:.3} p={:.4}{}\n",
            t.statistic,
            t.p_value,
            if t.rejected { " (non-normal)" } else { "" }
        )),
        None => out.push_str("- normality (Jarque-Bera): n/a (exact fit)\n"),
    }
    match &d.heteroscedasticity {
        Some(t) => out.push_str(&format!(
            "- heteroscedasticity (Breusch-Pagan): stat={:.3} p={:.4}{}\n",
            t.statistic,
            t.p_value,
            if t.rejected { " (heteroscedastic)" } else { "" }
        )),
        None => out.push_str("- heteroscedasticity (Breusch-Pagan): n/a (exact fit)\n"),
    }
    match &d.spatial_autocorrelation {
        Some(m) => out.push_str(&format!(
            "- spatial (Moran's I): I={:.4} E[I]={:.4} z={:.2} p={:.4}\n",
            m.morans_i, m.expected_i, m.z_score, m.p_value
        )),
        None => out.push_str("- spatial (Moran's I): n/a (no coordinates)\n"),
    }
    out.push_str(&format!(
        "- influential observations (Cook's D): {}\n",
        result.influential_observations.len()
    ));

    out
}

pub fn format_ratio_study(title: &str, result: &RatioStudyResult, thresholds: &RatioStudyThresholds) -> String {
    let s = &result.statistics;
    let mut out = String::new();

    out.push_str(&format!("=== cama - Ratio study: {title} ===\n"));
    out.push_str(&format!(
        "Sales: n={} | ratio=[{:.3}, {:.3}] | sd={:.4}\n",
        s.count, s.min_ratio, s.max_ratio, s.standard_deviation
    ));
    out.push_str(&format!(
        "Median={:.4} Mean={:.4} Weighted mean={:.4} COV={:.2}\n",
        s.median_ratio, s.mean_ratio, s.weighted_mean_ratio, s.cov
    ));
    let p = &s.percentiles;
    out.push_str(&format!(
        "Percentiles: p10={:.3} p25={:.3} p50={:.3} p75={:.3} p90={:.3}\n",
        p.p10, p.p25, p.p50, p.p75, p.p90
    ));
    out.push_str(&format!(
        "- COD {:>8.2}  (<= {:.1})            {}\n",
        s.cod,
        thresholds.max_cod,
        verdict(result.cod_pass)
    ));
    out.push_str(&format!(
        "- PRD {:>8.4}  ([{:.2}, {:.2}])      {}\n",
        s.prd,
        thresholds.min_prd,
        thresholds.max_prd,
        verdict(result.prd_pass)
    ));
    out.push_str(&format!(
        "- PRB {:>8}  ([{:.2}, {:.2}])     {}\n",
        optional(s.prb, 4),
        thresholds.min_prb,
        thresholds.max_prb,
        verdict(result.prb_pass)
    ));
    out.push_str(&format!("Overall: {}\n", verdict(result.passed)));

    out
}

pub fn format_stratified(results: &[StratumResult]) -> String {
    let mut out = String::new();

    out.push_str(
        format!(
            "{:<14} {:>6} {:>8} {:>8} {:>8} {:>8} {:<8}\n",
            "stratum", "n", "median", "cod", "prd", "prb", "result"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(&rule(&[14, 6, 8, 8, 8, 8, 8]));

    for r in results {
        let line = match &r.result {
            Ok(study) => {
                let s = &study.statistics;
                format!(
                    "{:<14} {:>6} {:>8.4} {:>8.2} {:>8.4} {:>8} {:<8}\n",
                    truncate(&r.stratum, 14),
                    r.count,
                    s.median_ratio,
                    s.cod,
                    s.prd,
                    optional(s.prb, 4),
                    verdict(study.passed)
                )
            }
            Err(e) => format!("{:<14} {:>6} {e}\n", truncate(&r.stratum, 14), r.count),
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }

    out
}

/// Summary counts plus the first `max_rows` flagged records.
pub fn format_quality(results: &[FlaggedValuation], max_rows: usize) -> String {
    let summary = QualitySummary::from_results(results);
    let mut out = String::new();

    out.push_str(&format!(
        "Quality control: {} valuations, {} flagged ({} outliers, {} assessment gaps, {} high severity)\n",
        summary.total, summary.flagged, summary.outliers, summary.assessment_gaps, summary.high_severity
    ));
    for r in results.iter().filter(|r| r.is_flagged()).take(max_rows) {
        for f in &r.flags {
            out.push_str(&format!(
                "- {:<10} {:>12.0} z={:>6.2} [{:?}/{:?}] {}\n",
                truncate(&r.record.property_id, 10),
                r.record.value,
                r.z_score,
                f.kind,
                f.severity,
                f.message
            ));
        }
    }

    out
}

/// Format the over/under-valued tables.
pub fn format_rankings(rankings: &Rankings) -> String {
    let mut out = String::new();

    out.push_str("Most over-valued (model above sale):\n");
    out.push_str(&format_residual_table(&rankings.over));
    out.push('\n');

    out.push_str("Most under-valued (model below sale):\n");
    out.push_str(&format_residual_table(&rankings.under));

    out
}

pub fn format_reconciliation(property_id: &str, cost: Option<&CostApproachValue>, r: &ValueReconciliation) -> String {
    let mut out = String::new();

    out.push_str(&format!("Reconciliation for {property_id}:\n"));
    if let Some(c) = cost {
        out.push_str(&format!(
            "- cost: RCN {:.0} less {:.1}% (phys {:.1}, func {:.1}, ext {:.1}) + land {:.0} = {:.0}\n",
            c.replacement_cost_new,
            c.depreciation.total,
            c.depreciation.physical,
            c.depreciation.functional,
            c.depreciation.external,
            c.land_value,
            c.value
        ));
    }
    for a in &r.approaches {
        out.push_str(&format!(
            "- {:<16} {:>12.0} reliability={:.2} weight={:.3}\n",
            a.approach.as_str(),
            a.value,
            a.reliability,
            a.weight
        ));
    }
    out.push_str(&format!(
        "Final value: {:.0} | reliability {:.1} | confidence {:.3}\n",
        r.final_value, r.reliability_score, r.confidence
    ));
    if let Some(o) = &r.manual_override {
        out.push_str(&format!(
            "Override by {} at {}: {:.0} -> {:.0} ({})\n",
            o.user,
            o.timestamp.format("%Y-%m-%d %H:%M:%S"),
            o.original_value,
            o.override_value,
            o.reason
        ));
    }

    out
}

fn format_residual_table(rows: &[ValuationResidual]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<12} {:<12} {:>12} {:>12} {:>9}\n",
            "id", "nbhd", "sale", "model", "resid %"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(&rule(&[12, 12, 12, 12, 9]));

    for r in rows {
        out.push_str(
            format!(
                "{:<12} {:<12} {:>12.0} {:>12.0} {:>9.2}\n",
                truncate(&r.property_id, 12),
                truncate(r.neighborhood.as_deref().unwrap_or(""), 12),
                r.sale_price,
                r.model_value,
                r.residual_pct
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

fn label(variable: &ModelVariable) -> String {
    match variable.transformation {
        Transformation::None => variable.name.clone(),
        t => format!("{t}({})", variable.name),
    }
}

fn verdict(pass: bool) -> &'static str {
    if pass { "PASS" } else { "FAIL" }
}

fn rule(widths: &[usize]) -> String {
    let parts: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    format!("{}\n", parts.join(" "))
}

/// Fixed-precision number, or `n/a` when the statistic is undefined.
fn optional(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{v:.precision$}"),
        None => "n/a".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
