//! Shared end-to-end workflows used by the CLI.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! sample -> calibrate -> value hold-out -> quality control -> ratio study -> reconcile
//!
//! The CLI can then focus on presentation.

use std::sync::Arc;

use tracing::{info, warn};

use crate::audit::{
    FlaggedValuation, QualityController, RatioStudyAnalyzer, RatioStudyResult, SalePair, StratumResult,
    ValuationRecord,
};
use crate::config::{EngineConfig, ReferenceData};
use crate::cost::{CostApproachValue, CostEngine};
use crate::data::{
    AssessmentProfile, SampleConfig, SyntheticSale, assess, generate_sales, stratify_by_neighborhood,
};
use crate::domain::{
    CalibrationResult, CalibrationSample, ModelSpec, ModelType, ModelVariable, Transformation,
    ValuationModel, VariableKind,
};
use crate::error::{EngineError, Result};
use crate::models::ModelRegistry;
use crate::reconcile::{ValueReconciler, ValueReconciliation};
use crate::report::{Rankings, ValuationResidual, compute_residuals, rank_residuals};

/// Replacement cost new per square foot used for the demo cost approach.
const DEMO_COST_PER_SQFT: f64 = 152.0;
/// Land value per square foot of lot used for the demo cost approach.
const DEMO_LAND_PER_SQFT: f64 = 4.25;

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub count: usize,
    pub seed: u64,
    pub price_noise: f64,
    pub model_type: ModelType,
    pub holdout: f64,
    pub top_n: usize,
}

/// All computed outputs of a `cama demo` run.
#[derive(Debug, Clone)]
pub struct DemoOutput {
    pub model: ValuationModel,
    pub calibration: CalibrationResult,
    pub residuals: Vec<ValuationResidual>,
    pub rankings: Rankings,
    pub quality: Vec<FlaggedValuation>,
    pub ratio_study: RatioStudyResult,
    pub strata: Vec<StratumResult>,
    pub reconciled_property: String,
    pub cost: CostApproachValue,
    pub reconciliation: ValueReconciliation,
}

#[derive(Debug, Clone)]
pub struct RatioStudyOptions {
    pub count: usize,
    pub seed: u64,
    pub price_noise: f64,
    pub profile: AssessmentProfile,
    pub stratify: bool,
}

#[derive(Debug, Clone)]
pub struct RatioStudyOutput {
    pub pairs: Vec<SalePair>,
    pub result: RatioStudyResult,
    pub strata: Vec<StratumResult>,
}

/// The model specification the demo calibrates.
pub fn demo_model_spec(model_type: ModelType) -> ModelSpec {
    let (area, lot) = if model_type.is_log_linear() {
        (Transformation::Log, Transformation::Log)
    } else {
        (Transformation::None, Transformation::None)
    };
    ModelSpec {
        name: format!("Benton County SFR ({model_type:?})"),
        model_type,
        dependent_variable: "salePrice".into(),
        variables: vec![
            ModelVariable::new("buildingArea", VariableKind::Continuous, area),
            ModelVariable::continuous("bathrooms"),
            ModelVariable::new("lotSize", VariableKind::Continuous, lot),
            ModelVariable::continuous("effectiveAge"),
        ],
        property_class: "residential".into(),
        neighborhood: None,
    }
}

pub fn run_demo(config: &EngineConfig, reference: Arc<ReferenceData>, opts: &DemoOptions) -> Result<DemoOutput> {
    if !(0.0 < opts.holdout && opts.holdout < 1.0) {
        return Err(EngineError::invalid("Hold-out share must be within (0, 1)"));
    }

    // 1) Generate a synthetic market across the reference neighborhoods.
    let sample_config = SampleConfig {
        price_noise: opts.price_noise,
        neighborhoods: reference.location_factors.keys().cloned().collect(),
        ..SampleConfig::new(opts.count, opts.seed, config.assessment_year)
    };
    let sales = generate_sales(&sample_config, &reference)?;
    if sales.len() < 2 {
        return Err(EngineError::invalid("Demo needs at least two sales"));
    }
    let holdout = ((sales.len() as f64) * opts.holdout).round() as usize;
    let (train, test) = sales.split_at(sales.len() - holdout.clamp(1, sales.len() - 1));

    // 2) Calibrate on location-neutral prices; valuation re-applies the factor.
    let registry = ModelRegistry::new(config.clone(), Arc::clone(&reference))?;
    let model = registry.create_model(demo_model_spec(opts.model_type))?;
    let samples: Vec<CalibrationSample> = train
        .iter()
        .map(|s| {
            let mut sample = s.to_calibration_sample();
            sample.observed /= reference.location_factor(s.property.neighborhood.as_deref()).factor;
            sample
        })
        .collect();
    let calibration = registry.calibrate_model(&model.id, &samples)?;
    let model = registry.get_model(&model.id)?;

    // 3) Value the hold-out set.
    let properties: Vec<_> = test.iter().map(|s| s.property.clone()).collect();
    let mut valued: Vec<SyntheticSale> = Vec::with_capacity(test.len());
    let mut values = Vec::with_capacity(test.len());
    for (sale, value) in test.iter().zip(registry.value_properties(&model.id, &properties)?) {
        match value {
            Ok(v) => {
                valued.push(sale.clone());
                values.push(v);
            }
            Err(e) => warn!(property = %sale.property.id, error = %e, "Hold-out valuation failed"),
        }
    }
    let residuals = compute_residuals(&valued, &values)?;
    let rankings = rank_residuals(&residuals, opts.top_n);

    // 4) Quality control against the prior roll.
    let prior = assess(&valued, AssessmentProfile::default(), opts.seed.wrapping_add(1))?;
    let records: Vec<ValuationRecord> = valued
        .iter()
        .zip(&values)
        .zip(&prior)
        .map(|((s, v), p)| ValuationRecord {
            property_id: s.property.id.clone(),
            value: *v,
            assessed_value: Some(p.assessed_value),
        })
        .collect();
    let quality = QualityController::new(config.quality_thresholds).perform_quality_control(&records)?;

    // 5) Ratio study of model values against sale prices.
    let pairs: Vec<SalePair> = valued
        .iter()
        .zip(&values)
        .map(|(s, v)| SalePair {
            market_value: s.sale_price,
            assessed_value: *v,
        })
        .collect();
    let analyzer = RatioStudyAnalyzer::new(config.ratio_thresholds);
    let ratio_study = analyzer.perform_ratio_study(&pairs)?;
    let strata = analyzer.perform_stratified_study(&stratify_by_neighborhood(&valued, &pairs));

    // 6) Reconcile cost and sales-comparison values for the first hold-out parcel.
    let (subject, market_value) = valued
        .first()
        .zip(values.first())
        .ok_or_else(|| EngineError::invalid("No hold-out parcel could be valued"))?;
    let cost_engine = CostEngine::new(&reference, config.assessment_year);
    let cost = cost_engine.cost_approach(
        &subject.property,
        DEMO_COST_PER_SQFT * subject.property.building_area.unwrap_or(0.0),
        DEMO_LAND_PER_SQFT * subject.property.lot_size.unwrap_or(0.0),
        None,
    )?;
    let reconciliation = ValueReconciler::new(&reference, config.assessment_year).reconcile(
        Some(cost.value),
        Some(*market_value),
        None,
        &subject.property,
    )?;

    info!(
        model_id = %model.id,
        holdout = valued.len(),
        cod = ratio_study.statistics.cod,
        prd = ratio_study.statistics.prd,
        "Demo complete"
    );

    Ok(DemoOutput {
        model,
        calibration,
        residuals,
        rankings,
        quality,
        ratio_study,
        strata,
        reconciled_property: subject.property.id.clone(),
        cost,
        reconciliation,
    })
}

pub fn run_ratio_study(
    config: &EngineConfig,
    reference: &ReferenceData,
    opts: &RatioStudyOptions,
) -> Result<RatioStudyOutput> {
    let sample_config = SampleConfig {
        price_noise: opts.price_noise,
        neighborhoods: reference.location_factors.keys().cloned().collect(),
        ..SampleConfig::new(opts.count, opts.seed, config.assessment_year)
    };
    let sales = generate_sales(&sample_config, reference)?;
    let pairs = assess(&sales, opts.profile, opts.seed.wrapping_add(1))?;

    let analyzer = RatioStudyAnalyzer::new(config.ratio_thresholds);
    let result = analyzer.perform_ratio_study(&pairs)?;
    let strata = if opts.stratify {
        analyzer.perform_stratified_study(&stratify_by_neighborhood(&sales, &pairs))
    } else {
        Vec::new()
    };

    Ok(RatioStudyOutput { pairs, result, strata })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            assessment_year: 2024,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn demo_runs_end_to_end() {
        let opts = DemoOptions {
            count: 240,
            seed: 3,
            price_noise: 0.05,
            model_type: ModelType::Additive,
            holdout: 0.25,
            top_n: 5,
        };
        let out = run_demo(&config(), Arc::new(ReferenceData::standard()), &opts).unwrap();

        assert!(out.model.is_calibrated());
        assert_eq!(out.calibration.fit.sample_size, 180);
        assert!(out.calibration.fit.r_squared > 0.7);
        assert_eq!(out.residuals.len(), 60);
        assert_eq!(out.rankings.over.len(), 5);
        assert!(out.ratio_study.statistics.cod < 15.0);
        assert!((out.ratio_study.statistics.median_ratio - 1.0).abs() < 0.05);
        assert_eq!(out.quality.len(), 60);
        assert!(!out.strata.is_empty());
        assert!(out.reconciliation.final_value > 0.0);
    }

    #[test]
    fn regressive_roll_is_detected() {
        let opts = RatioStudyOptions {
            count: 300,
            seed: 9,
            price_noise: 0.08,
            profile: AssessmentProfile {
                regressivity: 0.25,
                ..AssessmentProfile::default()
            },
            stratify: true,
        };
        let out = run_ratio_study(&config(), &ReferenceData::standard(), &opts).unwrap();
        assert!(out.result.statistics.prd > 1.0);
        assert!(out.result.statistics.prb.unwrap() < 0.0);
        assert!(!out.result.prb_pass);
        assert_eq!(out.pairs.len(), 300);
        assert_eq!(out.strata.len(), 6);
    }

    #[test]
    fn rejects_bad_holdout() {
        let opts = DemoOptions {
            count: 100,
            seed: 1,
            price_noise: 0.05,
            model_type: ModelType::Additive,
            holdout: 1.0,
            top_n: 5,
        };
        assert!(run_demo(&config(), Arc::new(ReferenceData::standard()), &opts).is_err());
    }
}
