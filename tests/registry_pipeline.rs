use std::sync::Arc;

use cama_engine::audit::{QualityController, RatioStudyAnalyzer, SalePair, ValuationRecord};
use cama_engine::config::{EngineConfig, ReferenceData};
use cama_engine::domain::{CalibrationSample, ModelSpec, ModelType, ModelVariable, PropertyRecord};
use cama_engine::error::EngineError;
use cama_engine::models::ModelRegistry;
use cama_engine::reconcile::ValueReconciler;

fn config() -> EngineConfig {
    EngineConfig {
        assessment_year: 2024,
        ..EngineConfig::default()
    }
}

fn spec() -> ModelSpec {
    ModelSpec {
        name: "SFR area + baths".into(),
        model_type: ModelType::Additive,
        dependent_variable: "salePrice".into(),
        variables: vec![
            ModelVariable::continuous("buildingArea"),
            ModelVariable::continuous("bathrooms"),
        ],
        property_class: "residential".into(),
        neighborhood: None,
    }
}

fn property(i: usize) -> PropertyRecord {
    PropertyRecord {
        id: format!("P{i:03}"),
        building_area: Some(1_000.0 + 37.0 * i as f64),
        bathrooms: Some(1.0 + (i % 3) as f64),
        ..Default::default()
    }
}

fn truth(p: &PropertyRecord) -> f64 {
    30_000.0 + 110.0 * p.building_area.unwrap_or(0.0) + 8_000.0 * p.bathrooms.unwrap_or(0.0)
}

fn samples(n: usize) -> Vec<CalibrationSample> {
    (0..n)
        .map(|i| {
            let property = property(i);
            let noise = [-40.0, 20.0, 0.0, 30.0, -10.0][i % 5];
            CalibrationSample {
                observed: truth(&property) + noise,
                property,
                weight: None,
            }
        })
        .collect()
}

#[test]
fn calibration_recovers_generating_coefficients() {
    let reg = ModelRegistry::new(config(), Arc::new(ReferenceData::standard())).unwrap();
    let model = reg.create_model(spec()).unwrap();
    let result = reg.calibrate_model(&model.id, &samples(60)).unwrap();

    let area = result.variables[0].estimate.unwrap().coefficient;
    let baths = result.variables[1].estimate.unwrap().coefficient;
    assert!((area - 110.0).abs() < 0.5, "area coefficient {area}");
    assert!((baths - 8_000.0).abs() < 100.0, "bathroom coefficient {baths}");
    assert!((result.intercept - 30_000.0).abs() < 500.0);
    assert!(result.fit.r_squared > 0.999);
    assert_eq!(result.fit.sample_size, 60);
}

#[test]
fn calibrated_model_feeds_audit_and_reconciliation() {
    let reference = Arc::new(ReferenceData::standard());
    let reg = ModelRegistry::new(config(), Arc::clone(&reference)).unwrap();
    let model = reg.create_model(spec()).unwrap();
    reg.calibrate_model(&model.id, &samples(60)).unwrap();

    let subjects: Vec<PropertyRecord> = (60..100).map(property).collect();
    let values: Vec<f64> = reg
        .value_properties(&model.id, &subjects)
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap())
        .collect();
    assert_eq!(values.len(), 40);

    let pairs: Vec<SalePair> = subjects
        .iter()
        .zip(&values)
        .map(|(p, v)| SalePair {
            market_value: truth(p),
            assessed_value: *v,
        })
        .collect();
    let study = RatioStudyAnalyzer::new(config().ratio_thresholds)
        .perform_ratio_study(&pairs)
        .unwrap();
    assert!(study.passed);
    assert!(study.statistics.cod < 1.0);
    assert!((study.statistics.median_ratio - 1.0).abs() < 0.01);

    let records: Vec<ValuationRecord> = subjects
        .iter()
        .zip(&values)
        .map(|(p, v)| ValuationRecord {
            property_id: p.id.clone(),
            value: *v,
            assessed_value: None,
        })
        .collect();
    let flagged = QualityController::new(config().quality_thresholds)
        .perform_quality_control(&records)
        .unwrap();
    assert_eq!(flagged.len(), 40);
    assert!(flagged.iter().all(|f| !f.is_flagged()));

    let reconciled = ValueReconciler::new(&reference, 2024)
        .reconcile(None, Some(values[0]), None, &subjects[0])
        .unwrap();
    assert_eq!(reconciled.final_value, (values[0] / 100.0).round() * 100.0);
    assert_eq!(reconciled.confidence, 1.0);
}

#[test]
fn failed_calibrations_leave_model_unchanged() {
    let reg = ModelRegistry::new(config(), Arc::new(ReferenceData::standard())).unwrap();
    let model = reg.create_model(spec()).unwrap();

    let err = reg.calibrate_model(&model.id, &samples(10)).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientSample { required: 30, actual: 10 }));
    assert_eq!(err.exit_code(), 4);

    let stored = reg.get_model(&model.id).unwrap();
    assert!(stored.last_calibrated.is_none());
    assert!(matches!(
        reg.value_property(&model.id, &property(1)),
        Err(EngineError::ModelNotCalibrated(_))
    ));

    reg.delete_model(&model.id).unwrap();
    assert!(matches!(
        reg.calibrate_model(&model.id, &samples(60)),
        Err(EngineError::ModelNotFound(_))
    ));
}

#[test]
fn noiseless_sample_recovers_coefficients_exactly() {
    let reg = ModelRegistry::new(config(), Arc::new(ReferenceData::standard())).unwrap();
    let model = reg.create_model(spec()).unwrap();
    let exact: Vec<CalibrationSample> = (0..40)
        .map(|i| {
            let property = property(i);
            CalibrationSample {
                observed: truth(&property),
                property,
                weight: None,
            }
        })
        .collect();

    let result = reg.calibrate_model(&model.id, &exact).unwrap();
    let area = result.variables[0].estimate.unwrap();
    assert!((area.coefficient - 110.0).abs() < 1e-6);
    assert!((result.variables[1].estimate.unwrap().coefficient - 8_000.0).abs() < 1e-4);
    assert!((result.intercept - 30_000.0).abs() < 1e-3);
    assert_eq!(area.std_error, None);
    assert_eq!(result.fit.r_squared, 1.0);

    let value = reg.value_property(&model.id, &property(50)).unwrap();
    assert_eq!(value, truth(&property(50)).round());
}
