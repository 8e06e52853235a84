//! The model registry: an explicit, injectable store of valuation models.
//!
//! Concurrency:
//! - the id map sits behind one `RwLock`; each model has its own slot
//! - calibrations of one id are serialized by the slot's calibration mutex
//! - fits run on a rayon pool owned by the registry, never on the caller's
//!   pool, so callers that are themselves rayon workers cannot starve them
//! - a fit is abandoned after the configured timeout; the stored model is
//!   written only after a successful fit

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::Utc;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, ReferenceData};
use crate::domain::{CalibrationResult, CalibrationSample, ModelSpec, PropertyRecord, ValuationModel};
use crate::error::{EngineError, Result, ensure_finite};
use crate::fit::{FitOptions, LeastSquares, RegressionEstimator, calibrate};
use crate::models::model::{bind_variables, linear_predictor};
use crate::models::variable::AttributeSource;

#[derive(Debug)]
struct ModelSlot {
    model: RwLock<ValuationModel>,
    calibration: Mutex<()>,
}

impl ModelSlot {
    fn new(model: ValuationModel) -> Self {
        Self {
            model: RwLock::new(model),
            calibration: Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ValuationModel> {
        self.model.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ValuationModel> {
        self.model.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_calibration(&self) -> MutexGuard<'_, ()> {
        self.calibration.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct ModelRegistry {
    config: EngineConfig,
    reference: Arc<ReferenceData>,
    estimator: Arc<dyn RegressionEstimator>,
    calibration_pool: ThreadPool,
    models: RwLock<HashMap<String, Arc<ModelSlot>>>,
}

impl ModelRegistry {
    /// Registry with the least-squares estimator.
    pub fn new(config: EngineConfig, reference: Arc<ReferenceData>) -> Result<Self> {
        Self::with_estimator(config, reference, Arc::new(LeastSquares))
    }

    pub fn with_estimator(
        config: EngineConfig,
        reference: Arc<ReferenceData>,
        estimator: Arc<dyn RegressionEstimator>,
    ) -> Result<Self> {
        let calibration_pool = ThreadPoolBuilder::new()
            .thread_name(|i| format!("cama-calibrate-{i}"))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to start calibration pool: {e}")))?;
        Ok(Self {
            config,
            reference,
            estimator,
            calibration_pool,
            models: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reference_data(&self) -> &ReferenceData {
        &self.reference
    }

    fn slots(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ModelSlot>>> {
        self.models.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ModelSlot>>> {
        self.models.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, id: &str) -> Result<Arc<ModelSlot>> {
        self.slots()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::ModelNotFound(id.to_string()))
    }

    /// Store a new, uncalibrated model.
    pub fn create_model(&self, spec: ModelSpec) -> Result<ValuationModel> {
        if spec.name.trim().is_empty() {
            return Err(EngineError::invalid("Model name must not be empty"));
        }
        if spec.variables.is_empty() {
            return Err(EngineError::invalid("Model must declare at least one variable"));
        }
        let mut seen = HashSet::new();
        for v in &spec.variables {
            if !seen.insert(v.name.as_str()) {
                return Err(EngineError::invalid(format!("Duplicate model variable '{}'", v.name)));
            }
        }
        bind_variables(&spec.variables)?;

        let mut variables = spec.variables;
        for v in &mut variables {
            v.estimate = None;
            v.standardization = None;
        }
        let model = ValuationModel {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            model_type: spec.model_type,
            dependent_variable: spec.dependent_variable,
            variables,
            intercept: None,
            fit: None,
            created_at: Utc::now(),
            last_calibrated: None,
            property_class: spec.property_class,
            neighborhood: spec.neighborhood,
        };

        info!(
            model_id = %model.id,
            name = %model.name,
            model_type = ?model.model_type,
            variables = model.variables.len(),
            "Model created"
        );
        self.slots_mut()
            .insert(model.id.clone(), Arc::new(ModelSlot::new(model.clone())));
        Ok(model)
    }

    pub fn get_model(&self, id: &str) -> Result<ValuationModel> {
        Ok(self.slot(id)?.read().clone())
    }

    /// All models, oldest first.
    pub fn list_models(&self) -> Vec<ValuationModel> {
        let mut models: Vec<ValuationModel> = self.slots().values().map(|s| s.read().clone()).collect();
        models.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        models
    }

    pub fn delete_model(&self, id: &str) -> Result<ValuationModel> {
        let slot = self
            .slots_mut()
            .remove(id)
            .ok_or_else(|| EngineError::ModelNotFound(id.to_string()))?;
        info!(model_id = %id, "Model deleted");
        Ok(slot.read().clone())
    }

    /// Fit the model against `samples` and store the result.
    ///
    /// On any failure, including a timeout, the stored model is unchanged.
    pub fn calibrate_model(&self, id: &str, samples: &[CalibrationSample]) -> Result<CalibrationResult> {
        let slot = self.slot(id)?;

        let parameters = slot.read().variables.len() + 1;
        let required = self.config.min_sample_size.max(parameters + 1);
        if samples.len() < required {
            warn!(model_id = %id, required, actual = samples.len(), "Calibration sample too small");
            return Err(EngineError::InsufficientSample {
                required,
                actual: samples.len(),
            });
        }

        let _calibrating = slot.lock_calibration();
        let snapshot = slot.read().clone();
        let opts = FitOptions {
            assessment_year: self.config.assessment_year,
            cooks_distance_factor: self.config.cooks_distance_factor,
        };

        info!(model_id = %id, samples = samples.len(), "Calibration started");
        let started = Instant::now();
        let (tx, rx) = mpsc::channel();
        let estimator = Arc::clone(&self.estimator);
        let owned: Vec<CalibrationSample> = samples.to_vec();
        self.calibration_pool.spawn(move || {
            let outcome = calibrate(&snapshot, &owned, estimator.as_ref(), &opts);
            // The receiver is gone if the caller timed out.
            let _ = tx.send(outcome);
        });

        let timeout = self.config.calibration_timeout;
        let calibration = match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome?,
            Err(RecvTimeoutError::Timeout) => {
                warn!(model_id = %id, seconds = timeout.as_secs_f64(), "Calibration timed out");
                return Err(EngineError::Timeout {
                    model_id: id.to_string(),
                    seconds: timeout.as_secs_f64(),
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(EngineError::invalid(format!(
                    "Calibration worker for model {id} stopped without a result"
                )));
            }
        };

        // The model may have been deleted while the fit was running.
        if !self.slots().contains_key(id) {
            return Err(EngineError::ModelNotFound(id.to_string()));
        }

        let calibrated_at = Utc::now();
        {
            let mut model = slot.write();
            model.intercept = Some(calibration.intercept);
            model.variables = calibration.variables.clone();
            model.fit = Some(calibration.fit);
            model.last_calibrated = Some(calibrated_at);
        }

        info!(
            model_id = %id,
            method = ?calibration.method,
            r_squared = calibration.fit.r_squared,
            cod = calibration.fit.cod,
            influential = calibration.influential_observations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Calibration complete"
        );

        Ok(CalibrationResult {
            model_id: id.to_string(),
            method: calibration.method,
            intercept: calibration.intercept,
            variables: calibration.variables,
            fit: calibration.fit,
            vif: calibration.vif,
            diagnostics: calibration.diagnostics,
            influential_observations: calibration.influential_observations,
            calibrated_at,
        })
    }

    /// Location-adjusted model value, rounded to a whole currency unit.
    pub fn value_property(&self, id: &str, property: &PropertyRecord) -> Result<f64> {
        let slot = self.slot(id)?;
        let model = slot.read();
        if !model.is_calibrated() {
            return Err(EngineError::ModelNotCalibrated(id.to_string()));
        }
        let sources = bind_variables(&model.variables)?;
        self.value_with(&model, &sources, property)
    }

    /// Value many properties against one model snapshot, in input order.
    pub fn value_properties(&self, id: &str, properties: &[PropertyRecord]) -> Result<Vec<Result<f64>>> {
        let model = self.get_model(id)?;
        if !model.is_calibrated() {
            return Err(EngineError::ModelNotCalibrated(id.to_string()));
        }
        let sources = bind_variables(&model.variables)?;
        let values: Vec<Result<f64>> = properties
            .par_iter()
            .map(|p| self.value_with(&model, &sources, p))
            .collect();
        debug!(
            model_id = %id,
            properties = properties.len(),
            failed = values.iter().filter(|v| v.is_err()).count(),
            "Batch valuation complete"
        );
        Ok(values)
    }

    fn value_with(
        &self,
        model: &ValuationModel,
        sources: &[AttributeSource],
        property: &PropertyRecord,
    ) -> Result<f64> {
        if let Some(scope) = &model.neighborhood {
            if property.neighborhood.as_deref() != Some(scope.as_str()) {
                warn!(
                    model_id = %model.id,
                    property = %property.id,
                    scope = %scope,
                    "Property is outside the model's neighborhood scope"
                );
            }
        }

        let lp = linear_predictor(model, sources, property, self.config.assessment_year)?;
        let base = if model.model_type.is_log_linear() { lp.exp() } else { lp };
        let location = self.reference.location_factor(property.neighborhood.as_deref());
        ensure_finite((base * location.factor).round(), "Property value")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelType, ModelVariable};

    fn registry() -> ModelRegistry {
        let config = EngineConfig {
            assessment_year: 2024,
            ..EngineConfig::default()
        };
        ModelRegistry::new(config, Arc::new(ReferenceData::standard())).unwrap()
    }

    fn spec() -> ModelSpec {
        ModelSpec {
            name: "Residential base".into(),
            model_type: ModelType::Additive,
            dependent_variable: "salePrice".into(),
            variables: vec![ModelVariable::continuous("buildingArea")],
            property_class: "residential".into(),
            neighborhood: None,
        }
    }

    fn samples(n: usize) -> Vec<CalibrationSample> {
        (0..n)
            .map(|i| {
                let area = 900.0 + 45.0 * i as f64;
                let noise = [-2_000.0, 500.0, 1_500.0][i % 3];
                CalibrationSample {
                    property: PropertyRecord {
                        id: format!("S{i}"),
                        building_area: Some(area),
                        ..Default::default()
                    },
                    observed: 40_000.0 + 120.0 * area + noise,
                    weight: None,
                }
            })
            .collect()
    }

    #[test]
    fn create_get_list_delete() {
        let reg = registry();
        let a = reg.create_model(spec()).unwrap();
        let b = reg.create_model(spec()).unwrap();
        assert_ne!(a.id, b.id);
        assert!(!a.is_calibrated());
        assert_eq!(reg.get_model(&a.id).unwrap(), a);
        assert_eq!(reg.list_models().len(), 2);

        reg.delete_model(&a.id).unwrap();
        assert!(matches!(reg.get_model(&a.id), Err(EngineError::ModelNotFound(_))));
        assert!(matches!(reg.delete_model(&a.id), Err(EngineError::ModelNotFound(_))));
        assert_eq!(reg.list_models().len(), 1);
    }

    #[test]
    fn create_rejects_bad_specs() {
        let reg = registry();
        let mut s = spec();
        s.variables.clear();
        assert!(reg.create_model(s).is_err());

        let mut s = spec();
        s.variables.push(ModelVariable::continuous("buildingArea"));
        assert!(matches!(reg.create_model(s), Err(EngineError::InvalidInput(_))));

        let mut s = spec();
        s.variables = vec![ModelVariable::continuous("poolDepth")];
        assert!(reg.create_model(s).is_err());
    }

    #[test]
    fn small_sample_leaves_model_untouched() {
        let reg = registry();
        let m = reg.create_model(spec()).unwrap();
        let err = reg.calibrate_model(&m.id, &samples(10)).unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientSample {
                required: 30,
                actual: 10
            }
        );
        let after = reg.get_model(&m.id).unwrap();
        assert!(after.last_calibrated.is_none());
        assert!(after.fit.is_none());
    }

    #[test]
    fn valuation_requires_calibration() {
        let reg = registry();
        let m = reg.create_model(spec()).unwrap();
        let p = PropertyRecord {
            building_area: Some(1_500.0),
            ..Default::default()
        };
        assert!(matches!(
            reg.value_property(&m.id, &p),
            Err(EngineError::ModelNotCalibrated(_))
        ));
        assert!(matches!(
            reg.value_property("missing", &p),
            Err(EngineError::ModelNotFound(_))
        ));
    }

    #[test]
    fn calibrate_then_value_with_location_factor() {
        let reg = registry();
        let m = reg.create_model(spec()).unwrap();
        let result = reg.calibrate_model(&m.id, &samples(40)).unwrap();
        assert!((result.variables[0].estimate.unwrap().coefficient - 120.0).abs() < 1.0);

        let stored = reg.get_model(&m.id).unwrap();
        assert_eq!(stored.last_calibrated, Some(result.calibrated_at));

        let plain = PropertyRecord {
            building_area: Some(1_500.0),
            ..Default::default()
        };
        let richland = PropertyRecord {
            neighborhood: Some("BC-RICH-01".into()),
            ..plain.clone()
        };
        let v = reg.value_property(&m.id, &plain).unwrap();
        let adjusted = reg.value_property(&m.id, &richland).unwrap();
        assert_eq!(v.fract(), 0.0);
        assert!((v - 220_000.0).abs() < 1_500.0);
        assert!((adjusted - v * 1.08).abs() <= 2.0);

        let batch = reg.value_properties(&m.id, &[plain, richland]).unwrap();
        assert_eq!(*batch[0].as_ref().unwrap(), v);
        assert_eq!(*batch[1].as_ref().unwrap(), adjusted);
    }

    #[derive(Debug)]
    struct Sleepy(std::time::Duration);

    impl RegressionEstimator for Sleepy {
        fn estimate(
            &self,
            x: &nalgebra::DMatrix<f64>,
            y: &nalgebra::DVector<f64>,
            weights: &[f64],
        ) -> Result<crate::math::RegressionFit> {
            std::thread::sleep(self.0);
            LeastSquares.estimate(x, y, weights)
        }
    }

    #[test]
    fn timed_out_calibration_leaves_model_untouched() {
        let config = EngineConfig {
            assessment_year: 2024,
            calibration_timeout: std::time::Duration::from_millis(20),
            ..EngineConfig::default()
        };
        let reg = ModelRegistry::with_estimator(
            config,
            Arc::new(ReferenceData::standard()),
            Arc::new(Sleepy(std::time::Duration::from_millis(400))),
        )
        .unwrap();
        let m = reg.create_model(spec()).unwrap();

        let err = reg.calibrate_model(&m.id, &samples(40)).unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert_eq!(err.exit_code(), 5);
        assert_eq!(reg.get_model(&m.id).unwrap(), m);
    }

    #[test]
    fn concurrent_calibrations_of_one_model_all_land() {
        let reg = registry();
        let m = reg.create_model(spec()).unwrap();
        let data = samples(40);

        let results: Vec<CalibrationResult> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4).map(|_| s.spawn(|| reg.calibrate_model(&m.id, &data))).collect();
            handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
        });

        let stored = reg.get_model(&m.id).unwrap();
        assert!(stored.is_calibrated());
        assert!(results.iter().any(|r| Some(r.calibrated_at) == stored.last_calibrated));
        for r in &results {
            assert!((r.intercept - results[0].intercept).abs() < 1e-6);
        }
    }

    #[test]
    fn calibrations_from_rayon_workers_do_not_starve() {
        let config = EngineConfig {
            assessment_year: 2024,
            calibration_timeout: std::time::Duration::from_secs(10),
            ..EngineConfig::default()
        };
        let reg = ModelRegistry::new(config, Arc::new(ReferenceData::standard())).unwrap();
        let ids: Vec<String> = (0..2 * rayon::current_num_threads() + 2)
            .map(|_| reg.create_model(spec()).unwrap().id)
            .collect();
        let data = samples(40);

        let outcomes: Vec<Result<CalibrationResult>> =
            ids.par_iter().map(|id| reg.calibrate_model(id, &data)).collect();

        for (id, outcome) in ids.iter().zip(outcomes) {
            assert_eq!(outcome.unwrap().model_id, *id);
            assert!(reg.get_model(id).unwrap().is_calibrated());
        }
    }

    #[test]
    fn calibrating_deleted_model_fails() {
        let reg = registry();
        let m = reg.create_model(spec()).unwrap();
        reg.delete_model(&m.id).unwrap();
        assert!(matches!(
            reg.calibrate_model(&m.id, &samples(40)),
            Err(EngineError::ModelNotFound(_))
        ));
    }
}
