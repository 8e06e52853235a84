//! Engine configuration and injected reference data.
//!
//! Both are loaded once at startup and passed by reference into the engine
//! components. Nothing here is a process-wide global, so test suites can build
//! as many isolated engines as they like.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DepreciationTableEntry, LocationAdjustmentFactor, normalize_key};
use crate::error::{EngineError, Result};

pub const DEFAULT_MIN_SAMPLE_SIZE: usize = 30;
pub const DEFAULT_CALIBRATION_TIMEOUT_SECS: u64 = 30;

/// IAAO pass bands for a ratio study.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatioStudyThresholds {
    pub max_cod: f64,
    pub min_prd: f64,
    pub max_prd: f64,
    pub min_prb: f64,
    pub max_prb: f64,
}

impl Default for RatioStudyThresholds {
    /// IAAO residential standards.
    fn default() -> Self {
        Self {
            max_cod: 15.0,
            min_prd: 0.98,
            max_prd: 1.03,
            min_prb: -0.05,
            max_prb: 0.05,
        }
    }
}

/// Cut-offs used by the batch quality controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityThresholds {
    pub outlier_z: f64,
    pub high_severity_z: f64,
    pub assessment_gap: f64,
    pub high_severity_gap: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            outlier_z: 2.5,
            high_severity_z: 3.5,
            assessment_gap: 0.15,
            high_severity_gap: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum calibration sample size.
    pub min_sample_size: usize,
    pub calibration_timeout: Duration,
    /// Year used to derive chronological age from `year_built`.
    pub assessment_year: i32,
    pub ratio_thresholds: RatioStudyThresholds,
    pub quality_thresholds: QualityThresholds,
    /// Observations with Cook's distance above `factor / n` are influential.
    pub cooks_distance_factor: f64,
    /// Optional JSON file overriding the standard reference tables.
    pub reference_data_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
            calibration_timeout: Duration::from_secs(DEFAULT_CALIBRATION_TIMEOUT_SECS),
            assessment_year: Utc::now().year(),
            ratio_thresholds: RatioStudyThresholds::default(),
            quality_thresholds: QualityThresholds::default(),
            cooks_distance_factor: 4.0,
            reference_data_path: None,
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults overridden by `CAMA_*` variables (and `.env`).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Some(n) = env_parse::<usize>("CAMA_MIN_SAMPLE_SIZE")? {
            config.min_sample_size = n;
        }
        if let Some(secs) = env_parse::<u64>("CAMA_CALIBRATION_TIMEOUT_SECS")? {
            config.calibration_timeout = Duration::from_secs(secs);
        }
        if let Some(year) = env_parse::<i32>("CAMA_ASSESSMENT_YEAR")? {
            config.assessment_year = year;
        }
        if let Ok(path) = std::env::var("CAMA_REFERENCE_DATA") {
            if !path.trim().is_empty() {
                config.reference_data_path = Some(PathBuf::from(path));
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_sample_size == 0 {
            return Err(EngineError::Config("min_sample_size must be > 0".into()));
        }
        if self.calibration_timeout.is_zero() {
            return Err(EngineError::Config("calibration_timeout must be > 0".into()));
        }
        if !(self.cooks_distance_factor.is_finite() && self.cooks_distance_factor > 0.0) {
            return Err(EngineError::Config("cooks_distance_factor must be > 0".into()));
        }
        let r = &self.ratio_thresholds;
        if !(r.min_prd <= r.max_prd && r.min_prb <= r.max_prb && r.max_cod > 0.0) {
            return Err(EngineError::Config("Inconsistent ratio study thresholds".into()));
        }
        let q = &self.quality_thresholds;
        if !(q.outlier_z <= q.high_severity_z && q.assessment_gap <= q.high_severity_gap) {
            return Err(EngineError::Config("Inconsistent quality thresholds".into()));
        }
        Ok(())
    }

    /// Reference tables from `reference_data_path`, or the standard seed.
    pub fn load_reference_data(&self) -> Result<ReferenceData> {
        match &self.reference_data_path {
            Some(path) => ReferenceData::from_json_file(path),
            None => Ok(ReferenceData::standard()),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("Invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// Depreciation schedule and neighborhood factors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceData {
    #[serde(default)]
    pub depreciation_table: Vec<DepreciationTableEntry>,
    #[serde(default)]
    pub location_factors: BTreeMap<String, LocationAdjustmentFactor>,
}

const STANDARD_AGES: [f64; 13] = [
    0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 35.0, 40.0, 45.0, 50.0, 55.0, 60.0,
];

const STANDARD_SCHEDULE: [(&str, [f64; 13]); 4] = [
    ("low", [0.0, 6.0, 12.0, 19.0, 26.0, 33.0, 40.0, 46.0, 52.0, 57.0, 62.0, 66.0, 70.0]),
    ("average", [0.0, 4.0, 9.0, 15.0, 21.0, 27.0, 33.0, 38.0, 43.0, 48.0, 52.0, 56.0, 60.0]),
    ("good", [0.0, 3.0, 7.0, 12.0, 17.0, 22.0, 27.0, 32.0, 37.0, 41.0, 45.0, 49.0, 53.0]),
    ("excellent", [0.0, 2.0, 5.0, 9.0, 13.0, 17.0, 21.0, 25.0, 29.0, 33.0, 37.0, 40.0, 43.0]),
];

/// Benton County, WA neighborhood factors.
const STANDARD_LOCATIONS: [(&str, f64, f64); 6] = [
    ("BC-RICH-01", 1.08, 0.90),
    ("BC-KEN-01", 1.00, 0.95),
    ("BC-KEN-02", 0.96, 0.85),
    ("BC-WR-01", 1.12, 0.80),
    ("BC-PROS-01", 0.88, 0.75),
    ("BC-BEN-01", 0.93, 0.70),
];

impl ReferenceData {
    /// Seeded defaults: four quality classes and one example locale.
    pub fn standard() -> Self {
        let mut depreciation_table = Vec::with_capacity(STANDARD_SCHEDULE.len() * STANDARD_AGES.len());
        for (class, percentages) in STANDARD_SCHEDULE {
            for (age, pct) in STANDARD_AGES.iter().zip(percentages) {
                depreciation_table.push(DepreciationTableEntry {
                    effective_age: *age,
                    quality_class: class.to_string(),
                    percentage: pct,
                });
            }
        }

        let location_factors = STANDARD_LOCATIONS
            .iter()
            .map(|(code, factor, confidence)| {
                (
                    code.to_string(),
                    LocationAdjustmentFactor {
                        factor: *factor,
                        confidence: *confidence,
                    },
                )
            })
            .collect();

        Self {
            depreciation_table,
            location_factors,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let data: ReferenceData = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("Invalid reference data: {e}")))?;
        data.validate()?;
        Ok(data)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Check row ranges and that each class schedule never decreases with age.
    pub fn validate(&self) -> Result<()> {
        let mut by_class: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
        for entry in &self.depreciation_table {
            if !(entry.effective_age.is_finite() && entry.effective_age >= 0.0) {
                return Err(EngineError::Config(format!(
                    "Depreciation entry for '{}' has invalid age {}",
                    entry.quality_class, entry.effective_age
                )));
            }
            if !(entry.percentage.is_finite() && (0.0..=100.0).contains(&entry.percentage)) {
                return Err(EngineError::Config(format!(
                    "Depreciation entry for '{}' has invalid percentage {}",
                    entry.quality_class, entry.percentage
                )));
            }
            by_class
                .entry(normalize_key(&entry.quality_class))
                .or_default()
                .push((entry.effective_age, entry.percentage));
        }

        for (class, rows) in &mut by_class {
            rows.sort_by(|a, b| a.0.total_cmp(&b.0));
            for pair in rows.windows(2) {
                if pair[1].1 < pair[0].1 {
                    return Err(EngineError::Config(format!(
                        "Depreciation for class '{class}' decreases between age {} and {}",
                        pair[0].0, pair[1].0
                    )));
                }
            }
        }

        for (code, f) in &self.location_factors {
            if !(f.factor.is_finite() && f.factor > 0.0) {
                return Err(EngineError::Config(format!(
                    "Location factor for '{code}' must be positive"
                )));
            }
            if !(0.0..=1.0).contains(&f.confidence) {
                return Err(EngineError::Config(format!(
                    "Location confidence for '{code}' must be within [0, 1]"
                )));
            }
        }
        Ok(())
    }

    /// Factor for a neighborhood; neutral when the code is absent or unknown.
    pub fn location_factor(&self, neighborhood: Option<&str>) -> LocationAdjustmentFactor {
        neighborhood
            .and_then(|code| self.location_factors.get(code))
            .copied()
            .unwrap_or(LocationAdjustmentFactor::NEUTRAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_reference_data_is_valid() {
        let data = ReferenceData::standard();
        data.validate().unwrap();
        assert_eq!(data.depreciation_table.len(), 4 * 13);
        assert_eq!(data.location_factors.len(), 6);
    }

    #[test]
    fn unknown_neighborhood_is_neutral() {
        let data = ReferenceData::standard();
        assert_eq!(data.location_factor(Some("NOWHERE")), LocationAdjustmentFactor::NEUTRAL);
        assert_eq!(data.location_factor(None).factor, 1.0);
        assert_eq!(data.location_factor(Some("BC-WR-01")).factor, 1.12);
    }

    #[test]
    fn rejects_decreasing_schedule() {
        let json = r#"{
            "depreciationTable": [
                {"effectiveAge": 0, "qualityClass": "fair", "percentage": 0},
                {"effectiveAge": 10, "qualityClass": "fair", "percentage": 20},
                {"effectiveAge": 20, "qualityClass": "Fair", "percentage": 15}
            ]
        }"#;
        let err = ReferenceData::from_json_str(json).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn loads_reference_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.json");
        std::fs::write(
            &path,
            r#"{"locationFactors": {"N1": {"factor": 1.2, "confidence": 0.5}}}"#,
        )
        .unwrap();
        let data = ReferenceData::from_json_file(&path).unwrap();
        assert!(data.depreciation_table.is_empty());
        assert_eq!(data.location_factor(Some("N1")).factor, 1.2);
    }

    #[test]
    fn default_config_validates() {
        EngineConfig::default().validate().unwrap();
        let bad = EngineConfig {
            min_sample_size: 0,
            ..EngineConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
