//! Synthetic parcel and sale generation.
//!
//! Produces a reproducible market of single-family parcels whose sale prices
//! follow a known hedonic surface, plus assessments with a controllable level
//! and regressivity. Used by the `cama` demo commands and by tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{LogNormal, Normal};

use crate::audit::{SalePair, StratifiedPair};
use crate::config::ReferenceData;
use crate::domain::{CalibrationSample, PropertyRecord, PropertyType};
use crate::error::{EngineError, Result};
use crate::math::median;

/// Generating surface: `price = BASE + Σ rate · attribute`, then aged,
/// location-adjusted and scaled by log-normal noise.
pub const BASE_PRICE: f64 = 45_000.0;
pub const PRICE_PER_SQFT: f64 = 118.0;
pub const PRICE_PER_BATHROOM: f64 = 9_500.0;
pub const PRICE_PER_LOT_SQFT: f64 = 1.6;
/// Fractional value lost per year of effective age.
pub const AGE_DISCOUNT: f64 = 0.004;

/// Benton County quality mix.
const QUALITY_CLASSES: [(&str, f64); 4] = [("low", 0.15), ("average", 0.5), ("good", 0.27), ("excellent", 0.08)];

#[derive(Debug, Clone, PartialEq)]
pub struct SampleConfig {
    pub count: usize,
    pub seed: u64,
    pub assessment_year: i32,
    /// Standard deviation of log-normal price noise.
    pub price_noise: f64,
    /// Neighborhood codes to draw from; empty leaves parcels unassigned.
    pub neighborhoods: Vec<String>,
}

impl SampleConfig {
    pub fn new(count: usize, seed: u64, assessment_year: i32) -> Self {
        Self {
            count,
            seed,
            assessment_year,
            price_noise: 0.08,
            neighborhoods: Vec::new(),
        }
    }
}

/// Assessment roll behaviour for `assess`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssessmentProfile {
    /// Overall assessment level (1.0 = assessed at market).
    pub level: f64,
    /// Elasticity of the ratio to value; positive values make the roll regressive.
    pub regressivity: f64,
    /// Standard deviation of log-normal assessment noise.
    pub dispersion: f64,
}

impl Default for AssessmentProfile {
    fn default() -> Self {
        Self {
            level: 1.0,
            regressivity: 0.0,
            dispersion: 0.06,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSale {
    pub property: PropertyRecord,
    pub sale_price: f64,
}

impl SyntheticSale {
    pub fn to_calibration_sample(&self) -> CalibrationSample {
        CalibrationSample {
            property: self.property.clone(),
            observed: self.sale_price,
            weight: None,
        }
    }
}

pub fn generate_sales(config: &SampleConfig, reference: &ReferenceData) -> Result<Vec<SyntheticSale>> {
    if config.count == 0 {
        return Err(EngineError::invalid("Sample count must be > 0"));
    }
    if !(config.price_noise.is_finite() && config.price_noise >= 0.0) {
        return Err(EngineError::invalid("Price noise must be a non-negative number"));
    }

    let mut rng = StdRng::seed_from_u64(sample_seed(config));
    let noise = LogNormal::new(0.0, config.price_noise)
        .map_err(|e| EngineError::invalid(format!("Noise distribution error: {e}")))?;
    let area_dist = Normal::<f64>::new(1_850.0, 480.0)
        .map_err(|e| EngineError::invalid(format!("Area distribution error: {e}")))?;

    let mut sales = Vec::with_capacity(config.count);
    for i in 0..config.count {
        let building_area = area_dist.sample(&mut rng).clamp(650.0, 4_800.0).round();
        let bedrooms = (building_area / 600.0).round().clamp(1.0, 6.0);
        let bathrooms = (bedrooms * 0.5 + rng.gen_range(0.0..1.5_f64)).round().clamp(1.0, 4.0);
        let lot_size = (building_area * rng.gen_range(2.5..6.0_f64)).round();
        let garage_size = if rng.gen_bool(0.8) {
            Some(rng.gen_range(1..=3) as f64)
        } else {
            None
        };
        let year_built = config.assessment_year - rng.gen_range(0..=70);
        let effective_age = f64::from(config.assessment_year - year_built) * rng.gen_range(0.6..1.0_f64);
        let neighborhood = config
            .neighborhoods
            .choose(&mut rng)
            .cloned();
        let quality = pick_quality(&mut rng);

        let property = PropertyRecord {
            id: format!("BC-{:05}", i + 1),
            year_built: Some(year_built),
            building_area: Some(building_area),
            bedrooms: Some(bedrooms),
            bathrooms: Some(bathrooms),
            lot_size: Some(lot_size),
            garage_size,
            property_type: PropertyType::SingleFamily,
            neighborhood,
            quality: Some(quality.to_string()),
            effective_age: Some(effective_age.round()),
            latitude: Some(46.21 + rng.gen_range(-0.12..0.12_f64)),
            longitude: Some(-119.24 + rng.gen_range(-0.15..0.15_f64)),
            ..Default::default()
        };

        let location = reference.location_factor(property.neighborhood.as_deref()).factor;
        let sale_price = (hedonic_price(&property, config.assessment_year) * location * noise.sample(&mut rng)).round();
        sales.push(SyntheticSale { property, sale_price });
    }
    Ok(sales)
}

/// Noiseless, location-neutral price of a parcel under the generating surface.
pub fn hedonic_price(property: &PropertyRecord, assessment_year: i32) -> f64 {
    let structural = BASE_PRICE
        + PRICE_PER_SQFT * property.building_area.unwrap_or(0.0)
        + PRICE_PER_BATHROOM * property.bathrooms.unwrap_or(0.0)
        + PRICE_PER_LOT_SQFT * property.lot_size.unwrap_or(0.0);
    let age = property.effective_age(assessment_year);
    structural * (1.0 - AGE_DISCOUNT * age).max(0.5)
}

/// Assessed values for `sales` under `profile`, as ratio-study pairs.
pub fn assess(sales: &[SyntheticSale], profile: AssessmentProfile, seed: u64) -> Result<Vec<SalePair>> {
    if !(profile.level.is_finite() && profile.level > 0.0) {
        return Err(EngineError::invalid("Assessment level must be positive"));
    }
    let prices: Vec<f64> = sales.iter().map(|s| s.sale_price).collect();
    let centre = median(&prices).ok_or_else(|| EngineError::invalid("No sales to assess"))?;
    let noise = LogNormal::new(0.0, profile.dispersion)
        .map_err(|e| EngineError::invalid(format!("Dispersion error: {e}")))?;
    let mut rng = StdRng::seed_from_u64(seed);

    Ok(sales
        .iter()
        .map(|s| {
            let tilt = (s.sale_price / centre).powf(-profile.regressivity);
            SalePair {
                market_value: s.sale_price,
                assessed_value: (s.sale_price * profile.level * tilt * noise.sample(&mut rng)).round(),
            }
        })
        .collect())
}

/// Tag each pair with its parcel's neighborhood (or `"unassigned"`).
pub fn stratify_by_neighborhood(sales: &[SyntheticSale], pairs: &[SalePair]) -> Vec<StratifiedPair> {
    sales
        .iter()
        .zip(pairs)
        .map(|(s, pair)| StratifiedPair {
            stratum: s
                .property
                .neighborhood
                .clone()
                .unwrap_or_else(|| "unassigned".to_string()),
            pair: *pair,
        })
        .collect()
}

fn pick_quality(rng: &mut StdRng) -> &'static str {
    let u: f64 = rng.r#gen();
    let mut acc = 0.0;
    for (class, share) in QUALITY_CLASSES {
        acc += share;
        if u < acc {
            return class;
        }
    }
    "average"
}

fn sample_seed(config: &SampleConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.seed.hash(&mut hasher);
    config.count.hash(&mut hasher);
    config.assessment_year.hash(&mut hasher);
    config.price_noise.to_bits().hash(&mut hasher);
    config.neighborhoods.hash(&mut hasher);
    hasher.finish()
}
