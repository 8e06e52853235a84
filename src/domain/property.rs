//! Property and demographic records supplied by external collaborators.
//!
//! Records arrive pre-fetched. Every field is optional and has a documented
//! default so that sparse records still value deterministically:
//!
//! - missing numeric attributes read as `0.0`
//! - missing flags read as `false`
//! - missing quality class reads as `average`
//! - effective age falls back to `assessment_year - year_built`, then `0`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Version of the property record layout understood by this crate.
pub const PROPERTY_SCHEMA_VERSION: u32 = 1;

/// Quality class used when a record does not carry one.
pub const DEFAULT_QUALITY_CLASS: &str = "average";

/// Broad use classification of a parcel.
///
/// Deserialization goes through `FromStr`, so records may spell the type as
/// `multi_family`, `multi-family` or `Multi Family`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum PropertyType {
    #[default]
    SingleFamily,
    Residential,
    Condo,
    MultiFamily,
    Apartment,
    Commercial,
    Industrial,
    Land,
    Other,
}

impl PropertyType {
    pub const ALL: [PropertyType; 9] = [
        PropertyType::SingleFamily,
        PropertyType::Residential,
        PropertyType::Condo,
        PropertyType::MultiFamily,
        PropertyType::Apartment,
        PropertyType::Commercial,
        PropertyType::Industrial,
        PropertyType::Land,
        PropertyType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PropertyType::SingleFamily => "single_family",
            PropertyType::Residential => "residential",
            PropertyType::Condo => "condo",
            PropertyType::MultiFamily => "multi_family",
            PropertyType::Apartment => "apartment",
            PropertyType::Commercial => "commercial",
            PropertyType::Industrial => "industrial",
            PropertyType::Land => "land",
            PropertyType::Other => "other",
        }
    }

    /// Owner-occupied housing with an active sales market.
    pub fn is_standard_residential(self) -> bool {
        matches!(
            self,
            PropertyType::SingleFamily | PropertyType::Residential | PropertyType::Condo
        )
    }

    /// Property normally bought for its rent roll.
    pub fn is_income_producing(self) -> bool {
        matches!(
            self,
            PropertyType::MultiFamily
                | PropertyType::Apartment
                | PropertyType::Commercial
                | PropertyType::Industrial
        )
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for PropertyType {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for PropertyType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize_key(s);
        let kind = match key.as_str() {
            "singlefamily" | "sfr" => PropertyType::SingleFamily,
            "residential" => PropertyType::Residential,
            "condo" | "condominium" => PropertyType::Condo,
            "multifamily" => PropertyType::MultiFamily,
            "apartment" | "apartments" => PropertyType::Apartment,
            "commercial" => PropertyType::Commercial,
            "industrial" => PropertyType::Industrial,
            "land" | "vacant" => PropertyType::Land,
            "other" => PropertyType::Other,
            _ => return Err(EngineError::invalid(format!("Unknown property type '{s}'"))),
        };
        Ok(kind)
    }
}

/// Boolean characteristics that feed obsolescence and reliability rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyFlag {
    IsUnique,
    HasIrregularFloorPlan,
    HasOutdatedFeatures,
    ProximityToNegativeExternality,
    IsInDecliningNeighborhood,
    HasZoningIssues,
}

impl FromStr for PropertyFlag {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let flag = match normalize_key(s).as_str() {
            "isunique" | "unique" => PropertyFlag::IsUnique,
            "hasirregularfloorplan" | "irregularfloorplan" => PropertyFlag::HasIrregularFloorPlan,
            "hasoutdatedfeatures" | "outdatedfeatures" => PropertyFlag::HasOutdatedFeatures,
            "proximitytonegativeexternality" | "negativeexternality" => {
                PropertyFlag::ProximityToNegativeExternality
            }
            "isindecliningneighborhood" | "decliningneighborhood" => {
                PropertyFlag::IsInDecliningNeighborhood
            }
            "haszoningissues" | "zoningissues" => PropertyFlag::HasZoningIssues,
            _ => return Err(EngineError::invalid(format!("Unknown property flag '{s}'"))),
        };
        Ok(flag)
    }
}

/// Numeric attributes a model variable may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyAttribute {
    YearBuilt,
    BuildingArea,
    Bedrooms,
    Bathrooms,
    LotSize,
    GarageSize,
    /// Chronological age at the assessment year.
    Age,
    EffectiveAge,
    SystemsAge,
    Latitude,
    Longitude,
}

impl FromStr for PropertyAttribute {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let attr = match normalize_key(s).as_str() {
            "yearbuilt" => PropertyAttribute::YearBuilt,
            "buildingarea" | "squarefeet" | "sqft" | "livingarea" => PropertyAttribute::BuildingArea,
            "bedrooms" | "beds" => PropertyAttribute::Bedrooms,
            "bathrooms" | "baths" => PropertyAttribute::Bathrooms,
            "lotsize" | "landarea" => PropertyAttribute::LotSize,
            "garagesize" | "garage" => PropertyAttribute::GarageSize,
            "age" => PropertyAttribute::Age,
            "effectiveage" => PropertyAttribute::EffectiveAge,
            "systemsage" => PropertyAttribute::SystemsAge,
            "latitude" | "lat" => PropertyAttribute::Latitude,
            "longitude" | "lon" | "lng" => PropertyAttribute::Longitude,
            _ => return Err(EngineError::invalid(format!("Unknown property attribute '{s}'"))),
        };
        Ok(attr)
    }
}

/// Text attributes usable as categorical levels (`attribute=level`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoricalAttribute {
    PropertyType,
    Neighborhood,
    Quality,
    Condition,
}

impl FromStr for CategoricalAttribute {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let attr = match normalize_key(s).as_str() {
            "propertytype" | "type" => CategoricalAttribute::PropertyType,
            "neighborhood" | "neighborhoodcode" => CategoricalAttribute::Neighborhood,
            "quality" | "qualityclass" => CategoricalAttribute::Quality,
            "condition" => CategoricalAttribute::Condition,
            _ => {
                return Err(EngineError::invalid(format!(
                    "Unknown categorical attribute '{s}'"
                )));
            }
        };
        Ok(attr)
    }
}

/// A single parcel as delivered by the data-access collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyRecord {
    pub id: String,
    pub year_built: Option<i32>,
    #[serde(alias = "squareFeet")]
    pub building_area: Option<f64>,
    pub bedrooms: Option<f64>,
    pub bathrooms: Option<f64>,
    pub lot_size: Option<f64>,
    pub garage_size: Option<f64>,
    pub property_type: PropertyType,
    #[serde(alias = "neighborhoodCode")]
    pub neighborhood: Option<String>,
    pub condition: Option<String>,
    #[serde(alias = "qualityClass")]
    pub quality: Option<String>,
    pub effective_age: Option<f64>,
    pub systems_age: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    pub is_unique: bool,
    pub has_irregular_floor_plan: bool,
    pub has_outdated_features: bool,
    pub proximity_to_negative_externality: bool,
    pub is_in_declining_neighborhood: bool,
    pub has_zoning_issues: bool,
}

impl PropertyRecord {
    /// Chronological age at `assessment_year`, if the build year is known.
    pub fn age(&self, assessment_year: i32) -> Option<f64> {
        self.year_built
            .map(|built| f64::from((assessment_year - built).max(0)))
    }

    /// Condition-adjusted age; see module docs for the fallback order.
    pub fn effective_age(&self, assessment_year: i32) -> f64 {
        self.effective_age
            .or_else(|| self.age(assessment_year))
            .unwrap_or(0.0)
    }

    pub fn quality_class(&self) -> &str {
        self.quality.as_deref().unwrap_or(DEFAULT_QUALITY_CLASS)
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Raw numeric attribute, `None` when the record does not carry it.
    pub fn numeric(&self, attr: PropertyAttribute, assessment_year: i32) -> Option<f64> {
        match attr {
            PropertyAttribute::YearBuilt => self.year_built.map(f64::from),
            PropertyAttribute::BuildingArea => self.building_area,
            PropertyAttribute::Bedrooms => self.bedrooms,
            PropertyAttribute::Bathrooms => self.bathrooms,
            PropertyAttribute::LotSize => self.lot_size,
            PropertyAttribute::GarageSize => self.garage_size,
            PropertyAttribute::Age => self.age(assessment_year),
            PropertyAttribute::EffectiveAge => Some(self.effective_age(assessment_year)),
            PropertyAttribute::SystemsAge => self.systems_age,
            PropertyAttribute::Latitude => self.latitude,
            PropertyAttribute::Longitude => self.longitude,
        }
    }

    pub fn flag(&self, flag: PropertyFlag) -> bool {
        match flag {
            PropertyFlag::IsUnique => self.is_unique,
            PropertyFlag::HasIrregularFloorPlan => self.has_irregular_floor_plan,
            PropertyFlag::HasOutdatedFeatures => self.has_outdated_features,
            PropertyFlag::ProximityToNegativeExternality => self.proximity_to_negative_externality,
            PropertyFlag::IsInDecliningNeighborhood => self.is_in_declining_neighborhood,
            PropertyFlag::HasZoningIssues => self.has_zoning_issues,
        }
    }

    pub fn categorical(&self, attr: CategoricalAttribute) -> Option<String> {
        match attr {
            CategoricalAttribute::PropertyType => Some(self.property_type.as_str().to_string()),
            CategoricalAttribute::Neighborhood => self.neighborhood.clone(),
            CategoricalAttribute::Quality => Some(self.quality_class().to_string()),
            CategoricalAttribute::Condition => self.condition.clone(),
        }
    }
}

/// Enrichment data for the parcel's area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DemographicRecord {
    pub neighborhood: Option<String>,
    /// Unemployment rate in percent (6.0 means 6%).
    pub unemployment_rate: Option<f64>,
}

/// Lowercase and strip separators so `yearBuilt`, `year_built` and
/// `year-built` name the same field.
pub fn normalize_key(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}
