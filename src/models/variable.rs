//! Resolving model variables against property records.
//!
//! A variable name is bound to a typed source when the model is created, so a
//! misspelt attribute fails at `create_model` rather than at valuation time.

use crate::domain::{
    CategoricalAttribute, ModelVariable, PropertyAttribute, PropertyFlag, PropertyRecord,
    Standardization, Transformation, VariableKind, normalize_key,
};
use crate::error::{EngineError, Result};

/// Where a variable's raw value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeSource {
    Numeric(PropertyAttribute),
    Flag(PropertyFlag),
    /// 1.0 when the categorical attribute equals `level`.
    Level {
        attribute: CategoricalAttribute,
        level: String,
    },
}

impl AttributeSource {
    pub fn resolve(variable: &ModelVariable) -> Result<Self> {
        let name = variable.name.as_str();
        match variable.kind {
            VariableKind::Indicator => Ok(AttributeSource::Flag(name.parse()?)),
            VariableKind::Categorical => {
                let (attr, level) = name.split_once('=').ok_or_else(|| {
                    EngineError::invalid(format!(
                        "Categorical variable '{name}' must be declared as attribute=level"
                    ))
                })?;
                let level = level.trim();
                if level.is_empty() {
                    return Err(EngineError::invalid(format!(
                        "Categorical variable '{name}' has an empty level"
                    )));
                }
                Ok(AttributeSource::Level {
                    attribute: attr.trim().parse()?,
                    level: normalize_key(level),
                })
            }
            VariableKind::Continuous | VariableKind::Spatial | VariableKind::Transformed => {
                Ok(AttributeSource::Numeric(name.parse()?))
            }
        }
    }

    /// Raw (untransformed) value. Missing numeric attributes read as `0.0`.
    pub fn raw_value(&self, property: &PropertyRecord, assessment_year: i32) -> f64 {
        match self {
            AttributeSource::Numeric(attr) => property.numeric(*attr, assessment_year).unwrap_or(0.0),
            AttributeSource::Flag(flag) => indicator(property.flag(*flag)),
            AttributeSource::Level { attribute, level } => {
                let matches = property
                    .categorical(*attribute)
                    .is_some_and(|v| normalize_key(&v) == *level);
                indicator(matches)
            }
        }
    }
}

fn indicator(on: bool) -> f64 {
    if on { 1.0 } else { 0.0 }
}

/// Apply a declared transformation, failing with the offending variable name.
pub fn apply_transformation(
    variable: &str,
    transformation: Transformation,
    value: f64,
    standardization: Option<Standardization>,
) -> Result<f64> {
    let fail = || EngineError::Transformation {
        variable: variable.to_string(),
        transformation: transformation.to_string(),
        value,
    };

    if !value.is_finite() {
        return Err(fail());
    }

    let out = match transformation {
        Transformation::None => value,
        Transformation::Log => {
            if value <= 0.0 {
                return Err(fail());
            }
            value.ln()
        }
        Transformation::Square => value * value,
        Transformation::Sqrt => {
            if value < 0.0 {
                return Err(fail());
            }
            value.sqrt()
        }
        Transformation::Inverse => {
            if value == 0.0 {
                return Err(fail());
            }
            1.0 / value
        }
        Transformation::Standardize => {
            let Some(s) = standardization else {
                return Err(fail());
            };
            if !(s.std_dev.is_finite() && s.std_dev > 0.0) {
                return Err(fail());
            }
            (value - s.mean) / s.std_dev
        }
    };

    if out.is_finite() { Ok(out) } else { Err(fail()) }
}
