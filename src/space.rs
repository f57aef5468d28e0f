//! Search-space definitions and parameter values.
//!
//! A [`SearchSpace`] is an ordered, immutable list of named parameters.
//! Every candidate handed to the simulation backend is a [`ParamSet`] with
//! exactly one [`ParamValue`] per parameter.
//!
//! ```
//! use sledo::space::{ParamValue, SearchSpace};
//!
//! let space = SearchSpace::builder()
//!     .float("arm_height", 1e-3, 20e-3)
//!     .log_float("conductivity", 1.0, 400.0)
//!     .int("n_channels", 1, 8)
//!     .categorical("material", ["tungsten", "copper"])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(space.len(), 4);
//! let centre = space.decode(&[0.5, 0.5, 0.5, 0.5]);
//! assert!(space.validate(&centre).is_ok());
//! assert_eq!(centre["material"], ParamValue::Choice("copper".into()));
//! ```

use core::fmt;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A concrete parameter value.
///
/// Serialized untagged: integers as JSON integers, floats as JSON numbers
/// with a fractional part, choices as strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Value of an integer parameter.
    Int(i64),
    /// Value of a continuous parameter.
    Float(f64),
    /// Value of a categorical parameter.
    Choice(String),
}

impl ParamValue {
    /// Numeric view of the value (`None` for choices).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Choice(_) => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Choice(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Choice(s) => f.write_str(s),
        }
    }
}

/// One candidate design: parameter name to value, ordered by name.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// The domain of a single parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    /// Continuous range `[low, high]`, optionally sampled in log space.
    Float {
        low: f64,
        high: f64,
        #[serde(default)]
        log: bool,
    },
    /// Integer range `[low, high]`.
    Int { low: i64, high: i64 },
    /// Finite set of named choices.
    Categorical { choices: Vec<String> },
}

/// A named parameter definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ParamKind,
}

impl ParamSpec {
    fn check(&self) -> Result<()> {
        let name = &self.name;
        if name.trim().is_empty() {
            return Err(Error::InvalidSearchSpace(
                "parameter names cannot be empty".to_string(),
            ));
        }
        match &self.kind {
            ParamKind::Float { low, high, log } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(Error::InvalidSearchSpace(format!(
                        "'{name}': bounds must be finite"
                    )));
                }
                if low > high {
                    return Err(Error::InvalidSearchSpace(format!(
                        "'{name}': low ({low}) must be less than or equal to high ({high})"
                    )));
                }
                if *log && *low <= 0.0 {
                    return Err(Error::InvalidSearchSpace(format!(
                        "'{name}': log scale requires a positive lower bound"
                    )));
                }
            }
            ParamKind::Int { low, high } => {
                if low > high {
                    return Err(Error::InvalidSearchSpace(format!(
                        "'{name}': low ({low}) must be less than or equal to high ({high})"
                    )));
                }
            }
            ParamKind::Categorical { choices } => {
                if choices.is_empty() {
                    return Err(Error::InvalidSearchSpace(format!(
                        "'{name}': categorical choices cannot be empty"
                    )));
                }
                let unique: HashSet<&String> = choices.iter().collect();
                if unique.len() != choices.len() {
                    return Err(Error::InvalidSearchSpace(format!(
                        "'{name}': categorical choices must be distinct"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Checks a single value against this parameter's domain.
    fn admits(&self, value: &ParamValue) -> Result<()> {
        let name = &self.name;
        let ok = match (&self.kind, value) {
            (ParamKind::Float { low, high, .. }, ParamValue::Float(v)) => {
                v.is_finite() && (*low..=*high).contains(v)
            }
            (ParamKind::Int { low, high }, ParamValue::Int(v)) => (*low..=*high).contains(v),
            (ParamKind::Categorical { choices }, ParamValue::Choice(c)) => choices.contains(c),
            _ => {
                return Err(Error::InvalidParameters(format!(
                    "'{name}': value {value:?} has the wrong type"
                )));
            }
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidParameters(format!(
                "'{name}': value {value} is outside the domain"
            )))
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn encode(&self, value: &ParamValue) -> f64 {
        match (&self.kind, value) {
            (ParamKind::Float { low, high, log }, ParamValue::Float(v)) => {
                if high <= low {
                    return 0.5;
                }
                let u = if *log {
                    (v.ln() - low.ln()) / (high.ln() - low.ln())
                } else {
                    (v - low) / (high - low)
                };
                u.clamp(0.0, 1.0)
            }
            (ParamKind::Int { low, high }, ParamValue::Int(v)) => {
                let low = i128::from(*low);
                let count = (i128::from(*high) - low + 1) as f64;
                (((i128::from(*v) - low) as f64 + 0.5) / count).clamp(0.0, 1.0)
            }
            (ParamKind::Categorical { choices }, ParamValue::Choice(c)) => {
                let index = choices.iter().position(|x| x == c).unwrap_or(0);
                (index as f64 + 0.5) / choices.len() as f64
            }
            _ => 0.5,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn decode(&self, u: f64) -> ParamValue {
        let u = if u.is_finite() { u.clamp(0.0, 1.0) } else { 0.5 };
        match &self.kind {
            ParamKind::Float { low, high, log } => {
                let v = if *log {
                    (low.ln() + u * (high.ln() - low.ln())).exp()
                } else {
                    low + u * (high - low)
                };
                ParamValue::Float(v.clamp(*low, *high))
            }
            ParamKind::Int { low, high } => {
                // i128 so that the full i64 range has a count.
                let (low, high) = (i128::from(*low), i128::from(*high));
                let count = high - low + 1;
                let offset = ((u * count as f64).floor() as i128).min(count - 1);
                ParamValue::Int((low + offset).clamp(low, high) as i64)
            }
            ParamKind::Categorical { choices } => {
                let n = choices.len();
                let index = ((u * n as f64).floor() as usize).min(n - 1);
                ParamValue::Choice(choices[index].clone())
            }
        }
    }
}

/// Ordered, immutable description of the design space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ParamSpec>", into = "Vec<ParamSpec>")]
pub struct SearchSpace {
    params: Vec<ParamSpec>,
}

impl TryFrom<Vec<ParamSpec>> for SearchSpace {
    type Error = Error;

    fn try_from(params: Vec<ParamSpec>) -> Result<Self> {
        Self::new(params)
    }
}

impl From<SearchSpace> for Vec<ParamSpec> {
    fn from(space: SearchSpace) -> Self {
        space.params
    }
}

impl SearchSpace {
    /// Builds a space from parameter definitions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSearchSpace`] if the list is empty, a name is
    /// repeated, or any domain is malformed.
    pub fn new(params: Vec<ParamSpec>) -> Result<Self> {
        if params.is_empty() {
            return Err(Error::InvalidSearchSpace(
                "a search space needs at least one parameter".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for p in &params {
            p.check()?;
            if !seen.insert(p.name.as_str()) {
                return Err(Error::InvalidSearchSpace(format!(
                    "duplicate parameter name '{}'",
                    p.name
                )));
            }
        }
        Ok(Self { params })
    }

    #[must_use]
    pub fn builder() -> SearchSpaceBuilder {
        SearchSpaceBuilder::default()
    }

    /// Parameter definitions in declaration order.
    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Number of parameters (the dimension of the unit-cube encoding).
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Checks that `values` has exactly one in-domain value per parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameters`] describing the first violation.
    pub fn validate(&self, values: &ParamSet) -> Result<()> {
        for spec in &self.params {
            let value = values.get(&spec.name).ok_or_else(|| {
                Error::InvalidParameters(format!("missing value for '{}'", spec.name))
            })?;
            spec.admits(value)?;
        }
        if values.len() != self.params.len() {
            let extra: Vec<&str> = values
                .keys()
                .filter(|k| self.get(k).is_none())
                .map(String::as_str)
                .collect();
            return Err(Error::InvalidParameters(format!(
                "unknown parameters: {}",
                extra.join(", ")
            )));
        }
        Ok(())
    }

    /// Maps a parameter set into the unit cube, in declaration order.
    ///
    /// Missing or mistyped values map to the centre of their axis.
    #[must_use]
    pub fn encode(&self, values: &ParamSet) -> Vec<f64> {
        self.params
            .iter()
            .map(|spec| values.get(&spec.name).map_or(0.5, |v| spec.encode(v)))
            .collect()
    }

    /// Maps a unit-cube point back to a valid parameter set.
    ///
    /// Coordinates are clamped to `[0, 1]`; missing trailing coordinates
    /// default to the centre.
    #[must_use]
    pub fn decode(&self, point: &[f64]) -> ParamSet {
        self.params
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let u = point.get(i).copied().unwrap_or(0.5);
                (spec.name.clone(), spec.decode(u))
            })
            .collect()
    }

    /// Euclidean distance between two parameter sets in the unit cube.
    #[must_use]
    pub fn distance(&self, a: &ParamSet, b: &ParamSet) -> f64 {
        self.encode(a)
            .iter()
            .zip(self.encode(b))
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// Fluent builder for [`SearchSpace`].
#[derive(Debug, Default)]
pub struct SearchSpaceBuilder {
    params: Vec<ParamSpec>,
}

impl SearchSpaceBuilder {
    fn push(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
        });
        self
    }

    /// Adds a continuous parameter on `[low, high]`.
    #[must_use]
    pub fn float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(
            name,
            ParamKind::Float {
                low,
                high,
                log: false,
            },
        )
    }

    /// Adds a continuous parameter searched in log space.
    #[must_use]
    pub fn log_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(
            name,
            ParamKind::Float {
                low,
                high,
                log: true,
            },
        )
    }

    #[must_use]
    pub fn int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.push(name, ParamKind::Int { low, high })
    }

    #[must_use]
    pub fn categorical<I, S>(self, name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let choices = choices.into_iter().map(Into::into).collect();
        self.push(name, ParamKind::Categorical { choices })
    }

    /// Validates and builds the space.
    ///
    /// # Errors
    ///
    /// See [`SearchSpace::new`].
    pub fn build(self) -> Result<SearchSpace> {
        SearchSpace::new(self.params)
    }
}
