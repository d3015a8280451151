use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{OpsError, Result};

/// A single hyperparameter value: a real number or a named categorical choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Choice(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Choice(_) => None,
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Choice(s) => Some(s),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Number(v) => serde_json::Value::from(*v),
            Self::Choice(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Choice(v.to_string())
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{}", v),
            Self::Choice(s) => write!(f, "{}", s),
        }
    }
}

pub type ParamSet = BTreeMap<String, ParamValue>;

/// Builds a [`ParamSet`] from literal pairs.
pub fn param_set<const N: usize>(entries: [(&str, ParamValue); N]) -> ParamSet {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Typed hyperparameter record of one strategy.
pub trait StrategyConfig: Serialize + DeserializeOwned + Clone {
    /// Keys every `set_params` call must carry.
    const REQUIRED: &'static [&'static str] = &[];

    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Overlays `params` on `current` and decodes the result back into the
/// record type. Unknown keys, missing required keys, bad categorical choices
/// and failed validation all surface as [`OpsError::Config`].
pub fn apply_params<C: StrategyConfig>(current: &C, params: &ParamSet) -> Result<C> {
    require_keys(params, C::REQUIRED)?;

    let mut value = serde_json::to_value(current)?;
    let fields = value
        .as_object_mut()
        .ok_or_else(|| OpsError::Config("parameter record is not a map".to_string()))?;
    for (key, v) in params {
        fields.insert(key.clone(), v.to_json());
    }

    let next: C = serde_json::from_value(value).map_err(|e| OpsError::Config(e.to_string()))?;
    next.validate()?;
    Ok(next)
}

pub fn require_keys(params: &ParamSet, keys: &[&str]) -> Result<()> {
    for key in keys {
        if !params.contains_key(*key) {
            return Err(OpsError::Config(format!("missing required key `{}`", key)));
        }
    }
    Ok(())
}

/// Splits `<key>_<index>` into its parts, e.g. `eps_1` into `("eps", 1)`.
pub fn split_indexed(key: &str) -> Option<(&str, usize)> {
    let (name, idx) = key.rsplit_once('_')?;
    let idx = idx.parse().ok()?;
    Some((name, idx))
}

pub(crate) fn require_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(OpsError::Config(format!(
            "`{}` = {} is outside [{}, {}]",
            name, value, min, max
        )));
    }
    Ok(())
}

/// Largest window or period any strategy accepts.
pub const MAX_SPAN: usize = 100_000;

pub(crate) fn require_span(name: &str, value: usize, min: usize) -> Result<()> {
    if value < min || value > MAX_SPAN {
        return Err(OpsError::Config(format!(
            "`{}` = {} must lie in [{}, {}]",
            name, value, min, MAX_SPAN
        )));
    }
    Ok(())
}

/// Integer fields decoded from real-valued samples: finite, non-negative
/// numbers up to [`MAX_SPAN`] are truncated.
pub mod lenient {
    use super::*;

    pub fn usize<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = f64::deserialize(deserializer)?;
        if !v.is_finite() || v < 0.0 || v > MAX_SPAN as f64 {
            return Err(serde::de::Error::custom(format!(
                "expected an integer in [0, {}], got {}",
                MAX_SPAN, v
            )));
        }
        Ok(v.trunc() as usize)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
        Choice(String),
    }

    /// Booleans also accept numbers (non-zero is `true`) and the categorical
    /// choices `"true"` and `"false"`.
    pub fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Flag::deserialize(deserializer)? {
            Flag::Bool(b) => Ok(b),
            Flag::Number(v) => Ok(v != 0.0),
            Flag::Choice(s) => match s.as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(serde::de::Error::custom(format!(
                    "expected `true` or `false`, got `{}`",
                    other
                ))),
            },
        }
    }
}
