use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{OpsError, Result};
use crate::model::params::{ParamSet, ParamValue};

/// Closed numeric interval for one hyperparameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    /// Samples are rounded to the nearest integer.
    #[serde(default)]
    pub integer: bool,
}

impl ParamRange {
    pub fn real(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            integer: false,
        }
    }

    pub fn integer(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            integer: true,
        }
    }

    pub fn center(&self) -> f64 {
        0.5 * (self.min + self.max)
    }

    /// Clamps into the range, rounding integer ranges.
    pub fn snap(&self, v: f64) -> f64 {
        let v = v.clamp(self.min, self.max);
        if self.integer {
            v.round().clamp(self.min.ceil(), self.max.floor().max(self.min.ceil()))
        } else {
            v
        }
    }

    /// Maps an unbounded coordinate into the range through a logistic curve;
    /// 0 lands on the centre.
    pub fn from_unbounded(&self, raw: f64) -> f64 {
        let t = 1.0 / (1.0 + (-raw).exp());
        self.min + (self.max - self.min) * t
    }

    /// Inverse of [`Self::from_unbounded`], with the edges pulled in so the
    /// result stays finite.
    pub fn to_unbounded(&self, value: f64) -> f64 {
        let width = self.max - self.min;
        if width <= 0.0 {
            return 0.0;
        }
        let t = ((value - self.min) / width).clamp(1e-3, 1.0 - 1e-3);
        (t / (1.0 - t)).ln()
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(OpsError::Config(format!(
                "search range for `{}` is [{}, {}]",
                name, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Structured search space: a box of numeric ranges, or a categorical key
/// whose every choice carries its own sub-space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSpace {
    Params(BTreeMap<String, ParamRange>),
    Choice {
        key: String,
        branches: BTreeMap<String, SearchSpace>,
    },
}

impl SearchSpace {
    pub fn params<const N: usize>(ranges: [(&str, ParamRange); N]) -> Self {
        Self::Params(
            ranges
                .into_iter()
                .map(|(k, r)| (k.to_string(), r))
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Self::Params(BTreeMap::new())
    }

    pub fn choice<const N: usize>(key: &str, branches: [(&str, SearchSpace); N]) -> Self {
        Self::Choice {
            key: key.to_string(),
            branches: branches
                .into_iter()
                .map(|(k, s)| (k.to_string(), s))
                .collect(),
        }
    }

    /// Every path through the categorical branches, as fixed choices plus
    /// the numeric box reached at the end of the path.
    pub fn leaves(&self) -> Result<Vec<SearchLeaf>> {
        let mut out = Vec::new();
        self.collect_leaves(BTreeMap::new(), &mut out)?;
        Ok(out)
    }

    fn collect_leaves(
        &self,
        fixed: BTreeMap<String, String>,
        out: &mut Vec<SearchLeaf>,
    ) -> Result<()> {
        match self {
            Self::Params(ranges) => {
                for (name, range) in ranges {
                    if fixed.contains_key(name) {
                        return Err(OpsError::Config(format!(
                            "`{}` is both a categorical key and a numeric range",
                            name
                        )));
                    }
                    range.validate(name)?;
                }
                out.push(SearchLeaf {
                    fixed,
                    ranges: ranges.iter().map(|(k, r)| (k.clone(), *r)).collect(),
                });
            }
            Self::Choice { key, branches } => {
                if branches.is_empty() {
                    return Err(OpsError::Config(format!(
                        "categorical key `{}` has no choices",
                        key
                    )));
                }
                if fixed.contains_key(key) {
                    return Err(OpsError::Config(format!(
                        "categorical key `{}` appears twice on one path",
                        key
                    )));
                }
                for (choice, sub) in branches {
                    let mut path = fixed.clone();
                    path.insert(key.clone(), choice.clone());
                    sub.collect_leaves(path, out)?;
                }
            }
        }
        Ok(())
    }
}

/// One flattened region of a [`SearchSpace`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchLeaf {
    pub fixed: BTreeMap<String, String>,
    pub ranges: Vec<(String, ParamRange)>,
}

impl SearchLeaf {
    pub fn dimension(&self) -> usize {
        self.ranges.len()
    }

    /// Parameter set for a numeric point of this leaf.
    pub fn params(&self, point: &[f64]) -> ParamSet {
        let mut out: ParamSet = self
            .fixed
            .iter()
            .map(|(k, v)| (k.clone(), ParamValue::Choice(v.clone())))
            .collect();
        for ((name, range), v) in self.ranges.iter().zip(point) {
            out.insert(name.clone(), ParamValue::Number(range.snap(*v)));
        }
        out
    }

    pub fn label(&self) -> String {
        if self.fixed.is_empty() {
            return "*".to_string();
        }
        self.fixed
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

type ConstraintFn = dyn Fn(&ParamSet) -> bool + Send + Sync;

/// Named feasibility predicate over a candidate parameter set.
#[derive(Clone)]
pub struct Constraint {
    name: String,
    check: Arc<ConstraintFn>,
}

impl Constraint {
    pub fn new(name: impl Into<String>, check: impl Fn(&ParamSet) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// `lhs < rhs`; satisfied when either key is missing or non-numeric.
    pub fn less_than(lhs: &str, rhs: &str) -> Self {
        let (l, r) = (lhs.to_string(), rhs.to_string());
        Self::new(format!("{} < {}", lhs, rhs), move |p: &ParamSet| {
            match (
                p.get(&l).and_then(ParamValue::as_f64),
                p.get(&r).and_then(ParamValue::as_f64),
            ) {
                (Some(a), Some(b)) => a < b,
                _ => true,
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_satisfied(&self, params: &ParamSet) -> bool {
        (self.check)(params)
    }
}

impl std::fmt::Debug for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constraint").field("name", &self.name).finish()
    }
}
