use std::collections::BTreeMap;

use crate::error::{OpsError, Result};
use crate::math::array_normalize;
use crate::model::observation::Observation;
use crate::model::params::{split_indexed, ParamSet, ParamValue};
use crate::strategy::{initial_allocation, AgentState, Strategy};

/// Rebalances to the same risky allocation every step, fiat 0.
///
/// Weights are set per risky asset through `w_<index>` keys and normalised;
/// without any weights the allocation is equal across risky assets.
#[derive(Debug, Clone, Default)]
pub struct ConstantRebalance {
    weights: BTreeMap<usize, f64>,
    state: AgentState,
}

impl ConstantRebalance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: &[f64]) -> Self {
        Self {
            weights: weights.iter().copied().enumerate().collect(),
            state: AgentState::default(),
        }
    }

    fn allocation(&self, obs: &Observation) -> Result<Vec<f64>> {
        if self.weights.is_empty() {
            return Ok(initial_allocation(obs));
        }
        let n = obs.n_risky();
        if let Some((idx, _)) = self.weights.iter().find(|(i, _)| **i >= n) {
            return Err(OpsError::Shape(format!(
                "weight w_{} set but the window has {} risky assets",
                idx, n
            )));
        }
        let raw: Vec<f64> = (0..n)
            .map(|i| self.weights.get(&i).copied().unwrap_or(0.0))
            .collect();
        let mut out = array_normalize(&raw);
        out.push(0.0);
        Ok(out)
    }
}

/// Reads `w_<index>` keys into per-asset weights.
fn parse_weights(params: &ParamSet) -> Result<BTreeMap<usize, f64>> {
    let mut weights = BTreeMap::new();
    for (key, value) in params {
        let idx = match split_indexed(key) {
            Some(("w", idx)) => idx,
            _ => {
                return Err(OpsError::Config(format!(
                    "unknown key `{}`, expected w_<index>",
                    key
                )))
            }
        };
        let w = match value {
            ParamValue::Number(w) if w.is_finite() && *w >= 0.0 => *w,
            other => {
                return Err(OpsError::Config(format!(
                    "`{}` must be a non-negative number, got {}",
                    key, other
                )))
            }
        };
        weights.insert(idx, w);
    }
    Ok(weights)
}

impl Strategy for ConstantRebalance {
    fn name(&self) -> &str {
        "ConstantRebalance"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        self.allocation(obs)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        self.state.advance();
        self.allocation(obs)
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<()> {
        self.weights = parse_weights(params)?;
        Ok(())
    }

    fn check_params(&self, params: &ParamSet) -> Result<()> {
        parse_weights(params).map(|_| ())
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }
}
