use crate::error::{OpsError, Result};
use crate::math::{array_normalize, simplex_proj};
use crate::model::observation::Observation;
use crate::model::params::{split_indexed, ParamSet};
use crate::strategy::olmar::Olmar;
use crate::strategy::pamr::Pamr;
use crate::strategy::{AgentState, Strategy};

/// Weighted average of several strategies, projected onto the simplex.
///
/// Parameters `w_<i>` set the weight of sub-strategy `i`; any other
/// `<key>_<i>` is forwarded to sub-strategy `i` as `<key>`.
pub struct LinearMixture {
    strategies: Vec<Box<dyn Strategy>>,
    weights: Vec<f64>,
    state: AgentState,
}

impl Default for LinearMixture {
    fn default() -> Self {
        Self::new(vec![Box::new(Pamr::default()), Box::new(Olmar::default())])
    }
}

impl LinearMixture {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        let weights = vec![1.0; strategies.len()];
        Self {
            strategies,
            weights,
            state: AgentState::default(),
        }
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.strategies.len() {
            return Err(OpsError::Config(format!(
                "{} weights for {} strategies",
                weights.len(),
                self.strategies.len()
            )));
        }
        self.weights = weights;
        Ok(self)
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn mix(&self, outputs: &[Vec<f64>]) -> Vec<f64> {
        let weights = array_normalize(&self.weights);
        let n = outputs.first().map_or(0, Vec::len);
        let mut out = vec![0.0; n];
        for (w, v) in weights.iter().zip(outputs) {
            for (o, vi) in out.iter_mut().zip(v) {
                *o += w * vi;
            }
        }
        out
    }

    /// Mixture weights after `params`, and the keys forwarded to each
    /// sub-strategy.
    fn split_params(&self, params: &ParamSet) -> Result<(Vec<f64>, Vec<ParamSet>)> {
        let mut weights = self.weights.clone();
        let mut forwarded: Vec<ParamSet> = vec![ParamSet::new(); self.strategies.len()];

        for (key, value) in params {
            let (name, idx) = split_indexed(key)
                .ok_or_else(|| OpsError::Config(format!("unknown key `{}`", key)))?;
            if idx >= self.strategies.len() {
                return Err(OpsError::Config(format!(
                    "`{}` addresses strategy {} of {}",
                    key,
                    idx,
                    self.strategies.len()
                )));
            }
            if name == "w" {
                let w = value
                    .as_f64()
                    .filter(|w| w.is_finite() && *w >= 0.0)
                    .ok_or_else(|| {
                        OpsError::Config(format!("`{}` must be a non-negative number", key))
                    })?;
                weights[idx] = w;
            } else {
                forwarded[idx].insert(name.to_string(), value.clone());
            }
        }
        Ok((weights, forwarded))
    }

    fn copy_logs(&mut self) {
        let mut merged = Vec::new();
        for (i, s) in self.strategies.iter().enumerate() {
            for (k, v) in s.log() {
                merged.push((format!("{}.{}", i, k), v.clone()));
            }
        }
        self.state.log.extend(merged);
    }
}

impl Strategy for LinearMixture {
    fn name(&self) -> &str {
        "LinearMixture"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        let outputs = self
            .strategies
            .iter()
            .map(|s| s.predict(obs))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.mix(&outputs))
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        let step = self.state.advance();
        let mut outputs = Vec::with_capacity(self.strategies.len());
        for s in self.strategies.iter_mut() {
            s.set_step(step);
            outputs.push(s.rebalance(obs)?);
        }
        self.copy_logs();
        Ok(simplex_proj(&self.mix(&outputs)))
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<()> {
        self.check_params(params)?;
        let (weights, forwarded) = self.split_params(params)?;
        for (s, p) in self.strategies.iter_mut().zip(&forwarded) {
            if !p.is_empty() {
                s.set_params(p)?;
            }
        }
        self.weights = weights;
        Ok(())
    }

    fn check_params(&self, params: &ParamSet) -> Result<()> {
        let (_, forwarded) = self.split_params(params)?;
        for (s, p) in self.strategies.iter().zip(&forwarded) {
            if !p.is_empty() {
                s.check_params(p)?;
            }
        }
        Ok(())
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    fn reset(&mut self) {
        self.state.reset();
        for s in self.strategies.iter_mut() {
            s.reset();
        }
    }
}
