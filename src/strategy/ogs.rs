use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::{blend, dot, safe_div, simplex_proj, uniform};
use crate::model::observation::Observation;
use crate::model::params::{apply_params, lenient, require_range, ParamSet, StrategyConfig};
use crate::model::portfolio::portfolio_vector;
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OgsConfig {
    pub lr: f64,
    pub eta: f64,
    /// Forgetting factor of the squared-gradient accumulator.
    pub damping: f64,
    pub clip_grads: f64,
    #[serde(deserialize_with = "lenient::flag")]
    pub mr: bool,
}

impl Default for OgsConfig {
    fn default() -> Self {
        Self {
            lr: 1.0,
            eta: 0.0,
            damping: 0.99,
            clip_grads: 1e6,
            mr: false,
        }
    }
}

impl StrategyConfig for OgsConfig {
    fn validate(&self) -> Result<()> {
        require_range("lr", self.lr, 0.0, f64::MAX)?;
        require_range("eta", self.eta, 0.0, 1.0)?;
        require_range("damping", self.damping, 0.0, 1.0)?;
        require_range("clip_grads", self.clip_grads, 0.0, f64::MAX)
    }
}

/// Per-asset AdaGrad accumulator, started at ones.
#[derive(Debug, Clone)]
pub struct AdaGradState {
    pub gti: Vec<f64>,
}

impl AdaGradState {
    pub fn new(n: usize) -> Self {
        Self { gti: vec![1.0; n] }
    }
}

/// Online gradient step with an AdaGrad learning rate.
#[derive(Debug, Clone, Default)]
pub struct Ogs {
    config: OgsConfig,
    model: Option<AdaGradState>,
    state: AgentState,
}

impl Ogs {
    pub fn new(config: OgsConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn model(&self) -> Option<&AdaGradState> {
        self.model.as_ref()
    }

    fn update(&mut self, b: &[f64], x: &[f64]) -> Vec<f64> {
        let cfg = &self.config;
        let n = x.len();
        let model = self.model.get_or_insert_with(|| AdaGradState::new(n));
        if model.gti.len() != n {
            *model = AdaGradState::new(n);
        }

        let bx = dot(b, x);
        let mut next = b.to_vec();
        for i in 0..n {
            let grad = safe_div(x[i], bx).clamp(-cfg.clip_grads, cfg.clip_grads) - 1.0;
            model.gti[i] = (model.gti[i] * cfg.damping + grad * grad).clamp(0.0, 1e8);
            next[i] += cfg.lr * safe_div(grad, model.gti[i]);
        }
        blend(&simplex_proj(&next), &uniform(n), cfg.eta)
    }
}

impl Strategy for Ogs {
    fn name(&self) -> &str {
        "OGS"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        obs.last_price_relative(self.config.mr)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            self.model = Some(AdaGradState::new(obs.n_assets()));
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 2) {
            return Ok(fallback);
        }
        let b = portfolio_vector(obs, 0)?;
        let x = self.predict(obs)?;
        Ok(self.update(&b, &x))
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<()> {
        self.config = apply_params(&self.config, params)?;
        Ok(())
    }

    fn check_params(&self, params: &ParamSet) -> Result<()> {
        apply_params(&self.config, params).map(|_| ())
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adagrad_step_moves_toward_the_winner() {
        let mut ogs = Ogs::default();
        let out = ogs.update(&[0.5, 0.5], &[1.2, 1.0]);

        // grad = x / (b·x) - 1 = ±1/11; gti = 0.99 + grad²
        let gti = 0.99 + (1.0f64 / 11.0).powi(2);
        assert!((ogs.model().unwrap().gti[0] - gti).abs() < 1e-12);
        assert!((out[0] - (0.5 + (1.0 / 11.0) / gti)).abs() < 1e-12);
        assert!((out[1] - (0.5 - (1.0 / 11.0) / gti)).abs() < 1e-12);
    }

    #[test]
    fn oversized_step_is_projected_back() {
        let mut ogs = Ogs::new(OgsConfig {
            lr: 10.0,
            ..OgsConfig::default()
        });
        let out = ogs.update(&[0.5, 0.5], &[1.2, 1.0]);
        assert!((out[0] - 1.0).abs() < 1e-12);
        assert!(out[1].abs() < 1e-12);
    }

    #[test]
    fn accumulator_restarts_on_new_asset_count() {
        let mut ogs = Ogs::default();
        ogs.update(&[0.5, 0.5], &[1.2, 1.0]);
        let out = ogs.update(&[0.2, 0.3, 0.5], &[1.0, 1.0, 1.0]);
        assert_eq!(ogs.model().unwrap().gti.len(), 3);
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}
