use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::simplex_proj;
use crate::model::observation::Observation;
use crate::model::params::{apply_params, lenient, require_range, ParamSet, StrategyConfig};
use crate::model::portfolio::portfolio_vector;
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiplicativeWeightsConfig {
    pub lr: f64,
    #[serde(deserialize_with = "lenient::flag")]
    pub mr: bool,
}

impl Default for MultiplicativeWeightsConfig {
    fn default() -> Self {
        Self { lr: 0.5, mr: false }
    }
}

impl StrategyConfig for MultiplicativeWeightsConfig {
    const REQUIRED: &'static [&'static str] = &["lr"];

    fn validate(&self) -> Result<()> {
        require_range("lr", self.lr, 0.0, f64::MAX)
    }
}

/// Linearised exponential-weights step: `b + lr * b * x`, projected.
pub fn mw_update(b: &[f64], x: &[f64], lr: f64) -> Vec<f64> {
    let next: Vec<f64> = b.iter().zip(x).map(|(bi, xi)| bi + lr * bi * xi).collect();
    simplex_proj(&next)
}

#[derive(Debug, Clone, Default)]
pub struct MultiplicativeWeights {
    config: MultiplicativeWeightsConfig,
    state: AgentState,
}

impl MultiplicativeWeights {
    pub fn new(config: MultiplicativeWeightsConfig) -> Self {
        Self {
            config,
            state: AgentState::default(),
        }
    }
}

impl Strategy for MultiplicativeWeights {
    fn name(&self) -> &str {
        "MultiplicativeWeights"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        obs.last_price_relative(self.config.mr)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 2) {
            return Ok(fallback);
        }
        let b = portfolio_vector(obs, 0)?;
        let x = self.predict(obs)?;
        Ok(mw_update(&b, &x, self.config.lr))
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
