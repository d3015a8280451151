use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::{dot, mean, norm2, safe_div, simplex_proj};
use crate::model::observation::Observation;
use crate::model::params::{apply_params, require_range, ParamSet, StrategyConfig};
use crate::model::portfolio::portfolio_vector;
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

const MAX_LAMBDA: f64 = 1e5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PamrVariant {
    #[serde(rename = "PAMR0")]
    Pamr0,
    #[serde(rename = "PAMR1")]
    Pamr1,
    #[serde(rename = "PAMR2")]
    Pamr2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PamrConfig {
    /// Insensitive margin of the loss `max(0, b·x - eps)`.
    pub eps: f64,
    /// Aggressiveness of the PAMR1 and PAMR2 variants.
    #[serde(rename = "C")]
    pub c: f64,
    pub variant: PamrVariant,
}

impl Default for PamrConfig {
    fn default() -> Self {
        Self {
            eps: 0.03,
            c: 2444.0,
            variant: PamrVariant::Pamr1,
        }
    }
}

impl StrategyConfig for PamrConfig {
    const REQUIRED: &'static [&'static str] = &["eps", "variant"];

    fn validate(&self) -> Result<()> {
        require_range("C", self.c, f64::MIN_POSITIVE, f64::MAX)
    }
}

/// Passive aggressive mean reversion (Li, Zhao, Hoi, Gopalkrishnan 2012).
#[derive(Debug, Clone, Default)]
pub struct Pamr {
    config: PamrConfig,
    state: AgentState,
}

impl Pamr {
    pub fn new(config: PamrConfig) -> Self {
        Self {
            config,
            state: AgentState::default(),
        }
    }

    pub fn update(&self, b: &[f64], x: &[f64]) -> Vec<f64> {
        let cfg = &self.config;
        let x_mean = mean(x);
        let loss = (dot(b, x) - cfg.eps).max(0.0);
        let dev_sq = norm2(&x.iter().map(|v| v - x_mean).collect::<Vec<_>>()).powi(2);

        let lam = match cfg.variant {
            PamrVariant::Pamr0 => safe_div(loss, dev_sq),
            PamrVariant::Pamr1 => cfg.c.min(safe_div(loss, dev_sq)),
            PamrVariant::Pamr2 => safe_div(loss, dev_sq + 0.5 / cfg.c),
        }
        .min(MAX_LAMBDA);

        let next: Vec<f64> = b.iter().zip(x).map(|(bi, xi)| bi + lam * (xi - x_mean)).collect();
        simplex_proj(&next)
    }
}

impl Strategy for Pamr {
    fn name(&self) -> &str {
        "PAMR"
    }

    /// Inverse price relative `p[-2] / p[-1]`, fiat 1.
    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        obs.last_price_relative(true)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 2) {
            return Ok(fallback);
        }
        let prev = portfolio_vector(obs, 1)?;
        let x = self.predict(obs)?;
        Ok(self.update(&prev, &x))
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
