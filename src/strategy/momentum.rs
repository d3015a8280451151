use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::indicator::moving_average::MeanType;
use crate::math::{array_normalize, dot, mean, norm2, safe_div, simplex_proj};
use crate::model::observation::Observation;
use crate::model::params::{apply_params, lenient, require_span, ParamSet, StrategyConfig};
use crate::model::portfolio::portfolio_vector;
use crate::strategy::{argmax_deviation, initial_allocation, short_window, AgentState, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MomentumConfig {
    /// Weight of the moving-average spread.
    pub alpha_v: f64,
    /// Weight of the spread's first difference, relative to `alpha_v`.
    pub alpha_a: f64,
    pub mean_type: MeanType,
    #[serde(deserialize_with = "lenient::usize")]
    pub ma1: usize,
    #[serde(deserialize_with = "lenient::usize")]
    pub ma2: usize,
    /// Accepted for compatibility with saved parameter sets; unused.
    #[serde(deserialize_with = "lenient::usize")]
    pub std_span: usize,
    pub sensitivity: f64,
    /// Update from the second-to-last held portfolio instead of the last.
    #[serde(deserialize_with = "lenient::flag")]
    pub rebalance: bool,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            alpha_v: 1.0,
            alpha_a: 1.0,
            mean_type: MeanType::Kama,
            ma1: 2,
            ma2: 3,
            std_span: 3,
            sensitivity: 0.1,
            rebalance: true,
        }
    }
}

impl StrategyConfig for MomentumConfig {
    const REQUIRED: &'static [&'static str] =
        &["alpha_v", "alpha_a", "mean_type", "ma1", "ma2", "std_span"];

    fn validate(&self) -> Result<()> {
        require_span("ma1", self.ma1, 2)?;
        require_span("ma2", self.ma2, 2)?;
        require_span("std_span", self.std_span, 2)
    }
}

/// Trend follower on the spread between two moving averages.
#[derive(Debug, Clone, Default)]
pub struct Momentum {
    config: MomentumConfig,
    state: AgentState,
}

impl Momentum {
    pub fn new(config: MomentumConfig) -> Self {
        Self {
            config,
            state: AgentState::default(),
        }
    }

    pub fn config(&self) -> &MomentumConfig {
        &self.config
    }

    /// Rows needed for two consecutive values of the slower average.
    fn lookback(&self) -> usize {
        self.config.ma1.max(self.config.ma2) + 2
    }

    fn factor(&self, series: &[f64]) -> f64 {
        let cfg = &self.config;
        let fast = cfg.mean_type.series(series, cfg.ma1);
        let slow = cfg.mean_type.series(series, cfg.ma2);
        let spread = |i: usize| match (fast[i], slow[i]) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        };
        let n = series.len();
        match (spread(n - 1), spread(n - 2)) {
            (Some(p), Some(prev)) => cfg.alpha_v * (p + cfg.alpha_a * (p - prev)),
            _ => 0.0,
        }
    }

    fn update(&self, b: &[f64], x: &[f64]) -> Vec<f64> {
        let x_mean = mean(x);
        let dev: Vec<f64> = x.iter().map(|v| v - x_mean).collect();
        let change = ((dot(b, x) + x[argmax_deviation(x, x_mean)]) / 2.0).abs();
        let lam = safe_div(change - self.config.sensitivity, norm2(&dev))
            .powi(2)
            .clamp(0.0, 1e6);
        let next: Vec<f64> = b.iter().zip(&dev).map(|(bi, d)| bi + lam * d).collect();
        simplex_proj(&next)
    }
}

impl Strategy for Momentum {
    fn name(&self) -> &str {
        "Momentum"
    }

    /// L1-normalised trend factor per asset, fiat 0.
    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        let lookback = self.lookback();
        let mut factor = Vec::with_capacity(obs.n_assets());
        for asset in 0..obs.n_risky() {
            let series = obs.open_tail(asset, lookback)?;
            factor.push(self.factor(&series));
        }
        factor.push(0.0);
        Ok(array_normalize(&factor))
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, self.lookback()) {
            return Ok(fallback);
        }
        let back = if self.config.rebalance { 1 } else { 0 };
        let prev = portfolio_vector(obs, back)?;
        let factor = self.predict(obs)?;
        Ok(self.update(&prev, &factor))
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
