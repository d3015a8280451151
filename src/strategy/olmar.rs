use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::{dot, mean, norm2, safe_div, simplex_proj};
use crate::model::observation::Observation;
use crate::model::params::{apply_params, lenient, require_span, ParamSet, StrategyConfig};
use crate::model::portfolio::portfolio_vector;
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OlmarConfig {
    #[serde(deserialize_with = "lenient::usize")]
    pub window: usize,
    pub eps: f64,
}

impl Default for OlmarConfig {
    fn default() -> Self {
        Self {
            window: 7,
            eps: 0.02,
        }
    }
}

impl StrategyConfig for OlmarConfig {
    const REQUIRED: &'static [&'static str] = &["eps", "window"];

    fn validate(&self) -> Result<()> {
        require_span("window", self.window, 2)
    }
}

/// Moving-average reversion forecast `mean(p[-w:]) / p[-1]` per risky asset,
/// fiat 1. Uses the whole window when it is shorter than `w`.
pub fn moving_average_relative(obs: &Observation, window: usize) -> Result<Vec<f64>> {
    let last = obs.open_back(0)?;
    let w = window.min(obs.len()).max(1);
    let mut x = Vec::with_capacity(obs.n_assets());
    for (asset, price) in last.iter().enumerate() {
        let tail = obs.open_tail(asset, w)?;
        x.push(safe_div(mean(&tail), *price));
    }
    x.push(1.0);
    Ok(x)
}

/// On-line moving average reversion (Li, Hoi 2012).
#[derive(Debug, Clone, Default)]
pub struct Olmar {
    config: OlmarConfig,
    state: AgentState,
}

impl Olmar {
    pub fn new(config: OlmarConfig) -> Self {
        Self {
            config,
            state: AgentState::default(),
        }
    }

    fn update(&self, b: &[f64], x: &[f64]) -> Vec<f64> {
        let x_mean = mean(x);
        let dev: Vec<f64> = x.iter().map(|v| v - x_mean).collect();
        let lam = safe_div(dot(b, x) - self.config.eps, norm2(&dev).powi(2))
            .max(0.0)
            .min(1e5);
        let next: Vec<f64> = b.iter().zip(&dev).map(|(bi, d)| bi + lam * d).collect();
        simplex_proj(&next)
    }
}

impl Strategy for Olmar {
    fn name(&self) -> &str {
        "OLMAR"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        moving_average_relative(obs, self.config.window)
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

#[cfg(test)]
mod tests {
    use super::*;

    fn olmar(eps: f64) -> Olmar {
        Olmar::new(OlmarConfig {
            eps,
            ..OlmarConfig::default()
        })
    }

    #[test]
    fn step_size_scales_with_excess_over_eps() {
        // b·x = 1.02, |x - x̄|² = 0.02, so λ = (1.02 - 1.0) / 0.02 = 1
        let out = olmar(1.0).update(&[0.5, 0.3, 0.2], &[1.1, 0.9, 1.0]);
        let expected = [0.6, 0.2, 0.2];
        for (o, e) in out.iter().zip(expected) {
            assert!((o - e).abs() < 1e-9, "{:?}", out);
        }
    }

    #[test]
    fn no_step_below_eps() {
        let b = [0.5, 0.3, 0.2];
        let out = olmar(2.0).update(&b, &[1.1, 0.9, 1.0]);
        for (o, e) in out.iter().zip(b) {
            assert!((o - e).abs() < 1e-12);
        }
    }

    #[test]
    fn large_step_lands_on_a_vertex() {
        let out = olmar(0.02).update(&[0.5, 0.3, 0.2], &[1.1, 0.9, 1.0]);
        assert!((out[0] - 1.0).abs() < 1e-12);
        assert!(out[1].abs() < 1e-12 && out[2].abs() < 1e-12);
    }

    #[test]
    fn moving_average_uses_the_last_rows() {
        let obs = Observation::from_prices(
            vec!["A".to_string()],
            "USD",
            &[vec![100.0], vec![2.0], vec![4.0], vec![6.0]],
        )
        .unwrap();
        let x = moving_average_relative(&obs, 3).unwrap();
        assert!((x[0] - 4.0 / 6.0).abs() < 1e-12);
        assert_eq!(x[1], 1.0);
        // longer than the window: every row
        let x = moving_average_relative(&obs, 10).unwrap();
        assert!((x[0] - 28.0 / 6.0).abs() < 1e-12);
    }
}
