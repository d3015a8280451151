use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::indicator::moving_average::MeanType;
use crate::math::{blend, dot, equal_risky, mean, norm2, safe_div, simplex_proj};
use crate::model::observation::Observation;
use crate::model::params::{
    apply_params, lenient, require_keys, require_range, require_span, ParamSet, StrategyConfig,
};
use crate::model::portfolio::portfolio_vector;
use crate::strategy::{argmax_deviation, initial_allocation, short_window, AgentState, Strategy};

/// Source of the expected one-step return of each risky asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forecaster {
    /// `p[-2] / p[-1] - 1`.
    LastStep,
    /// `KAMA(window) / p[-1] - 1`.
    Adaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShortTermReversionConfig {
    pub eps: f64,
    /// Weight of the equal-risky portfolio blended into every output.
    pub eta: f64,
    #[serde(deserialize_with = "lenient::usize")]
    pub window: usize,
    #[serde(deserialize_with = "lenient::flag")]
    pub rebalance: bool,
}

impl Default for ShortTermReversionConfig {
    fn default() -> Self {
        Self {
            eps: 0.02,
            eta: 0.0,
            window: 3,
            rebalance: false,
        }
    }
}

impl StrategyConfig for ShortTermReversionConfig {
    fn validate(&self) -> Result<()> {
        require_range("eta", self.eta, 0.0, 1.0)?;
        require_span("window", self.window, 2)
    }
}

/// Passive-aggressive step toward the assets forecast to revert, shared by
/// STMR (last-step forecast) and KAMAMR (adaptive moving average forecast).
#[derive(Debug, Clone)]
pub struct ShortTermReversion {
    forecaster: Forecaster,
    config: ShortTermReversionConfig,
    state: AgentState,
}

impl ShortTermReversion {
    pub fn new(forecaster: Forecaster, config: ShortTermReversionConfig) -> Self {
        Self {
            forecaster,
            config,
            state: AgentState::default(),
        }
    }

    pub fn stmr() -> Self {
        Self::new(Forecaster::LastStep, ShortTermReversionConfig::default())
    }

    pub fn kamamr() -> Self {
        Self::new(
            Forecaster::Adaptive,
            ShortTermReversionConfig {
                rebalance: true,
                ..ShortTermReversionConfig::default()
            },
        )
    }

    pub fn forecaster(&self) -> Forecaster {
        self.forecaster
    }

    fn next_config(&self, params: &ParamSet) -> Result<ShortTermReversionConfig> {
        if self.forecaster == Forecaster::Adaptive {
            require_keys(params, &["eps", "window"])?;
        }
        apply_params(&self.config, params)
    }

    fn lookback(&self) -> usize {
        match self.forecaster {
            Forecaster::LastStep => 2,
            Forecaster::Adaptive => self.config.window + 1,
        }
    }

    fn update(&self, b: &[f64], x: &[f64]) -> Vec<f64> {
        let x_mean = mean(x);
        let dev: Vec<f64> = x.iter().map(|v| v - x_mean).collect();
        let change = ((dot(b, x) + x[argmax_deviation(x, x_mean)]) / 2.0).abs();
        let lam = safe_div(change - self.config.eps, norm2(&dev).powi(2)).clamp(0.0, 1e6);
        let next: Vec<f64> = b.iter().zip(&dev).map(|(bi, d)| bi + lam * d).collect();
        blend(&simplex_proj(&next), &equal_risky(b.len()), self.config.eta)
    }
}

impl Strategy for ShortTermReversion {
    fn name(&self) -> &str {
        match self.forecaster {
            Forecaster::LastStep => "STMR",
            Forecaster::Adaptive => "KAMAMR",
        }
    }

    /// Expected one-step return per risky asset, fiat 0.
    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        let last = obs.open_back(0)?;
        let mut x = Vec::with_capacity(obs.n_assets());
        match self.forecaster {
            Forecaster::LastStep => {
                let prev = obs.open_back(1)?;
                for (c, p) in last.iter().zip(prev) {
                    x.push(safe_div(*p, *c) - 1.0);
                }
            }
            Forecaster::Adaptive => {
                for (asset, c) in last.iter().enumerate() {
                    let kama = MeanType::Kama.last(&obs.open_series(asset), self.config.window);
                    x.push(kama.map_or(0.0, |k| safe_div(k, *c) - 1.0));
                }
            }
        }
        x.push(0.0);
        Ok(x)
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
        let x = self.predict(obs)?;
        Ok(self.update(&prev, &x))
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<()> {
        self.config = self.next_config(params)?;
        Ok(())
    }

    fn check_params(&self, params: &ParamSet) -> Result<()> {
        self.next_config(params).map(|_| ())
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
    use crate::error::OpsError;
    use crate::model::params::{param_set, ParamValue};

    #[test]
    fn step_follows_the_largest_deviation() {
        // b·x = 0.06, largest deviation 0.3: change 0.18, λ = 0.16 / 0.18
        let out = ShortTermReversion::stmr().update(&[0.5, 0.3, 0.2], &[0.3, -0.3, 0.0]);
        let lam = 0.16 / 0.18;
        let expected = [0.5 + 0.3 * lam, 0.3 - 0.3 * lam, 0.2];
        for (o, e) in out.iter().zip(expected) {
            assert!((o - e).abs() < 1e-9, "{:?}", out);
        }
    }

    #[test]
    fn eta_blends_toward_equal_risky() {
        let mut stmr = ShortTermReversion::stmr();
        stmr.config.eta = 0.5;
        let out = stmr.update(&[0.5, 0.3, 0.2], &[0.0, 0.0, 0.0]);
        // no move, then half-way to (0.5, 0.5, 0)
        let expected = [0.5, 0.4, 0.1];
        for (o, e) in out.iter().zip(expected) {
            assert!((o - e).abs() < 1e-9, "{:?}", out);
        }
    }

    #[test]
    fn last_step_forecast_is_the_inverse_move() {
        let obs = Observation::from_prices(
            vec!["A".to_string(), "B".to_string()],
            "USD",
            &[vec![10.0, 20.0], vec![5.0, 25.0]],
        )
        .unwrap();
        let x = ShortTermReversion::stmr().predict(&obs).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] + 0.2).abs() < 1e-12);
        assert_eq!(x[2], 0.0);
    }

    #[test]
    fn flat_prices_forecast_no_reversion() {
        let obs = Observation::from_prices(vec!["A".to_string()], "USD", &vec![vec![4.0]; 8]).unwrap();
        let x = ShortTermReversion::kamamr().predict(&obs).unwrap();
        assert!(x.iter().all(|v| v.abs() < 1e-12), "{:?}", x);
    }

    #[test]
    fn adaptive_variant_requires_window() {
        let params = param_set([("eps", ParamValue::Number(0.1))]);
        assert!(ShortTermReversion::stmr().set_params(&params).is_ok());
        let err = ShortTermReversion::kamamr().set_params(&params).unwrap_err();
        assert!(matches!(err, OpsError::Config(_)));
    }
}
