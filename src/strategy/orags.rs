use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::indicator::tsf::tsf;
use crate::math::{
    array_normalize, dot, mean, norm2, safe_div, variance, ConstrainedMinimizer, SolveStatus,
};
use crate::model::observation::Observation;
use crate::model::params::{
    apply_params, lenient, require_range, require_span, ParamSet, StrategyConfig,
};
use crate::strategy::eri::{polar_returns, risk_index, tail_index};
use crate::strategy::ogs::AdaGradState;
use crate::strategy::{held_or_initial, initial_allocation, short_window, AgentState, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OragsConfig {
    #[serde(deserialize_with = "lenient::usize")]
    pub window: usize,
    pub k: f64,
    pub lr: f64,
    pub damping: f64,
    pub mpc: f64,
    /// Upper end (exclusive) of the base periods of the regression forecast.
    #[serde(deserialize_with = "lenient::usize")]
    pub period: usize,
}

impl Default for OragsConfig {
    fn default() -> Self {
        Self {
            window: 300,
            k: 0.1,
            lr: 0.1,
            damping: 0.99,
            mpc: 1.0,
            period: 8,
        }
    }
}

impl StrategyConfig for OragsConfig {
    fn validate(&self) -> Result<()> {
        require_span("window", self.window, 2)?;
        require_span("period", self.period, 4)?;
        require_range("k", self.k, 0.0, 1.0)?;
        require_range("lr", self.lr, 0.0, f64::MAX)?;
        require_range("damping", self.damping, 0.0, 1.0)?;
        require_range("mpc", self.mpc, f64::MIN_POSITIVE, f64::MAX)
    }
}

impl OragsConfig {
    /// Regression lengths `⌊p·√2⌋` for `p` in `3..period`.
    pub fn regression_periods(&self) -> Vec<usize> {
        (3..self.period)
            .map(|p| (p as f64 * std::f64::consts::SQRT_2) as usize)
            .collect()
    }
}

/// Online risk averse gradient step: an AdaGrad move on a regression
/// forecast of the price relatives, then an extreme-risk-index minimisation
/// started from the moved portfolio.
#[derive(Debug, Clone, Default)]
pub struct Orags {
    config: OragsConfig,
    model: Option<AdaGradState>,
    seed: Option<Vec<f64>>,
    state: AgentState,
}

impl Orags {
    pub fn new(config: OragsConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn adagrad_step(&mut self, b: &[f64], x: &[f64]) -> Vec<f64> {
        let cfg = &self.config;
        let n = x.len();
        let model = self.model.get_or_insert_with(|| AdaGradState::new(n));
        if model.gti.len() != n {
            *model = AdaGradState::new(n);
        }

        let bx = dot(b, x);
        let grad: Vec<f64> = x
            .iter()
            .map(|xi| safe_div(*xi, bx).clamp(-1e6, 1e6) - 1.0)
            .collect();
        for (g, gi) in model.gti.iter_mut().zip(&grad) {
            *g = (*g * cfg.damping + gi * gi).clamp(1.0, 1e6);
        }

        let gti_sum: f64 = model.gti.iter().sum();
        let moved = b
            .iter()
            .zip(&grad)
            .zip(&model.gti)
            .map(|((bi, gi), ti)| bi - bi * safe_div(*gi, *ti) * cfg.lr)
            .collect();

        let log = &mut self.state.log;
        log.insert("g".to_string(), format!("{:.4}", grad.iter().sum::<f64>()));
        log.insert("gti".to_string(), format!("{:.4}", gti_sum));
        moved
    }

    fn risk_step(&self, obs: &Observation, start: &[f64], x: &[f64]) -> Result<Vec<f64>> {
        let cfg = &self.config;
        let polar = polar_returns(obs, cfg.window, cfg.k)?;
        let alpha = tail_index(&polar.radius);
        let drift = (mean(x) * variance(x)).powi(2);

        let mpc = cfg.mpc;
        let result = ConstrainedMinimizer::new(|w: &[f64]| {
            risk_index(w, alpha, &polar.angle) + w[w.len() - 1] * drift
        })
        .with_ineq(move |w: &[f64]| mpc - norm2(&w[..w.len() - 1]))
        .minimize(start);
        if result.status != SolveStatus::Optimal {
            tracing::warn!(
                strategy = "ORAGS",
                violation = result.violation,
                "risk index minimisation stopped before convergence"
            );
        }

        let clipped: Vec<f64> = result.x.iter().map(|v| v.clamp(0.0, 1.0)).collect();
        Ok(array_normalize(&clipped))
    }
}

impl Strategy for Orags {
    fn name(&self) -> &str {
        "ORAGS"
    }

    /// Mean time-series forecast of each asset's price relative, fiat 1.
    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        let relatives = obs.price_relatives();
        let periods = self.config.regression_periods();
        let mut x = Vec::with_capacity(obs.n_assets());
        for asset in 0..obs.n_risky() {
            let series: Vec<f64> = relatives.iter().map(|r| r[asset]).collect();
            let forecasts: Vec<f64> = periods.iter().filter_map(|p| tsf(&series, *p)).collect();
            x.push(if forecasts.is_empty() { 1.0 } else { mean(&forecasts) });
        }
        x.push(1.0);
        Ok(x)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        let seed = self.seed.take();
        if self.state.advance() == 0 {
            self.model = Some(AdaGradState::new(obs.n_assets()));
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 3) {
            return Ok(fallback);
        }
        let b = match seed {
            Some(s) if s.len() == obs.n_assets() => s,
            _ => held_or_initial(obs, 0)?,
        };
        let x = self.predict(obs)?;
        let moved = self.adagrad_step(&b, &x);
        self.risk_step(obs, &moved, &x)
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

    fn seed_portfolio(&mut self, portfolio: &[f64]) {
        self.seed = Some(portfolio.to_vec());
    }
}
