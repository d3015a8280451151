use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{OpsError, Result};
use crate::math::simplex_proj;
use crate::model::observation::Observation;
use crate::model::params::{apply_params, lenient, require_range, ParamSet, StrategyConfig};
use crate::model::portfolio::portfolio_vector;
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

const MAX_LAMBDA: f64 = 1e7;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CwmrConfig {
    /// Mean reversion threshold on the log expected return.
    pub eps: f64,
    pub confidence: f64,
    /// First-order approximation instead of the exact update.
    #[serde(deserialize_with = "lenient::flag")]
    pub var: bool,
    #[serde(deserialize_with = "lenient::flag")]
    pub rebalance: bool,
}

impl Default for CwmrConfig {
    fn default() -> Self {
        Self {
            eps: -0.5,
            confidence: 0.95,
            var: false,
            rebalance: true,
        }
    }
}

impl StrategyConfig for CwmrConfig {
    const REQUIRED: &'static [&'static str] = &["eps", "confidence"];

    fn validate(&self) -> Result<()> {
        require_range("confidence", self.confidence, 0.0, 1.0)
    }
}

impl CwmrConfig {
    /// Standard-normal quantile of the confidence level.
    pub fn theta(&self) -> Result<f64> {
        let normal = Normal::new(0.0, 1.0).map_err(|e| OpsError::Numerical(e.to_string()))?;
        Ok(normal.inverse_cdf(self.confidence.clamp(1e-9, 1.0 - 1e-9)))
    }
}

/// Covariance of the portfolio distribution.
#[derive(Debug, Clone)]
pub struct CwmrState {
    pub sigma: DMatrix<f64>,
}

impl CwmrState {
    pub fn new(n: usize) -> Self {
        let n2 = (n * n).max(1) as f64;
        Self {
            sigma: DMatrix::identity(n, n) / n2,
        }
    }
}

/// Largest non-negative real root of `a λ² + b λ + c`, 0 if there is none.
/// A vanishing `a` leaves the linear equation `b λ + c = 0`.
fn largest_root(a: f64, b: f64, c: f64) -> f64 {
    if a.abs() < f64::EPSILON {
        let root = -c / b;
        return if b != 0.0 && root.is_finite() { root.max(0.0) } else { 0.0 };
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return 0.0;
    }
    let sq = disc.sqrt();
    [(-b + sq) / (2.0 * a), (-b - sq) / (2.0 * a)]
        .into_iter()
        .filter(|r| r.is_finite())
        .fold(0.0, f64::max)
}

/// Confidence weighted mean reversion (Li, Hoi, Zhao, Gopalkrishnan 2013).
#[derive(Debug, Clone, Default)]
pub struct Cwmr {
    config: CwmrConfig,
    model: Option<CwmrState>,
    state: AgentState,
}

impl Cwmr {
    pub fn new(config: CwmrConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn model(&self) -> Option<&CwmrState> {
        self.model.as_ref()
    }

    fn update(&mut self, b: &[f64], x: &[f64]) -> Result<Vec<f64>> {
        let n = x.len();
        let theta = self.config.theta()?;
        let eps = self.config.eps;
        let var = self.config.var;
        let model = self.model.get_or_insert_with(|| CwmrState::new(n));
        if model.sigma.nrows() != n {
            *model = CwmrState::new(n);
        }
        let sigma = &model.sigma;

        let mu = DVector::from_column_slice(b);
        let xv = DVector::from_column_slice(x);
        let m = mu.dot(&xv);
        let v = xv.dot(&(sigma * &xv));
        let trace = sigma.trace();
        let x_upper = sigma.diagonal().dot(&xv) / trace;
        let row_sums = DVector::from_iterator(n, sigma.row_iter().map(|r| r.sum()));

        let lam = if m <= 1e-12 {
            0.0
        } else {
            let shift = (v - x_upper * xv.dot(&row_sums)) / (m * m);
            let gap = eps - m.ln();
            let root = if var {
                let a = 2.0 * theta * v * shift;
                let bq = shift + 2.0 * theta * v * gap;
                let c = gap - theta * v;
                largest_root(a, bq, c)
            } else {
                let foo = shift + v * theta.powi(2) / 2.0;
                let a = foo * foo - v * v * theta.powi(4) / 4.0;
                let bq = 2.0 * gap * foo;
                let c = gap * gap - v * theta * theta;
                largest_root(a, bq, c)
            };
            root.min(MAX_LAMBDA)
        };

        let centered = xv.add_scalar(-x_upper);
        let step = if m.abs() > 1e-12 { (sigma * centered) * (lam / m) } else { DVector::zeros(n) };
        let mu = mu - step;

        let scale = if var {
            2.0 * lam * theta
        } else {
            let u = 0.5 * (-lam * theta * v + (lam * lam * theta * theta * v * v + 4.0 * v).sqrt());
            if u.abs() > 1e-16 { theta * lam / u } else { 0.0 }
        };
        let x_sq = DMatrix::from_diagonal(&xv.map(|xi| xi * xi));
        let next_sigma = sigma
            .clone()
            .try_inverse()
            .map(|inv| inv + x_sq * scale)
            .and_then(|a| a.try_inverse())
            .filter(|a| a.iter().all(|v| v.is_finite()));
        let mut sigma = match next_sigma {
            Some(s) => s,
            None => {
                tracing::debug!(strategy = "CWMR", "covariance update badly scaled, keeping previous");
                model.sigma.clone()
            }
        };

        let trace = sigma.trace();
        if trace.abs() > 1e-300 && trace.is_finite() {
            sigma /= (n * n) as f64 * trace;
        }
        model.sigma = sigma;

        Ok(simplex_proj(mu.as_slice()))
    }
}

impl Strategy for Cwmr {
    fn name(&self) -> &str {
        "CWMR"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        obs.last_price_relative(false)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            self.model = Some(CwmrState::new(obs.n_assets()));
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 2) {
            return Ok(fallback);
        }
        let back = if self.config.rebalance { 1 } else { 0 };
        let prev = portfolio_vector(obs, back)?;
        let x = self.predict(obs)?;
        self.update(&prev, &x)
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
    fn theta_matches_normal_quantile() {
        let cfg = CwmrConfig::default();
        let theta = cfg.theta().unwrap();
        assert!((theta - 1.6448536).abs() < 1e-5);
    }

    #[test]
    fn largest_root_ignores_negative_roots() {
        // (λ - 2)(λ + 3) = λ² + λ - 6
        assert!((largest_root(1.0, 1.0, -6.0) - 2.0).abs() < 1e-12);
        assert_eq!(largest_root(1.0, 5.0, 6.0), 0.0);
        assert_eq!(largest_root(1.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn degenerate_quadratic_solves_the_linear_part() {
        // 2λ - 3 = 0
        assert!((largest_root(0.0, 2.0, -3.0) - 1.5).abs() < 1e-12);
        assert!((largest_root(1e-18, 2.0, -3.0) - 1.5).abs() < 1e-12);
        // root at -1.5 is clamped, no root at all is 0
        assert_eq!(largest_root(0.0, 2.0, 3.0), 0.0);
        assert_eq!(largest_root(0.0, 0.0, 3.0), 0.0);
    }

    #[test]
    fn covariance_stays_normalised() {
        let mut cwmr = Cwmr::default();
        cwmr.model = Some(CwmrState::new(3));
        let out = cwmr.update(&[0.4, 0.4, 0.2], &[1.05, 0.95, 1.0]).unwrap();
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        let sigma = &cwmr.model().unwrap().sigma;
        assert!((sigma.trace() - 1.0 / 9.0).abs() < 1e-9);
    }
}
