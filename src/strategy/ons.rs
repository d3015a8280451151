use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{OpsError, Result};
use crate::math::qp::{solve_qp, QpDomain, QpOptions, QpProblem, SolveStatus};
use crate::math::{dot, safe_div};
use crate::model::observation::Observation;
use crate::model::params::{apply_params, lenient, require_range, ParamSet, StrategyConfig};
use crate::model::portfolio::portfolio_vector;
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnsConfig {
    pub delta: f64,
    pub beta: f64,
    /// Mixing weight of the uniform portfolio.
    pub eta: f64,
    pub clip_grads: f64,
    /// Learn from inverse price relatives.
    #[serde(deserialize_with = "lenient::flag")]
    pub mr: bool,
}

impl Default for OnsConfig {
    fn default() -> Self {
        Self {
            delta: 0.125,
            beta: 1.0,
            eta: 0.0,
            clip_grads: 1e6,
            mr: false,
        }
    }
}

impl StrategyConfig for OnsConfig {
    const REQUIRED: &'static [&'static str] = &["delta", "beta", "eta"];

    fn validate(&self) -> Result<()> {
        require_range("eta", self.eta, 0.0, 1.0)?;
        require_range("delta", self.delta, 0.0, f64::MAX)?;
        require_range("beta", self.beta, 0.0, f64::MAX)?;
        require_range("clip_grads", self.clip_grads, 0.0, f64::MAX)
    }
}

/// Running Newton-step accumulators, built at step 0.
#[derive(Debug, Clone)]
pub struct OnsState {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
}

impl OnsState {
    fn new(n: usize) -> Self {
        Self {
            a: DMatrix::identity(n, n),
            b: DVector::zeros(n),
        }
    }
}

/// Online Newton Step (Agarwal, Hazan, Kale, Schapire 2006).
#[derive(Debug, Clone, Default)]
pub struct Ons {
    config: OnsConfig,
    qp: QpOptions,
    model: Option<OnsState>,
    state: AgentState,
}

impl Ons {
    pub fn new(config: OnsConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_solver(mut self, qp: QpOptions) -> Self {
        self.qp = qp;
        self
    }

    pub fn model(&self) -> Option<&OnsState> {
        self.model.as_ref()
    }

    /// Projection of `y` onto the simplex in the norm induced by `m`.
    fn projection_in_norm(&self, y: &DVector<f64>, m: &DMatrix<f64>) -> Result<DVector<f64>> {
        let p = m * 2.0;
        let q = -(m * y) * 2.0;
        let problem = QpProblem::new(p, q, QpDomain::Simplex);
        let sol = solve_qp(&problem, &self.qp)?;
        if sol.status != SolveStatus::Optimal {
            tracing::warn!(
                strategy = "ONS",
                violation = sol.violation,
                "projection in norm did not reach optimality"
            );
        }
        Ok(sol.x)
    }

    fn update(&mut self, b: &[f64], x: &[f64]) -> Result<Vec<f64>> {
        let n = x.len();
        let model = self.model.get_or_insert_with(|| OnsState::new(n));
        if model.b.len() != n {
            return Err(OpsError::Shape(format!(
                "ONS state has {} assets, window has {}",
                model.b.len(),
                n
            )));
        }

        let bx = dot(b, x);
        let clip = self.config.clip_grads;
        let grad = DVector::from_iterator(n, x.iter().map(|xi| safe_div(*xi, bx).clamp(-clip, clip)));
        model.a += &grad * grad.transpose();
        model.b += (1.0 + safe_div(1.0, self.config.beta)) * &grad;

        let a = model.a.clone();
        let direction = a
            .clone()
            .cholesky()
            .map(|c| c.solve(&model.b))
            .ok_or_else(|| OpsError::Numerical("ONS accumulator is not positive definite".to_string()))?;
        let y = direction * self.config.delta;

        let p = self.projection_in_norm(&y, &a)?;
        let eta = self.config.eta;
        Ok(p.iter().map(|pi| pi * (1.0 - eta) + eta / n as f64).collect())
    }
}

impl Strategy for Ons {
    fn name(&self) -> &str {
        "ONS"
    }

    /// Last price relative (inverse when `mr`), fiat 1.
    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        obs.last_price_relative(self.config.mr)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            self.model = Some(OnsState::new(obs.n_assets()));
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 2) {
            return Ok(fallback);
        }
        let b = portfolio_vector(obs, 0)?;
        let x = self.predict(obs)?;
        self.update(&b, &x)
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
    fn newton_step_projects_in_accumulator_norm() {
        let mut ons = Ons::default();
        let out = ons.update(&[0.5, 0.5], &[1.2, 1.0]).unwrap();

        // grad = x / (b·x) = (12/11, 10/11); A = I + grad gradᵀ, b = 2 grad
        let model = ons.model().unwrap();
        let g0 = 1.2 / 1.1;
        assert!((model.a[(0, 0)] - (1.0 + g0 * g0)).abs() < 1e-12);
        assert!((model.b[0] - 2.0 * g0).abs() < 1e-12);

        // minimiser of (p - y)ᵀ A (p - y) over the simplex, y = δ A⁻¹ b
        assert!((out[0] - 0.432927).abs() < 1e-4, "{:?}", out);
        assert!((out[1] - 0.567073).abs() < 1e-4, "{:?}", out);
    }

    #[test]
    fn eta_mixes_in_the_uniform_portfolio() {
        let mut plain = Ons::default();
        let mut mixed = Ons::new(OnsConfig {
            eta: 0.5,
            ..OnsConfig::default()
        });
        let p = plain.update(&[0.5, 0.5], &[1.2, 1.0]).unwrap();
        let q = mixed.update(&[0.5, 0.5], &[1.2, 1.0]).unwrap();
        for (pi, qi) in p.iter().zip(&q) {
            assert!((qi - (0.5 * pi + 0.25)).abs() < 1e-6);
        }
    }

    #[test]
    fn asset_count_change_is_a_shape_error() {
        let mut ons = Ons::default();
        ons.update(&[0.5, 0.5], &[1.2, 1.0]).unwrap();
        let err = ons.update(&[0.3, 0.3, 0.4], &[1.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, OpsError::Shape(_)));
    }
}
