//! Classical mean-variance allocations solved as small quadratic programs.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{OpsError, Result};
use crate::math::qp::{solve_qp, QpDomain, QpOptions, QpProblem, QpSolution, SolveStatus};
use crate::math::{array_normalize, covariance};
use crate::model::observation::Observation;
use crate::model::params::{apply_params, lenient, ParamSet, StrategyConfig};
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

/// Ridge added to the sample covariance diagonal.
const RIDGE: f64 = 1e-10;

/// Covariance and mean of single-step returns over the last `window` steps
/// (`0` uses the whole observation).
#[derive(Debug, Clone)]
pub struct ReturnMoments {
    pub cov: DMatrix<f64>,
    pub mean: DVector<f64>,
}

impl ReturnMoments {
    pub fn from_observation(obs: &Observation, window: usize) -> Self {
        let relatives = obs.price_relatives();
        let start = if window == 0 { 0 } else { relatives.len().saturating_sub(window) };
        let tail = &relatives[start..];
        let n = obs.n_risky();

        let mut cov = covariance(tail);
        if cov.nrows() != n {
            cov = DMatrix::zeros(n, n);
        }
        for i in 0..n {
            cov[(i, i)] += RIDGE;
        }
        let rows = tail.len().max(1) as f64;
        let mean = DVector::from_iterator(
            n,
            (0..n).map(|j| tail.iter().map(|r| r[j] - 1.0).sum::<f64>() / rows),
        );
        Self { cov, mean }
    }
}

fn check_shapes(cov: &DMatrix<f64>, mu: &DVector<f64>) -> Result<()> {
    if !cov.is_square() || cov.nrows() != mu.len() {
        return Err(OpsError::Shape(format!(
            "covariance is {}x{} but expected returns have {} entries",
            cov.nrows(),
            cov.ncols(),
            mu.len()
        )));
    }
    if mu.is_empty() {
        return Err(OpsError::Shape("no assets to allocate".to_string()));
    }
    Ok(())
}

fn warn_if_not_optimal(strategy: &str, sol: &QpSolution) {
    if sol.status != SolveStatus::Optimal {
        tracing::warn!(
            strategy,
            violation = sol.violation,
            objective = sol.objective,
            "quadratic program did not reach optimality"
        );
    }
}

/// Lowest-variance fully invested long-only portfolio.
pub fn min_variance_weights(cov: &DMatrix<f64>, opts: &QpOptions) -> Result<DVector<f64>> {
    let n = cov.nrows();
    let problem = QpProblem::new(cov * 2.0, DVector::zeros(n), QpDomain::Simplex);
    let sol = solve_qp(&problem, opts)?;
    warn_if_not_optimal("MinVariance", &sol);
    Ok(sol.x)
}

/// `min wᵀΣw` subject to `w ≥ 0`, `Σw = 1`, `μᵀw ≥ target`. Targets above the
/// best single asset are lowered to it.
pub fn markowitz_weights(
    cov: &DMatrix<f64>,
    mu: &DVector<f64>,
    target: f64,
    opts: &QpOptions,
) -> Result<DVector<f64>> {
    check_shapes(cov, mu)?;
    let best = mu.max();
    let target = if target > best {
        tracing::warn!(target, best, "target return unreachable, using best asset return");
        best
    } else {
        target
    };

    let n = mu.len();
    let problem = QpProblem::new(cov * 2.0, DVector::zeros(n), QpDomain::Simplex)
        .with_ineq(mu.clone(), target);
    let sol = solve_qp(&problem, opts)?;
    warn_if_not_optimal("Markowitz", &sol);
    Ok(sol.x)
}

/// Maximum Sharpe ratio long-only portfolio: `min yᵀΣy` subject to `μᵀy ≥ 1`,
/// `y ≥ 0`, rescaled to sum to one. Falls back to minimum variance when no
/// asset has a positive expected return.
pub fn tangency_weights(
    cov: &DMatrix<f64>,
    mu: &DVector<f64>,
    opts: &QpOptions,
) -> Result<DVector<f64>> {
    check_shapes(cov, mu)?;
    if mu.iter().all(|m| *m <= 0.0) {
        tracing::warn!("no positive expected return, using the minimum variance portfolio");
        return min_variance_weights(cov, opts);
    }

    let n = mu.len();
    let problem = QpProblem::new(cov * 2.0, DVector::zeros(n), QpDomain::NonNegative)
        .with_ineq(mu.clone(), 1.0);
    let sol = solve_qp(&problem, opts)?;
    warn_if_not_optimal("Tangency", &sol);

    let total = sol.x.sum();
    if !total.is_finite() || total < 1e-12 {
        return min_variance_weights(cov, opts);
    }
    Ok(sol.x / total)
}

fn with_fiat(w: &DVector<f64>) -> Vec<f64> {
    let mut out: Vec<f64> = w.iter().copied().collect();
    out.push(0.0);
    array_normalize(&out)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TangencyConfig {
    #[serde(deserialize_with = "lenient::usize")]
    pub window: usize,
}

impl Default for TangencyConfig {
    fn default() -> Self {
        Self { window: 0 }
    }
}

impl StrategyConfig for TangencyConfig {}

#[derive(Debug, Clone, Default)]
pub struct Tangency {
    config: TangencyConfig,
    qp: QpOptions,
    state: AgentState,
}

impl Tangency {
    pub fn new(config: TangencyConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }
}

impl Strategy for Tangency {
    fn name(&self) -> &str {
        "Tangency"
    }

    /// Mean single-step return per risky asset, fiat 0.
    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        let mut mu: Vec<f64> = ReturnMoments::from_observation(obs, self.config.window)
            .mean
            .iter()
            .copied()
            .collect();
        mu.push(0.0);
        Ok(mu)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 3) {
            return Ok(fallback);
        }
        let moments = ReturnMoments::from_observation(obs, self.config.window);
        let w = tangency_weights(&moments.cov, &moments.mean, &self.qp)?;
        Ok(with_fiat(&w))
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkowitzConfig {
    pub target_return: f64,
    #[serde(deserialize_with = "lenient::usize")]
    pub window: usize,
}

impl Default for MarkowitzConfig {
    fn default() -> Self {
        Self {
            target_return: 0.0025,
            window: 0,
        }
    }
}

impl StrategyConfig for MarkowitzConfig {
    const REQUIRED: &'static [&'static str] = &["target_return"];
}

#[derive(Debug, Clone, Default)]
pub struct Markowitz {
    config: MarkowitzConfig,
    qp: QpOptions,
    state: AgentState,
}

impl Markowitz {
    pub fn new(config: MarkowitzConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }
}

impl Strategy for Markowitz {
    fn name(&self) -> &str {
        "Markowitz"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        let mut mu: Vec<f64> = ReturnMoments::from_observation(obs, self.config.window)
            .mean
            .iter()
            .copied()
            .collect();
        mu.push(0.0);
        Ok(mu)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 3) {
            return Ok(fallback);
        }
        let moments = ReturnMoments::from_observation(obs, self.config.window);
        let w = markowitz_weights(
            &moments.cov,
            &moments.mean,
            self.config.target_return,
            &self.qp,
        )?;
        Ok(with_fiat(&w))
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

    fn diag(v: &[f64]) -> DMatrix<f64> {
        DMatrix::from_diagonal(&DVector::from_row_slice(v))
    }

    fn close(got: &DVector<f64>, want: &[f64]) {
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-4, "{:?} vs {:?}", got, want);
        }
    }

    #[test]
    fn tangency_follows_inverse_covariance_times_mean() {
        // Σ = I, μ = (0.01, 0.02): y ∝ Σ⁻¹μ = (1, 2)
        let mu = DVector::from_row_slice(&[0.01, 0.02]);
        let w = tangency_weights(&diag(&[1.0, 1.0]), &mu, &QpOptions::default()).unwrap();
        close(&w, &[1.0 / 3.0, 2.0 / 3.0]);
    }

    #[test]
    fn tangency_drops_negative_return_assets() {
        let mu = DVector::from_row_slice(&[0.01, -0.01]);
        let w = tangency_weights(&diag(&[1.0, 1.0]), &mu, &QpOptions::default()).unwrap();
        close(&w, &[1.0, 0.0]);
    }

    #[test]
    fn tangency_falls_back_to_min_variance() {
        let mu = DVector::from_row_slice(&[-0.01, -0.02]);
        let w = tangency_weights(&diag(&[1.0, 4.0]), &mu, &QpOptions::default()).unwrap();
        close(&w, &[0.8, 0.2]);
    }

    #[test]
    fn markowitz_lowers_unreachable_target() {
        let mu = DVector::from_row_slice(&[0.01, 0.03]);
        let w = markowitz_weights(&diag(&[1.0, 4.0]), &mu, 0.5, &QpOptions::default()).unwrap();
        close(&w, &[0.0, 1.0]);
    }

    #[test]
    fn markowitz_without_binding_target_is_min_variance() {
        let mu = DVector::from_row_slice(&[0.01, 0.03]);
        let w = markowitz_weights(&diag(&[1.0, 4.0]), &mu, 0.0, &QpOptions::default()).unwrap();
        close(&w, &[0.8, 0.2]);
    }

    #[test]
    fn misaligned_moments_are_a_shape_error() {
        let mu = DVector::from_row_slice(&[0.01, 0.03, 0.02]);
        let err = markowitz_weights(&diag(&[1.0, 4.0]), &mu, 0.0, &QpOptions::default());
        assert!(matches!(err, Err(OpsError::Shape(_))));
    }
}
