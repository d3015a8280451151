//! Extreme Risk Index (Mainik, Mitov, Rüschendorf 2015).
//!
//! Large joint moves are collected in polar form: the L1 radius of each
//! one-step return vector and its direction on the unit sphere. A Hill
//! estimate of the radius tail index `α` and the extreme directions give the
//! risk index `γ(w)` of a portfolio, which the strategies here minimise under
//! a position-concentration bound.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::indicator::moving_average::Ewm;
use crate::math::{
    array_normalize, covariance, dot, mean, norm1, norm2, safe_div, ConstrainedMinimizer,
    SolveStatus,
};
use crate::model::observation::Observation;
use crate::model::params::{
    apply_params, lenient, require_range, require_span, ParamSet, StrategyConfig,
};
use crate::strategy::{held_or_initial, initial_allocation, short_window, AgentState, Strategy};

/// Tail index used when the Hill estimate is not a positive finite number.
pub const DEFAULT_TAIL_INDEX: f64 = 2.0;

/// Extreme sample of one-step returns, largest radius first.
#[derive(Debug, Clone)]
pub struct PolarReturns {
    pub radius: Vec<f64>,
    /// Unit-L1 direction of each extreme return, fiat slot last.
    pub angle: Vec<Vec<f64>>,
}

/// Returns `p[t-1] / p[t] - 1` over the last `window` steps (fiat 0) in polar
/// form, keeping the `⌊window·k⌋ + 1` largest radii.
pub fn polar_returns(obs: &Observation, window: usize, k: f64) -> Result<PolarReturns> {
    obs.require(2)?;
    let steps = window.min(obs.len() - 1).max(1);
    let rows = &obs.rows()[obs.len() - steps - 1..];

    let mut sample: Vec<(f64, Vec<f64>)> = rows
        .windows(2)
        .map(|w| {
            let mut r: Vec<f64> = w[0]
                .open
                .iter()
                .zip(&w[1].open)
                .map(|(prev, cur)| safe_div(*prev, *cur) - 1.0)
                .collect();
            r.push(0.0);
            let radius = norm1(&r);
            let angle = r.iter().map(|v| safe_div(*v, radius)).collect();
            (radius, angle)
        })
        .collect();

    sample.sort_by(|a, b| b.0.total_cmp(&a.0));
    let keep = ((steps as f64 * k).floor() as usize + 1).min(sample.len());
    sample.truncate(keep);

    let (radius, angle): (Vec<f64>, Vec<Vec<f64>>) = sample.into_iter().unzip();
    Ok(PolarReturns { radius, angle })
}

/// Hill estimator `(m - 1) / Σ ln(R_i / R_min)` on radii sorted descending.
pub fn hill_alpha(radius: &[f64]) -> f64 {
    let m = radius.len();
    if m < 2 {
        return f64::NAN;
    }
    let last = radius[m - 1];
    let log_sum: f64 = radius[..m - 1]
        .iter()
        .map(|r| safe_div(*r, last).ln())
        .sum();
    safe_div((m - 1) as f64, log_sum)
}

/// Hill estimate, or [`DEFAULT_TAIL_INDEX`] when it is degenerate.
pub fn tail_index(radius: &[f64]) -> f64 {
    let alpha = hill_alpha(radius);
    if alpha.is_finite() && alpha > 0.0 {
        return alpha;
    }
    tracing::warn!(
        estimate = alpha,
        sample = radius.len(),
        fallback = DEFAULT_TAIL_INDEX,
        "degenerate tail index estimate"
    );
    DEFAULT_TAIL_INDEX
}

/// `γ(w) = 1/(m-1) Σ_{i<m-1} max(w·Z_i, 0)^α`.
pub fn risk_index(w: &[f64], alpha: f64, angle: &[Vec<f64>]) -> f64 {
    let m = angle.len();
    if m < 2 {
        return 0.0;
    }
    let total: f64 = angle[..m - 1]
        .iter()
        .map(|z| dot(w, z).max(0.0).powf(alpha))
        .sum();
    total / (m - 1) as f64
}

/// Extra term added to the risk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Penalty {
    None,
    /// `λ wᵀΣw` with the sample covariance of price relatives.
    Variance,
    /// `λ ‖w - b‖²` to the starting portfolio.
    Distance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EriConfig {
    /// One-step returns scanned for extremes.
    #[serde(deserialize_with = "lenient::usize")]
    pub window: usize,
    /// Fraction of the window kept as the extreme sample.
    pub k: f64,
    /// Upper bound on the L2 norm of the risky weights.
    pub mpc: f64,
    pub penalty: Penalty,
    pub risk_aversion: f64,
    /// Pin the expected relative of the portfolio to the target.
    #[serde(deserialize_with = "lenient::flag")]
    pub target: bool,
    pub target_premium: f64,
    #[serde(deserialize_with = "lenient::usize")]
    pub ewm_span: usize,
}

impl Default for EriConfig {
    fn default() -> Self {
        Self {
            window: 30,
            k: 0.1,
            mpc: 1.0,
            penalty: Penalty::None,
            risk_aversion: 1.0,
            target: false,
            target_premium: 0.0,
            ewm_span: 10,
        }
    }
}

impl StrategyConfig for EriConfig {
    fn validate(&self) -> Result<()> {
        require_span("window", self.window, 2)?;
        require_span("ewm_span", self.ewm_span, 1)?;
        require_range("k", self.k, 0.0, 1.0)?;
        require_range("mpc", self.mpc, f64::MIN_POSITIVE, f64::MAX)?;
        require_range("risk_aversion", self.risk_aversion, 0.0, f64::MAX)
    }
}

/// Exponentially weighted price relative `p[t] / p[t-1]` per risky asset over
/// the last `window` steps, fiat 1.
pub fn ewm_relatives(obs: &Observation, window: usize, span: usize) -> Vec<f64> {
    let relatives = obs.price_relatives();
    let tail = &relatives[relatives.len().saturating_sub(window)..];
    let mut out: Vec<f64> = (0..obs.n_risky())
        .map(|asset| {
            let mut ewm = Ewm::new(span);
            tail.iter().fold(1.0, |_, row| ewm.push(row[asset]))
        })
        .collect();
    out.push(1.0);
    out
}

#[derive(Debug, Clone)]
pub struct EriSolution {
    pub weights: Vec<f64>,
    pub tail_index: f64,
    pub status: SolveStatus,
}

/// Minimum-risk-index portfolio under `cfg`, searched from `start`. The
/// result is clipped to `[0, 1]` and renormalised.
pub fn eri_portfolio(cfg: &EriConfig, obs: &Observation, start: &[f64]) -> Result<EriSolution> {
    let polar = polar_returns(obs, cfg.window, cfg.k)?;
    let alpha = tail_index(&polar.radius);
    let n = obs.n_assets();
    let lam = cfg.risk_aversion;

    let relatives = obs.price_relatives();
    let tail = &relatives[relatives.len().saturating_sub(cfg.window)..];
    let risky_cov = covariance(tail);
    let mut cov = DMatrix::<f64>::zeros(n, n);
    cov.view_mut((0, 0), (n - 1, n - 1)).copy_from(&risky_cov);

    let penalty = |w: &[f64]| -> f64 {
        match cfg.penalty {
            Penalty::None => 0.0,
            Penalty::Variance => {
                let v = nalgebra::DVector::from_column_slice(w);
                lam * v.dot(&(&cov * &v))
            }
            Penalty::Distance => {
                lam * w.iter().zip(start).map(|(a, b)| (a - b).powi(2)).sum::<f64>()
            }
        }
    };

    let mpc = cfg.mpc;
    let mut solver = ConstrainedMinimizer::new(|w: &[f64]| {
        risk_index(w, alpha, &polar.angle) + penalty(w)
    })
    .with_ineq(move |w: &[f64]| mpc - norm2(&w[..w.len() - 1]));

    if cfg.target {
        let xbar = ewm_relatives(obs, cfg.window, cfg.ewm_span);
        let lo = xbar.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = xbar.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let target = (mean(&xbar) * (1.0 + cfg.target_premium)).clamp(lo, hi);
        solver = solver.with_eq(move |w: &[f64]| dot(&xbar, w) - target);
    }

    let result = solver.minimize(start);
    if result.status != SolveStatus::Optimal {
        tracing::warn!(
            violation = result.violation,
            objective = result.objective,
            "risk index minimisation stopped before convergence"
        );
    }

    let clipped: Vec<f64> = result.x.iter().map(|v| v.clamp(0.0, 1.0)).collect();
    Ok(EriSolution {
        weights: array_normalize(&clipped),
        tail_index: alpha,
        status: result.status,
    })
}

/// Risk-averse allocation minimising the extreme risk index.
#[derive(Debug, Clone, Default)]
pub struct Eri {
    config: EriConfig,
    seed: Option<Vec<f64>>,
    state: AgentState,
}

impl Eri {
    pub fn new(config: EriConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &EriConfig {
        &self.config
    }
}

impl Strategy for Eri {
    fn name(&self) -> &str {
        "ERI"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        Ok(ewm_relatives(obs, self.config.window, self.config.ewm_span))
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        let seed = self.seed.take();
        if self.state.advance() == 0 {
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 3) {
            return Ok(fallback);
        }
        let start = match seed {
            Some(s) if s.len() == obs.n_assets() => s,
            _ => held_or_initial(obs, 0)?,
        };
        let solution = eri_portfolio(&self.config, obs, &start)?;
        self.state
            .log
            .insert("alpha".to_string(), format!("{:.4}", solution.tail_index));
        Ok(solution.weights)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hill_alpha_of_geometric_radii() {
        // ln(R_i / R_min) = ln 4 and ln 2
        let alpha = hill_alpha(&[4.0, 2.0, 1.0]);
        assert!((alpha - 2.0 / (4f64.ln() + 2f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn degenerate_tail_index_falls_back() {
        assert_eq!(tail_index(&[1.0, 1.0, 1.0]), DEFAULT_TAIL_INDEX);
        assert_eq!(tail_index(&[1.0]), DEFAULT_TAIL_INDEX);
    }

    #[test]
    fn risk_index_ignores_favourable_directions() {
        let angle = vec![vec![0.5, -0.5, 0.0], vec![-1.0, 0.0, 0.0], vec![0.0, 0.0, 0.0]];
        let all_second = risk_index(&[0.0, 1.0, 0.0], 2.0, &angle);
        assert_eq!(all_second, 0.0);
        let all_first = risk_index(&[1.0, 0.0, 0.0], 2.0, &angle);
        assert!((all_first - 0.125).abs() < 1e-12);
    }

    #[test]
    fn polar_returns_keep_the_largest_moves() {
        let obs = Observation::from_prices(
            vec!["A".to_string()],
            "USD",
            &[vec![1.0], vec![1.0], vec![0.5], vec![0.5], vec![0.4]],
        )
        .unwrap();
        let polar = polar_returns(&obs, 4, 0.25).unwrap();
        assert_eq!(polar.radius.len(), 2);
        assert!((polar.radius[0] - 1.0).abs() < 1e-12);
        assert!((polar.radius[1] - 0.25).abs() < 1e-12);
        assert!((polar.angle[0][0] - 1.0).abs() < 1e-12);
    }
}
