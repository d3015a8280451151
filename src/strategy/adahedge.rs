use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::{dot, simplex_proj};
use crate::model::observation::Observation;
use crate::model::params::{apply_params, require_range, ParamSet, StrategyConfig};
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

/// Learning rate used while no mixability gap has accumulated; behaves like
/// follow-the-leader.
pub const FTL_ETA: f64 = 1e6;
const MIN_ETA: f64 = 1e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaHedgeConfig {
    /// Forgetting factor of the mixability-gap accumulator, in `(0, 1]`.
    pub decay: f64,
    pub loss_clip: f64,
}

impl Default for AdaHedgeConfig {
    fn default() -> Self {
        Self {
            decay: 1.0,
            loss_clip: 10.0,
        }
    }
}

impl StrategyConfig for AdaHedgeConfig {
    const REQUIRED: &'static [&'static str] = &["decay"];

    fn validate(&self) -> Result<()> {
        require_range("decay", self.decay, f64::MIN_POSITIVE, 1.0)?;
        require_range("loss_clip", self.loss_clip, 0.0, f64::MAX)
    }
}

/// Log loss of each asset over the last step, clipped to `±clip`.
pub fn log_losses(x: &[f64], clip: f64) -> Vec<f64> {
    x.iter()
        .map(|xi| (-xi.max(1e-12).ln()).clamp(-clip, clip))
        .collect()
}

/// `ln(n) / delta`, or the follow-the-leader rate while `delta` is zero.
pub fn hedge_eta(n: usize, delta: f64) -> f64 {
    if delta <= 0.0 || n < 2 {
        return FTL_ETA;
    }
    ((n as f64).ln() / delta).clamp(MIN_ETA, FTL_ETA)
}

/// Exponential weights `w ∝ exp(-eta (L - min L))`.
pub fn hedge_weights(cum_loss: &[f64], eta: f64) -> Vec<f64> {
    let min = cum_loss.iter().copied().fold(f64::INFINITY, f64::min);
    let w: Vec<f64> = cum_loss.iter().map(|l| (-eta * (l - min)).exp()).collect();
    let total: f64 = w.iter().sum();
    w.iter().map(|wi| wi / total).collect()
}

fn log_sum_exp(v: impl Iterator<Item = f64> + Clone) -> f64 {
    let max = v.clone().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + v.map(|x| (x - max).exp()).sum::<f64>().ln()
}

/// Mix loss `-ln(Σ w_i exp(-eta l_i)) / eta` of the weights implied by
/// `cum_loss`, evaluated in log space.
pub fn mix_loss(cum_loss: &[f64], loss: &[f64], eta: f64) -> f64 {
    let prior = log_sum_exp(cum_loss.iter().map(|l| -eta * l));
    let posterior = log_sum_exp(cum_loss.iter().zip(loss).map(|(l, li)| -eta * (l + li)));
    (prior - posterior) / eta
}

/// Hedge loss minus mix loss for one round, never negative.
pub fn mixability_gap(cum_loss: &[f64], loss: &[f64], eta: f64) -> f64 {
    let w = hedge_weights(cum_loss, eta);
    (dot(&w, loss) - mix_loss(cum_loss, loss, eta)).max(0.0)
}

#[derive(Debug, Clone)]
pub struct HedgeState {
    pub cum_loss: Vec<f64>,
    pub delta: f64,
}

impl HedgeState {
    pub fn new(n: usize) -> Self {
        Self {
            cum_loss: vec![0.0; n],
            delta: 0.0,
        }
    }
}

/// Hedge over the assets with a learning rate tuned by the running
/// mixability gap (de Rooij, van Erven, Grünwald, Koolen 2014).
#[derive(Debug, Clone, Default)]
pub struct AdaHedge {
    config: AdaHedgeConfig,
    model: Option<HedgeState>,
    state: AgentState,
}

impl AdaHedge {
    pub fn new(config: AdaHedgeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn model(&self) -> Option<&HedgeState> {
        self.model.as_ref()
    }

    fn update(&mut self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        let model = self.model.get_or_insert_with(|| HedgeState::new(n));
        if model.cum_loss.len() != n {
            *model = HedgeState::new(n);
        }

        let loss = log_losses(x, self.config.loss_clip);
        let eta = hedge_eta(n, model.delta);
        let gap = mixability_gap(&model.cum_loss, &loss, eta);
        model.delta = self.config.decay * model.delta + gap;
        for (l, li) in model.cum_loss.iter_mut().zip(&loss) {
            *l += li;
        }

        let eta = hedge_eta(n, model.delta);
        self.state.log.insert("eta".to_string(), format!("{:.6}", eta));
        simplex_proj(&hedge_weights(&model.cum_loss, eta))
    }
}

impl Strategy for AdaHedge {
    fn name(&self) -> &str {
        "AdaHedge"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        obs.last_price_relative(false)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            self.model = Some(HedgeState::new(obs.n_assets()));
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 2) {
            return Ok(fallback);
        }
        let x = self.predict(obs)?;
        Ok(self.update(&x))
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
    fn weights_favor_lowest_cumulative_loss() {
        let w = hedge_weights(&[0.3, 0.1, 0.2], 5.0);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(w[1] > w[2] && w[2] > w[0]);
    }

    #[test]
    fn mix_loss_is_bounded_by_hedge_loss() {
        let cum = [0.2, -0.1, 0.05];
        let loss = [0.1, -0.05, 0.4];
        for eta in [1e-3, 0.5, 10.0, FTL_ETA] {
            let gap = mixability_gap(&cum, &loss, eta);
            assert!(gap >= 0.0 && gap.is_finite());
        }
    }

    #[test]
    fn ftl_gap_vanishes_when_the_leader_keeps_winning() {
        let gap = mixability_gap(&[-0.1, 0.1, 0.0], &[-0.2, 0.1, 0.0], FTL_ETA);
        assert!(gap < 1e-6);
    }

    #[test]
    fn eta_is_ftl_until_gap_accumulates() {
        assert_eq!(hedge_eta(3, 0.0), FTL_ETA);
        assert!((hedge_eta(3, 2.0) - 3f64.ln() / 2.0).abs() < 1e-12);
    }
}
