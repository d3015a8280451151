use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::simplex_proj;
use crate::model::observation::Observation;
use crate::model::params::{apply_params, require_range, ParamSet, StrategyConfig};
use crate::strategy::adahedge::{hedge_eta, hedge_weights, log_losses, mixability_gap, FTL_ETA};
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlipFlopConfig {
    pub phi: f64,
    pub alpha: f64,
    pub loss_clip: f64,
}

impl Default for FlipFlopConfig {
    fn default() -> Self {
        Self {
            phi: 2.37,
            alpha: 1.243,
            loss_clip: 10.0,
        }
    }
}

impl StrategyConfig for FlipFlopConfig {
    fn validate(&self) -> Result<()> {
        require_range("phi", self.phi, f64::MIN_POSITIVE, f64::MAX)?;
        require_range("alpha", self.alpha, f64::MIN_POSITIVE, f64::MAX)?;
        require_range("loss_clip", self.loss_clip, 0.0, f64::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    FollowTheLeader,
    AdaHedge,
}

#[derive(Debug, Clone)]
pub struct FlipFlopState {
    pub cum_loss: Vec<f64>,
    pub delta_ftl: f64,
    pub delta_ah: f64,
    pub regime: Regime,
}

impl FlipFlopState {
    pub fn new(n: usize) -> Self {
        Self {
            cum_loss: vec![0.0; n],
            delta_ftl: 0.0,
            delta_ah: 0.0,
            regime: Regime::FollowTheLeader,
        }
    }

    fn eta(&self, n: usize) -> f64 {
        match self.regime {
            Regime::FollowTheLeader => FTL_ETA,
            Regime::AdaHedge => hedge_eta(n, self.delta_ah),
        }
    }
}

/// Alternates between follow-the-leader and AdaHedge, charging each regime's
/// mixability gap to its own budget (van Erven et al. 2011).
#[derive(Debug, Clone, Default)]
pub struct FlipFlop {
    config: FlipFlopConfig,
    model: Option<FlipFlopState>,
    state: AgentState,
}

impl FlipFlop {
    pub fn new(config: FlipFlopConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn model(&self) -> Option<&FlipFlopState> {
        self.model.as_ref()
    }

    fn update(&mut self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        let cfg = &self.config;
        let model = self.model.get_or_insert_with(|| FlipFlopState::new(n));
        if model.cum_loss.len() != n {
            *model = FlipFlopState::new(n);
        }

        let loss = log_losses(x, cfg.loss_clip);
        let eta = model.eta(n);
        let gap = mixability_gap(&model.cum_loss, &loss, eta);
        match model.regime {
            Regime::FollowTheLeader => model.delta_ftl += gap,
            Regime::AdaHedge => model.delta_ah += gap,
        }
        for (l, li) in model.cum_loss.iter_mut().zip(&loss) {
            *l += li;
        }

        model.regime = match model.regime {
            Regime::FollowTheLeader if model.delta_ftl > cfg.phi / cfg.alpha * model.delta_ah => {
                Regime::AdaHedge
            }
            Regime::AdaHedge if model.delta_ah > cfg.alpha * model.delta_ftl => {
                Regime::FollowTheLeader
            }
            current => current,
        };

        let regime = format!("{:?}", model.regime);
        let out = simplex_proj(&hedge_weights(&model.cum_loss, model.eta(n)));
        self.state.log.insert("regime".to_string(), regime);
        out
    }
}

impl Strategy for FlipFlop {
    fn name(&self) -> &str {
        "FlipFlop"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        obs.last_price_relative(false)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            self.model = Some(FlipFlopState::new(obs.n_assets()));
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
    fn switches_to_adahedge_once_ftl_pays_a_gap() {
        let mut ff = FlipFlop::default();
        ff.model = Some(FlipFlopState::new(3));
        // a tie at the start costs follow-the-leader its full spread
        ff.update(&[1.1, 0.9, 1.0]);
        ff.update(&[0.9, 1.1, 1.0]);
        let model = ff.model().map(|m| m.regime);
        assert_eq!(model, Some(Regime::AdaHedge));
        assert_eq!(ff.log().get("regime").map(String::as_str), Some("AdaHedge"));
    }
}
