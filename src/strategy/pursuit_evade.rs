use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::{dot, norm1, simplex_proj};
use crate::model::observation::Observation;
use crate::model::params::{
    apply_params, lenient, require_range, ParamSet, StrategyConfig,
};
use crate::strategy::eri::{eri_portfolio, EriConfig, Penalty};
use crate::strategy::multiplicative_weights::mw_update;
use crate::strategy::{held_or_initial, initial_allocation, short_window, AgentState, Strategy};

const EXPERTS: [&str; 2] = ["trend", "risk"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PursuitEvadeConfig {
    /// Learning rate of the trend expert.
    pub lr: f64,
    /// Weight of the newest log-wealth term in the expert scores.
    pub score_decay: f64,
    /// L1 distance under which the leader is followed outright.
    pub tolerance: f64,
    /// Largest L1 move toward the leader in one step.
    pub pursuit_step: f64,
    #[serde(deserialize_with = "lenient::usize")]
    pub window: usize,
    pub k: f64,
    pub mpc: f64,
    pub penalty: Penalty,
    pub risk_aversion: f64,
}

impl Default for PursuitEvadeConfig {
    fn default() -> Self {
        Self {
            lr: 0.5,
            score_decay: 0.1,
            tolerance: 0.05,
            pursuit_step: 0.25,
            window: 30,
            k: 0.1,
            mpc: 1.0,
            penalty: Penalty::None,
            risk_aversion: 1.0,
        }
    }
}

impl StrategyConfig for PursuitEvadeConfig {
    const REQUIRED: &'static [&'static str] = &["lr"];

    fn validate(&self) -> Result<()> {
        require_range("lr", self.lr, 0.0, f64::MAX)?;
        require_range("score_decay", self.score_decay, 0.0, 1.0)?;
        require_range("tolerance", self.tolerance, 0.0, 2.0)?;
        require_range("pursuit_step", self.pursuit_step, 0.0, 2.0)?;
        self.eri().validate()
    }
}

impl PursuitEvadeConfig {
    fn eri(&self) -> EriConfig {
        EriConfig {
            window: self.window,
            k: self.k,
            mpc: self.mpc,
            penalty: self.penalty,
            risk_aversion: self.risk_aversion,
            ..EriConfig::default()
        }
    }
}

/// Expert portfolios and their discounted log-wealth scores, in the order
/// trend, risk.
#[derive(Debug, Clone)]
pub struct PursuitState {
    pub experts: Vec<Vec<f64>>,
    pub scores: Vec<f64>,
}

impl PursuitState {
    fn new(start: &[f64]) -> Self {
        Self {
            experts: vec![start.to_vec(); EXPERTS.len()],
            scores: vec![0.0; EXPERTS.len()],
        }
    }

    fn leader(&self) -> usize {
        self.scores
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, top), (i, s)| {
                if *s > top {
                    (i, *s)
                } else {
                    (best, top)
                }
            })
            .0
    }
}

/// Chases whichever of a trend-following and a risk-averse expert has the
/// better recent log wealth, moving at most `pursuit_step` per step.
#[derive(Debug, Clone, Default)]
pub struct PursuitEvade {
    config: PursuitEvadeConfig,
    model: Option<PursuitState>,
    state: AgentState,
}

impl PursuitEvade {
    pub fn new(config: PursuitEvadeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn model(&self) -> Option<&PursuitState> {
        self.model.as_ref()
    }
}

/// Moves `b` toward `target`: the target itself when within `tolerance`,
/// otherwise a step of at most `step` in L1 distance.
pub fn pursue(b: &[f64], target: &[f64], tolerance: f64, step: f64) -> Vec<f64> {
    let gap: Vec<f64> = target.iter().zip(b).map(|(t, bi)| t - bi).collect();
    let distance = norm1(&gap);
    if distance <= tolerance {
        return target.to_vec();
    }
    let scale = (step / distance).min(1.0);
    b.iter().zip(&gap).map(|(bi, g)| bi + scale * g).collect()
}

impl Strategy for PursuitEvade {
    fn name(&self) -> &str {
        "PursuitEvade"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        obs.last_price_relative(false)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            let start = initial_allocation(obs);
            self.model = Some(PursuitState::new(&start));
            return Ok(start);
        }
        if let Some(fallback) = short_window(self.name(), obs, 2) {
            return Ok(fallback);
        }
        let cfg = self.config.clone();
        let x = self.predict(obs)?;
        let b = held_or_initial(obs, 0)?;

        let model = self
            .model
            .get_or_insert_with(|| PursuitState::new(&initial_allocation(obs)));
        if model.experts.iter().any(|e| e.len() != x.len()) {
            *model = PursuitState::new(&initial_allocation(obs));
        }

        for (score, expert) in model.scores.iter_mut().zip(&model.experts) {
            let growth = dot(expert, &x).max(1e-12).ln();
            *score = (1.0 - cfg.score_decay) * *score + cfg.score_decay * growth;
        }

        model.experts[0] = mw_update(&model.experts[0], &x, cfg.lr);
        if obs.len() >= 3 {
            let solution = eri_portfolio(&cfg.eri(), obs, &model.experts[1])?;
            model.experts[1] = solution.weights;
        }

        let leader = model.leader();
        let next = pursue(&b, &model.experts[leader], cfg.tolerance, cfg.pursuit_step);

        let log = &mut self.state.log;
        log.insert("leader".to_string(), EXPERTS[leader].to_string());
        for (name, score) in EXPERTS.iter().zip(&model.scores) {
            log.insert(format!("score.{}", name), format!("{:.6}", score));
        }
        Ok(simplex_proj(&next))
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
    fn follows_a_close_leader() {
        let b = [0.5, 0.5, 0.0];
        let target = [0.52, 0.48, 0.0];
        assert_eq!(pursue(&b, &target, 0.05, 0.25), target.to_vec());
    }

    #[test]
    fn pursuit_step_bounds_the_move() {
        let b = [1.0, 0.0, 0.0];
        let target = [0.0, 1.0, 0.0];
        let next = pursue(&b, &target, 0.05, 0.5);
        assert!((next[0] - 0.75).abs() < 1e-12);
        assert!((next[1] - 0.25).abs() < 1e-12);
        assert!((norm1(&[next[0] - b[0], next[1] - b[1]]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn leader_is_highest_score() {
        let state = PursuitState {
            experts: vec![vec![1.0], vec![1.0]],
            scores: vec![-0.1, 0.2],
        };
        assert_eq!(state.leader(), 1);
    }
}
