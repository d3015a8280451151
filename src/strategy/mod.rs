//! Portfolio selection strategies.
//!
//! Every strategy maps an [`Observation`] window to a portfolio vector on the
//! probability simplex, with the fiat weight in the last slot. Step 0 always
//! returns the initial allocation (equal risky weights, no fiat) unless a
//! strategy documents otherwise.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::math::equal_risky;
use crate::model::observation::Observation;
use crate::model::params::ParamSet;

pub mod adahedge;
pub mod anticor;
pub mod buy_and_hold;
pub mod catalog;
pub mod constant_rebalance;
pub mod cwmr;
pub mod eri;
pub mod flip_flop;
pub mod harmonic;
pub mod linear_mixture;
pub mod look_ahead;
pub mod mean_variance;
pub mod momentum;
pub mod multiplicative_weights;
pub mod ogs;
pub mod olmar;
pub mod ons;
pub mod orags;
pub mod pamr;
pub mod pipeline;
pub mod pursuit_evade;
pub mod random_walk;
pub mod short_term_reversion;
pub mod tco;

pub use catalog::{build_strategy, default_constraints, default_search_space, StrategyKind};

/// Step counter and diagnostic log shared by every strategy.
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    pub step: u64,
    pub log: BTreeMap<String, String>,
}

impl AgentState {
    /// Returns the current step and moves the counter forward by one.
    pub fn advance(&mut self) -> u64 {
        let step = self.step;
        self.step += 1;
        step
    }

    pub fn reset(&mut self) {
        self.step = 0;
        self.log.clear();
    }
}

pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Forecast or signal for the current window. Never mutates state.
    fn predict(&self, obs: &Observation) -> Result<Vec<f64>>;

    /// Next portfolio vector. Increments the step counter exactly once.
    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>>;

    /// Applies hyperparameters all at once; on error nothing changes.
    fn set_params(&mut self, params: &ParamSet) -> Result<()>;

    /// Whether [`Self::set_params`] would accept `params`, without applying
    /// them.
    fn check_params(&self, params: &ParamSet) -> Result<()>;

    fn state(&self) -> &AgentState;

    fn state_mut(&mut self) -> &mut AgentState;

    fn step(&self) -> u64 {
        self.state().step
    }

    fn set_step(&mut self, step: u64) {
        self.state_mut().step = step;
    }

    /// Back to step 0; persistent numerical state is rebuilt on the next
    /// step-0 call.
    fn reset(&mut self) {
        self.state_mut().reset();
    }

    fn log(&self) -> &BTreeMap<String, String> {
        &self.state().log
    }

    /// Hands an upstream portfolio to this strategy as its starting point for
    /// the next rebalance. Ignored by strategies that always start from the
    /// held portfolio.
    fn seed_portfolio(&mut self, _portfolio: &[f64]) {}
}

/// Equal risky weights, zero fiat.
pub fn initial_allocation(obs: &Observation) -> Vec<f64> {
    equal_risky(obs.n_assets())
}

/// Step-0 allocation when the window holds fewer than `needed` rows.
pub(crate) fn short_window(name: &str, obs: &Observation, needed: usize) -> Option<Vec<f64>> {
    if obs.len() >= needed {
        return None;
    }
    tracing::debug!(
        strategy = name,
        needed,
        available = obs.len(),
        "window too short, holding initial allocation"
    );
    Some(initial_allocation(obs))
}

/// Index of the entry farthest from `mean`.
pub(crate) fn argmax_deviation(x: &[f64], mean: f64) -> usize {
    x.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_dev), (i, v)| {
            let dev = (v - mean).abs();
            if dev > best_dev {
                (i, dev)
            } else {
                (best, best_dev)
            }
        })
        .0
}

/// Held portfolio; falls back to the initial allocation when the account
/// shows no value at all.
pub(crate) fn held_or_initial(obs: &Observation, back: usize) -> Result<Vec<f64>> {
    let b = crate::model::portfolio::portfolio_vector(obs, back)?;
    if b.iter().sum::<f64>() < 1e-12 {
        return Ok(initial_allocation(obs));
    }
    Ok(b)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::OpsError;
    use crate::model::params::ParamValue;

    /// Holds `level` on the first asset and the rest on the second. Accepts
    /// only `level` in [0, 1]. When seeded, returns the seed reversed.
    #[derive(Debug, Default)]
    pub struct Knob {
        pub level: f64,
        pub seeded: Option<Vec<f64>>,
        pub state: AgentState,
    }

    impl Knob {
        pub fn at(level: f64) -> Self {
            Self {
                level,
                ..Self::default()
            }
        }

        fn parse(params: &ParamSet) -> Result<f64> {
            match params.get("level") {
                Some(ParamValue::Number(v)) if (0.0..=1.0).contains(v) => Ok(*v),
                _ => Err(OpsError::Config("`level` must lie in [0, 1]".to_string())),
            }
        }
    }

    impl Strategy for Knob {
        fn name(&self) -> &str {
            "Knob"
        }

        fn predict(&self, _obs: &Observation) -> Result<Vec<f64>> {
            Ok(vec![self.level, 1.0 - self.level])
        }

        fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
            self.state.advance();
            match self.seeded.take() {
                Some(seed) => Ok(seed.into_iter().rev().collect()),
                None => self.predict(obs),
            }
        }

        fn set_params(&mut self, params: &ParamSet) -> Result<()> {
            self.level = Self::parse(params)?;
            Ok(())
        }

        fn check_params(&self, params: &ParamSet) -> Result<()> {
            Self::parse(params).map(|_| ())
        }

        fn state(&self) -> &AgentState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut AgentState {
            &mut self.state
        }

        fn seed_portfolio(&mut self, portfolio: &[f64]) {
            self.seeded = Some(portfolio.to_vec());
        }
    }

    pub fn single_asset_window() -> Observation {
        Observation::from_prices(vec!["A".to_string()], "USD", &[vec![1.0], vec![1.0]])
            .expect("valid window")
    }
}
