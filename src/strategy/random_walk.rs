use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::{array_normalize, simplex_proj};
use crate::model::observation::Observation;
use crate::model::params::{apply_params, ParamSet, StrategyConfig};
use crate::strategy::{initial_allocation, AgentState, Strategy};

/// Map from a uniform draw onto the simplex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Divide by the sum.
    Normalize,
    /// Euclidean projection.
    Simplex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RandomWalkConfig {
    pub activation: Activation,
}

impl Default for RandomWalkConfig {
    fn default() -> Self {
        Self {
            activation: Activation::Normalize,
        }
    }
}

impl StrategyConfig for RandomWalkConfig {}

fn draw(rng: &mut SmallRng, n: usize, activation: Activation) -> Vec<f64> {
    let raw: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
    match activation {
        Activation::Normalize => array_normalize(&raw),
        Activation::Simplex => simplex_proj(&raw),
    }
}

/// Baseline that holds a fresh uniform draw every step. The draws restart
/// from `seed` on every reset, so episodes are reproducible.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    config: RandomWalkConfig,
    seed: u64,
    rng: SmallRng,
    state: AgentState,
}

impl Default for RandomWalk {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl RandomWalk {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            config: RandomWalkConfig::default(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
            state: AgentState::default(),
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.config.activation = activation;
        self
    }
}

impl Strategy for RandomWalk {
    fn name(&self) -> &str {
        "RandomWalk"
    }

    /// The draw the next rebalance after step 0 will hold.
    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        let mut rng = self.rng.clone();
        Ok(draw(&mut rng, obs.n_assets(), self.config.activation))
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            return Ok(initial_allocation(obs));
        }
        Ok(draw(&mut self.rng, obs.n_assets(), self.config.activation))
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

    fn reset(&mut self) {
        self.state.reset();
        self.rng = SmallRng::seed_from_u64(self.seed);
    }
}
