use crate::error::{OpsError, Result};
use crate::math::simplex_proj;
use crate::model::observation::Observation;
use crate::model::params::ParamSet;
use crate::strategy::{held_or_initial, initial_allocation, AgentState, Strategy};

/// Splits capital equally at step 0 and then lets the positions drift.
#[derive(Debug, Clone, Default)]
pub struct BuyAndHold {
    state: AgentState,
}

impl BuyAndHold {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "BuyAndHold"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.step == 0 {
            return Ok(initial_allocation(obs));
        }
        Ok(simplex_proj(&held_or_initial(obs, 0)?))
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        let out = self.predict(obs);
        self.state.advance();
        out
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<()> {
        self.check_params(params)
    }

    fn check_params(&self, params: &ParamSet) -> Result<()> {
        match params.keys().next() {
            Some(key) => Err(OpsError::Config(format!(
                "BuyAndHold takes no parameters, got `{}`",
                key
            ))),
            None => Ok(()),
        }
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }
}
