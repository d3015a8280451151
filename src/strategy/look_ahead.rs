use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::observation::Observation;
use crate::model::params::{apply_params, lenient, ParamSet, StrategyConfig};
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookAheadConfig {
    /// Chase the asset that fell the most instead of the one that rose.
    #[serde(deserialize_with = "lenient::flag")]
    pub mr: bool,
}

impl StrategyConfig for LookAheadConfig {}

/// Goes all in on the asset with the best last price relative (fiat
/// included at 1).
///
/// On an environment that only shows past prices, this earns nothing from a
/// strictly alternating series; a profit there means the observation leaks
/// the price the step is settled at.
#[derive(Debug, Clone, Default)]
pub struct LookAhead {
    config: LookAheadConfig,
    state: AgentState,
}

impl LookAhead {
    pub fn new(config: LookAheadConfig) -> Self {
        Self {
            config,
            state: AgentState::default(),
        }
    }
}

impl Strategy for LookAhead {
    fn name(&self) -> &str {
        "LookAhead"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        obs.last_price_relative(self.config.mr)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 2) {
            return Ok(fallback);
        }
        let x = self.predict(obs)?;
        // first index wins ties
        let best = x
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, top), (i, v)| {
                if *v > top {
                    (i, *v)
                } else {
                    (best, top)
                }
            })
            .0;
        let mut out = vec![0.0; x.len()];
        out[best] = 1.0;
        Ok(out)
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
    fn picks_the_best_relative() {
        let obs = Observation::from_prices(
            vec!["A".to_string(), "B".to_string()],
            "USD",
            &[vec![2.0, 1.0], vec![1.0, 1.5]],
        )
        .unwrap();
        let mut up = LookAhead::default();
        up.rebalance(&obs).unwrap();
        assert_eq!(up.rebalance(&obs).unwrap(), vec![0.0, 1.0, 0.0]);

        let mut down = LookAhead::new(LookAheadConfig { mr: true });
        down.rebalance(&obs).unwrap();
        assert_eq!(down.rebalance(&obs).unwrap(), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn flat_prices_pick_the_first_asset() {
        let obs = Observation::from_prices(vec!["A".to_string()], "USD", &[vec![1.0], vec![1.0]])
            .unwrap();
        let mut s = LookAhead::default();
        s.rebalance(&obs).unwrap();
        assert_eq!(s.rebalance(&obs).unwrap(), vec![1.0, 0.0]);
    }
}
