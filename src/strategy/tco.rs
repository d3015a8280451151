use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::{dot, mean, safe_div, simplex_proj};
use crate::model::observation::Observation;
use crate::model::params::{
    apply_params, lenient, require_range, require_span, ParamSet, StrategyConfig,
};
use crate::model::portfolio::portfolio_vector;
use crate::strategy::olmar::moving_average_relative;
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcoConfig {
    /// Dead zone on the relative move; trades smaller than this are skipped.
    pub toff: f64,
    #[serde(deserialize_with = "lenient::usize")]
    pub window: usize,
    #[serde(deserialize_with = "lenient::flag")]
    pub rebalance: bool,
}

impl Default for TcoConfig {
    fn default() -> Self {
        Self {
            toff: 0.1,
            window: 7,
            rebalance: true,
        }
    }
}

impl StrategyConfig for TcoConfig {
    const REQUIRED: &'static [&'static str] = &["toff"];

    fn validate(&self) -> Result<()> {
        require_range("toff", self.toff, 0.0, f64::MAX)?;
        require_span("window", self.window, 2)
    }
}

/// Transaction cost optimisation (Li, Wang), first form.
#[derive(Debug, Clone, Default)]
pub struct Tco {
    config: TcoConfig,
    state: AgentState,
}

impl Tco {
    pub fn new(config: TcoConfig) -> Self {
        Self {
            config,
            state: AgentState::default(),
        }
    }

    fn update(&self, b: &[f64], x: &[f64]) -> Vec<f64> {
        let bx = dot(b, x);
        let v: Vec<f64> = x.iter().map(|xi| safe_div(*xi, bx)).collect();
        let v_mean = mean(&v);
        let next: Vec<f64> = b
            .iter()
            .zip(&v)
            .map(|(bi, vi)| {
                let d = vi - v_mean;
                bi + d.signum() * (d.abs() - self.config.toff).max(0.0)
            })
            .collect();
        simplex_proj(&next)
    }
}

impl Strategy for Tco {
    fn name(&self) -> &str {
        "TCO"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        moving_average_relative(obs, self.config.window)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, 2) {
            return Ok(fallback);
        }
        let back = if self.config.rebalance { 1 } else { 0 };
        let prev = portfolio_vector(obs, back)?;
        let x = self.predict(obs)?;
        Ok(self.update(&prev, &x))
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
    use crate::model::observation::ObservationRow;

    #[test]
    fn moves_past_the_dead_zone_only() {
        // v = x / (b·x) = (1.5, 0.5), one half either side of the mean
        let out = Tco::default().update(&[0.5, 0.5], &[1.5, 0.5]);
        assert!((out[0] - 0.9).abs() < 1e-12 && (out[1] - 0.1).abs() < 1e-12, "{:?}", out);

        let wide = Tco::new(TcoConfig {
            toff: 0.6,
            ..TcoConfig::default()
        });
        assert_eq!(wide.update(&[0.5, 0.5], &[1.5, 0.5]), vec![0.5, 0.5]);
    }

    #[test]
    fn rebalance_flag_picks_the_reference_row() {
        let obs = Observation::new(
            vec!["A".to_string(), "B".to_string()],
            "USD",
            vec![
                ObservationRow::new(vec![1.0, 1.0], vec![1.0, 0.0], 0.0),
                ObservationRow::new(vec![1.0, 1.0], vec![0.0, 1.0], 0.0),
            ],
        )
        .unwrap();
        for (flag, expected) in [(true, vec![1.0, 0.0, 0.0]), (false, vec![0.0, 1.0, 0.0])] {
            let mut tco = Tco::new(TcoConfig {
                rebalance: flag,
                ..TcoConfig::default()
            });
            tco.rebalance(&obs).unwrap();
            assert_eq!(tco.rebalance(&obs).unwrap(), expected);
        }
    }
}
