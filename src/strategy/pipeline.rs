use crate::error::{OpsError, Result};
use crate::model::observation::Observation;
use crate::model::params::ParamSet;
use crate::strategy::eri::Eri;
use crate::strategy::momentum::Momentum;
use crate::strategy::{AgentState, Strategy};

/// A factor strategy whose output seeds a risk strategy.
///
/// Parameters prefixed `factor_` or `risk_` are forwarded, without the
/// prefix, to the respective stage.
pub struct Pipeline {
    factor: Box<dyn Strategy>,
    risk: Box<dyn Strategy>,
    state: AgentState,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Box::new(Momentum::default()), Box::new(Eri::default()))
    }
}

impl Pipeline {
    pub fn new(factor: Box<dyn Strategy>, risk: Box<dyn Strategy>) -> Self {
        Self {
            factor,
            risk,
            state: AgentState::default(),
        }
    }

    pub fn factor(&self) -> &dyn Strategy {
        self.factor.as_ref()
    }

    pub fn risk(&self) -> &dyn Strategy {
        self.risk.as_ref()
    }

    fn copy_logs(&mut self) {
        let stages = [("factor", &self.factor), ("risk", &self.risk)];
        let merged: Vec<(String, String)> = stages
            .iter()
            .flat_map(|(prefix, s)| {
                s.log()
                    .iter()
                    .map(move |(k, v)| (format!("{}.{}", prefix, k), v.clone()))
            })
            .collect();
        self.state.log.extend(merged);
    }
}

/// Splits `factor_`/`risk_` keys into one parameter set per stage.
fn split_stages(params: &ParamSet) -> Result<(ParamSet, ParamSet)> {
    let mut factor = ParamSet::new();
    let mut risk = ParamSet::new();
    for (key, value) in params {
        if let Some(k) = key.strip_prefix("factor_") {
            factor.insert(k.to_string(), value.clone());
        } else if let Some(k) = key.strip_prefix("risk_") {
            risk.insert(k.to_string(), value.clone());
        } else {
            return Err(OpsError::Config(format!(
                "`{}` is neither a factor_ nor a risk_ parameter",
                key
            )));
        }
    }
    Ok((factor, risk))
}

impl Strategy for Pipeline {
    fn name(&self) -> &str {
        "Pipeline"
    }

    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        self.factor.predict(obs)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        let step = self.state.advance();
        self.factor.set_step(step);
        let factor_out = self.factor.rebalance(obs)?;

        self.risk.set_step(step);
        self.risk.seed_portfolio(&factor_out);
        let out = self.risk.rebalance(obs)?;

        self.copy_logs();
        Ok(out)
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<()> {
        self.check_params(params)?;
        let (factor, risk) = split_stages(params)?;
        if !factor.is_empty() {
            self.factor.set_params(&factor)?;
        }
        if !risk.is_empty() {
            self.risk.set_params(&risk)?;
        }
        Ok(())
    }

    fn check_params(&self, params: &ParamSet) -> Result<()> {
        let (factor, risk) = split_stages(params)?;
        if !factor.is_empty() {
            self.factor.check_params(&factor)?;
        }
        if !risk.is_empty() {
            self.risk.check_params(&risk)?;
        }
        Ok(())
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    fn reset(&mut self) {
        self.state.reset();
        self.factor.reset();
        self.risk.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::params::{param_set, ParamValue};
    use crate::strategy::testing::{single_asset_window, Knob};

    fn knobs() -> Pipeline {
        Pipeline::new(Box::new(Knob::at(0.8)), Box::new(Knob::at(0.5)))
    }

    #[test]
    fn risk_stage_starts_from_the_factor_output() {
        let mut pipeline = knobs();
        let obs = single_asset_window();
        let out = pipeline.rebalance(&obs).unwrap();
        assert!((out[0] - 0.2).abs() < 1e-12 && (out[1] - 0.8).abs() < 1e-12);
        pipeline.rebalance(&obs).unwrap();
        assert_eq!(pipeline.factor().step(), 2);
        assert_eq!(pipeline.risk().step(), 2);
    }

    #[test]
    fn prefixed_keys_reach_their_stage() {
        let mut pipeline = knobs();
        let params = param_set([
            ("factor_level", ParamValue::Number(0.1)),
            ("risk_level", ParamValue::Number(0.9)),
        ]);
        pipeline.set_params(&params).unwrap();
        let obs = single_asset_window();
        assert_eq!(pipeline.factor().predict(&obs).unwrap()[0], 0.1);
        assert_eq!(pipeline.risk().predict(&obs).unwrap()[0], 0.9);
    }

    #[test]
    fn rejected_risk_params_leave_the_factor_untouched() {
        let mut pipeline = knobs();
        let params = param_set([
            ("factor_level", ParamValue::Number(0.1)),
            ("risk_level", ParamValue::Number(2.0)),
        ]);
        let err = pipeline.set_params(&params).unwrap_err();
        assert!(matches!(err, OpsError::Config(_)));
        assert!(pipeline.check_params(&params).is_err());
        let obs = single_asset_window();
        assert_eq!(pipeline.factor().predict(&obs).unwrap()[0], 0.8);
    }

    #[test]
    fn unprefixed_key_is_rejected() {
        let params = param_set([("level", ParamValue::Number(0.1))]);
        assert!(matches!(knobs().set_params(&params), Err(OpsError::Config(_))));
    }
}
