use serde::{Deserialize, Serialize};

use crate::error::OpsError;
use crate::optimize::space::{Constraint, ParamRange, SearchSpace};
use crate::strategy::adahedge::AdaHedge;
use crate::strategy::anticor::Anticor;
use crate::strategy::buy_and_hold::BuyAndHold;
use crate::strategy::constant_rebalance::ConstantRebalance;
use crate::strategy::cwmr::Cwmr;
use crate::strategy::eri::Eri;
use crate::strategy::flip_flop::FlipFlop;
use crate::strategy::harmonic::Harmonic;
use crate::strategy::linear_mixture::LinearMixture;
use crate::strategy::look_ahead::LookAhead;
use crate::strategy::mean_variance::{Markowitz, Tangency};
use crate::strategy::momentum::Momentum;
use crate::strategy::multiplicative_weights::MultiplicativeWeights;
use crate::strategy::ogs::Ogs;
use crate::strategy::olmar::Olmar;
use crate::strategy::ons::Ons;
use crate::strategy::orags::Orags;
use crate::strategy::pamr::Pamr;
use crate::strategy::pipeline::Pipeline;
use crate::strategy::pursuit_evade::PursuitEvade;
use crate::strategy::random_walk::RandomWalk;
use crate::strategy::short_term_reversion::ShortTermReversion;
use crate::strategy::tco::Tco;
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ConstantRebalance,
    BuyAndHold,
    Momentum,
    Ons,
    Ogs,
    MultiplicativeWeights,
    #[serde(rename = "adahedge")]
    AdaHedge,
    FlipFlop,
    Pamr,
    Olmar,
    Cwmr,
    Stmr,
    Kamamr,
    Tco,
    Anticor,
    Harmonic,
    Eri,
    Orags,
    Markowitz,
    Tangency,
    LinearMixture,
    PursuitEvade,
    Pipeline,
    RandomWalk,
    LookAhead,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 25] = [
        Self::ConstantRebalance,
        Self::BuyAndHold,
        Self::Momentum,
        Self::Ons,
        Self::Ogs,
        Self::MultiplicativeWeights,
        Self::AdaHedge,
        Self::FlipFlop,
        Self::Pamr,
        Self::Olmar,
        Self::Cwmr,
        Self::Stmr,
        Self::Kamamr,
        Self::Tco,
        Self::Anticor,
        Self::Harmonic,
        Self::Eri,
        Self::Orags,
        Self::Markowitz,
        Self::Tangency,
        Self::LinearMixture,
        Self::PursuitEvade,
        Self::Pipeline,
        Self::RandomWalk,
        Self::LookAhead,
    ];

    /// Configuration tag, e.g. `flip_flop`.
    pub fn tag(self) -> &'static str {
        match self {
            Self::ConstantRebalance => "constant_rebalance",
            Self::BuyAndHold => "buy_and_hold",
            Self::Momentum => "momentum",
            Self::Ons => "ons",
            Self::Ogs => "ogs",
            Self::MultiplicativeWeights => "multiplicative_weights",
            Self::AdaHedge => "adahedge",
            Self::FlipFlop => "flip_flop",
            Self::Pamr => "pamr",
            Self::Olmar => "olmar",
            Self::Cwmr => "cwmr",
            Self::Stmr => "stmr",
            Self::Kamamr => "kamamr",
            Self::Tco => "tco",
            Self::Anticor => "anticor",
            Self::Harmonic => "harmonic",
            Self::Eri => "eri",
            Self::Orags => "orags",
            Self::Markowitz => "markowitz",
            Self::Tangency => "tangency",
            Self::LinearMixture => "linear_mixture",
            Self::PursuitEvade => "pursuit_evade",
            Self::Pipeline => "pipeline",
            Self::RandomWalk => "random_walk",
            Self::LookAhead => "look_ahead",
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.tag() == wanted)
            .ok_or_else(|| OpsError::Config(format!("unknown strategy `{}`", s)))
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Strategy of `kind` with its default hyperparameters.
pub fn build_strategy(kind: StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::ConstantRebalance => Box::new(ConstantRebalance::new()),
        StrategyKind::BuyAndHold => Box::new(BuyAndHold::new()),
        StrategyKind::Momentum => Box::new(Momentum::default()),
        StrategyKind::Ons => Box::new(Ons::default()),
        StrategyKind::Ogs => Box::new(Ogs::default()),
        StrategyKind::MultiplicativeWeights => Box::new(MultiplicativeWeights::default()),
        StrategyKind::AdaHedge => Box::new(AdaHedge::default()),
        StrategyKind::FlipFlop => Box::new(FlipFlop::default()),
        StrategyKind::Pamr => Box::new(Pamr::default()),
        StrategyKind::Olmar => Box::new(Olmar::default()),
        StrategyKind::Cwmr => Box::new(Cwmr::default()),
        StrategyKind::Stmr => Box::new(ShortTermReversion::stmr()),
        StrategyKind::Kamamr => Box::new(ShortTermReversion::kamamr()),
        StrategyKind::Tco => Box::new(Tco::default()),
        StrategyKind::Anticor => Box::new(Anticor::default()),
        StrategyKind::Harmonic => Box::new(Harmonic::default()),
        StrategyKind::Eri => Box::new(Eri::default()),
        StrategyKind::Orags => Box::new(Orags::default()),
        StrategyKind::Markowitz => Box::new(Markowitz::default()),
        StrategyKind::Tangency => Box::new(Tangency::default()),
        StrategyKind::LinearMixture => Box::new(LinearMixture::default()),
        StrategyKind::PursuitEvade => Box::new(PursuitEvade::default()),
        StrategyKind::Pipeline => Box::new(Pipeline::default()),
        StrategyKind::RandomWalk => Box::new(RandomWalk::default()),
        StrategyKind::LookAhead => Box::new(LookAhead::default()),
    }
}

/// Integer range `[lo, obs_steps]`, widened to `[lo, lo]` for short windows.
fn span(lo: usize, obs_steps: usize) -> ParamRange {
    ParamRange::integer(lo as f64, obs_steps.max(lo) as f64)
}

/// Search space over the hyperparameters of `kind` for windows of
/// `obs_steps` rows. Every key a strategy requires is present.
pub fn default_search_space(kind: StrategyKind, obs_steps: usize) -> SearchSpace {
    let real = ParamRange::real;
    match kind {
        StrategyKind::ConstantRebalance | StrategyKind::BuyAndHold => SearchSpace::empty(),
        StrategyKind::Momentum => {
            let hp = SearchSpace::params([
                ("alpha_v", real(1e-8, 1.0)),
                ("alpha_a", real(1e-8, 1.0)),
                ("ma1", span(2, obs_steps)),
                ("ma2", span(2, obs_steps)),
                ("std_span", span(2, obs_steps)),
            ]);
            SearchSpace::choice(
                "mean_type",
                [("simple", hp.clone()), ("exp", hp.clone()), ("kama", hp)],
            )
        }
        StrategyKind::Ons => SearchSpace::params([
            ("delta", real(1e-3, 1.0)),
            ("beta", real(0.1, 10.0)),
            ("eta", real(0.0, 0.5)),
        ]),
        StrategyKind::Ogs => SearchSpace::params([
            ("lr", real(1e-3, 2.0)),
            ("eta", real(0.0, 0.5)),
            ("damping", real(0.9, 1.0)),
        ]),
        StrategyKind::MultiplicativeWeights => SearchSpace::params([("lr", real(1e-3, 2.0))]),
        StrategyKind::AdaHedge => SearchSpace::params([("decay", real(0.5, 1.0))]),
        StrategyKind::FlipFlop => {
            SearchSpace::params([("phi", real(1.0, 4.0)), ("alpha", real(1.0, 2.0))])
        }
        StrategyKind::Pamr => {
            let eps = SearchSpace::params([("eps", real(0.0, 0.1))]);
            let eps_c = SearchSpace::params([("eps", real(0.0, 0.1)), ("C", real(1.0, 5000.0))]);
            SearchSpace::choice(
                "variant",
                [("PAMR0", eps), ("PAMR1", eps_c.clone()), ("PAMR2", eps_c)],
            )
        }
        StrategyKind::Olmar => {
            SearchSpace::params([("eps", real(0.0, 2.0)), ("window", span(2, obs_steps))])
        }
        StrategyKind::Cwmr => SearchSpace::params([
            ("eps", real(-1.0, 0.0)),
            ("confidence", real(0.5, 0.999)),
        ]),
        StrategyKind::Stmr => {
            SearchSpace::params([("eps", real(0.0, 0.1)), ("eta", real(0.0, 0.5))])
        }
        StrategyKind::Kamamr => {
            SearchSpace::params([("eps", real(0.0, 0.1)), ("window", span(2, obs_steps))])
        }
        StrategyKind::Tco => {
            SearchSpace::params([("toff", real(0.0, 0.5)), ("window", span(2, obs_steps))])
        }
        StrategyKind::Anticor => SearchSpace::params([("window", span(3, obs_steps / 2))]),
        StrategyKind::Harmonic => SearchSpace::params([
            ("err_allowed", real(1e-3, 0.2)),
            ("peak_order", span(1, (obs_steps / 5).max(1))),
            ("decay", real(0.9, 1.0)),
            ("alpha_up", real(1e-8, 1.0)),
            ("alpha_down", real(1e-8, 1.0)),
        ]),
        StrategyKind::Eri => SearchSpace::params([
            ("window", span(3, obs_steps)),
            ("k", real(0.05, 0.5)),
            ("mpc", real(0.3, 1.0)),
        ]),
        StrategyKind::Orags => SearchSpace::params([
            ("lr", real(1e-3, 1.0)),
            ("k", real(0.05, 0.5)),
            ("mpc", real(0.3, 1.0)),
        ]),
        StrategyKind::Markowitz => SearchSpace::params([("target_return", real(0.0, 0.01))]),
        StrategyKind::Tangency => SearchSpace::params([("window", span(3, obs_steps))]),
        StrategyKind::LinearMixture => {
            SearchSpace::params([("w_0", real(0.0, 1.0)), ("w_1", real(0.0, 1.0))])
        }
        StrategyKind::PursuitEvade => SearchSpace::params([
            ("lr", real(1e-3, 2.0)),
            ("score_decay", real(0.01, 0.5)),
            ("tolerance", real(0.0, 0.2)),
            ("pursuit_step", real(0.05, 1.0)),
        ]),
        StrategyKind::Pipeline => SearchSpace::params([
            ("risk_window", span(3, obs_steps)),
            ("risk_k", real(0.05, 0.5)),
            ("risk_mpc", real(0.3, 1.0)),
        ]),
        StrategyKind::RandomWalk => SearchSpace::choice(
            "activation",
            [
                ("normalize", SearchSpace::empty()),
                ("simplex", SearchSpace::empty()),
            ],
        ),
        StrategyKind::LookAhead => SearchSpace::choice(
            "mr",
            [("true", SearchSpace::empty()), ("false", SearchSpace::empty())],
        ),
    }
}

/// Feasibility constraints paired with [`default_search_space`].
pub fn default_constraints(kind: StrategyKind) -> Vec<Constraint> {
    match kind {
        StrategyKind::Momentum => vec![Constraint::less_than("ma1", "ma2")],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_from_str() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.tag().parse::<StrategyKind>().unwrap(), kind);
        }
        assert!("lstm".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn serde_names_match_tags() {
        for kind in StrategyKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.tag()));
        }
    }

    #[test]
    fn every_space_flattens() {
        for kind in StrategyKind::ALL {
            let leaves = default_search_space(kind, 20).leaves().unwrap();
            assert!(!leaves.is_empty(), "{}", kind);
        }
    }
}
