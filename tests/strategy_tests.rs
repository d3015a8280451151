use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use ops_engine::backtest::{Environment, ReplayConfig, ReplayEnvironment};
use ops_engine::model::params::{param_set, ParamValue};
use ops_engine::model::{Observation, ObservationRow};
use ops_engine::strategy::mean_variance::{Markowitz, MarkowitzConfig};
use ops_engine::strategy::momentum::Momentum;
use ops_engine::strategy::pamr::Pamr;
use ops_engine::strategy::{build_strategy, Strategy, StrategyKind};

fn symbols(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("A{}", i)).collect()
}

fn gbm(rows: usize, n: usize, seed: u64) -> Vec<Vec<f64>> {
    let step = Normal::new(0.0, 0.03).unwrap();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut last = vec![10.0; n];
    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        out.push(last.clone());
        for p in last.iter_mut() {
            let r: f64 = step.sample(&mut rng);
            *p *= r.exp();
        }
    }
    out
}

/// Window whose second-to-last row holds the portfolio `b` (fiat last) at
/// unit prices, followed by one row of `last` prices.
fn window_holding(b: &[f64], last: Vec<f64>) -> Observation {
    let n = b.len() - 1;
    let rows = vec![
        ObservationRow::new(vec![1.0; n], b[..n].to_vec(), b[n]),
        ObservationRow::new(last, b[..n].to_vec(), b[n]),
    ];
    Observation::new(symbols(n), "USD", rows).unwrap()
}

fn assert_on_simplex(w: &[f64], context: &str) {
    assert!(
        w.iter().all(|x| x.is_finite() && *x >= -1e-9),
        "{}: bad entry in {:?}",
        context,
        w
    );
    let s: f64 = w.iter().sum();
    assert!((s - 1.0).abs() < 1e-6, "{}: sum {} for {:?}", context, s, w);
}

#[test]
fn step_zero_is_equal_risky_for_every_strategy() {
    let obs = Observation::from_prices(symbols(3), "USD", &gbm(5, 3, 1)).unwrap();
    for kind in StrategyKind::ALL {
        let mut strategy = build_strategy(kind);
        let w = strategy.rebalance(&obs).unwrap();
        assert_eq!(w.len(), 4, "{}", kind);
        for (i, v) in w.iter().enumerate() {
            let expected = if i < 3 { 1.0 / 3.0 } else { 0.0 };
            assert!((v - expected).abs() < 1e-9, "{}: {:?}", kind, w);
        }
        assert_eq!(strategy.step(), 1, "{}", kind);
    }
}

#[test]
fn every_strategy_stays_on_the_simplex() {
    for (seed, kind) in StrategyKind::ALL.into_iter().enumerate() {
        let config = ReplayConfig {
            obs_steps: 20,
            fee: 0.001,
            ..ReplayConfig::default()
        };
        let mut env =
            ReplayEnvironment::new(symbols(3), "USD", gbm(60, 3, seed as u64 + 10), config)
                .unwrap();
        let mut strategy = build_strategy(kind);
        if kind == StrategyKind::Anticor {
            strategy
                .set_params(&param_set([("window", ParamValue::Number(8.0))]))
                .unwrap();
        }

        let mut obs = env.reset().unwrap();
        loop {
            let w = strategy.rebalance(&obs).unwrap();
            assert_eq!(w.len(), 4, "{}", kind);
            assert_on_simplex(&w, kind.tag());
            let outcome = env.step(&w).unwrap();
            assert!(outcome.status.error.is_none());
            obs = outcome.observation;
            if outcome.done {
                break;
            }
        }
        assert_eq!(strategy.step(), 40, "{}", kind);
    }
}

#[test]
fn pamr_holds_when_loss_is_zero() {
    let mut pamr = Pamr::default();
    pamr.set_params(&param_set([
        ("eps", ParamValue::Number(2.0)),
        ("variant", ParamValue::from("PAMR1")),
    ]))
    .unwrap();
    let b = [0.3, 0.5, 0.2];
    let obs = window_holding(&b, vec![1.1, 0.9]);

    pamr.rebalance(&obs).unwrap();
    let w = pamr.rebalance(&obs).unwrap();
    for (got, want) in w.iter().zip(&b) {
        assert!((got - want).abs() < 1e-12, "{:?}", w);
    }
}

#[test]
fn pamr1_moves_away_from_the_winner() {
    let mut pamr = Pamr::default();
    let obs = window_holding(&[0.5, 0.5, 0.0], vec![2.0, 1.0]);

    pamr.rebalance(&obs).unwrap();
    let w = pamr.rebalance(&obs).unwrap();
    // lambda = 0.72 / (1/6) = 4.32, then projection shifts by 0.47
    assert!(w[0].abs() < 1e-9, "{:?}", w);
    assert!((w[1] - 0.75).abs() < 1e-9, "{:?}", w);
    assert!((w[2] - 0.25).abs() < 1e-9, "{:?}", w);
}

#[test]
fn momentum_favours_the_rising_asset() {
    let mut momentum = Momentum::default();
    momentum
        .set_params(&param_set([
            ("alpha_v", ParamValue::Number(1.0)),
            ("alpha_a", ParamValue::Number(1.0)),
            ("mean_type", ParamValue::from("simple")),
            ("ma1", ParamValue::Number(2.0)),
            ("ma2", ParamValue::Number(3.0)),
            ("std_span", ParamValue::Number(3.0)),
        ]))
        .unwrap();

    let third = 1.0 / 3.0;
    let rows = (0..6)
        .map(|i| {
            ObservationRow::new(
                vec![100.0 + 10.0 * i as f64, 100.0],
                vec![third / (100.0 + 10.0 * i as f64), third / 100.0],
                third,
            )
        })
        .collect();
    let obs = Observation::new(symbols(2), "USD", rows).unwrap();

    let factor = momentum.predict(&obs).unwrap();
    assert!((factor[0] - 1.0).abs() < 1e-12, "{:?}", factor);
    assert_eq!(factor[1], 0.0);

    momentum.rebalance(&obs).unwrap();
    let w = momentum.rebalance(&obs).unwrap();
    assert_on_simplex(&w, "momentum");
    assert!(w[0] > w[1] && w[0] > w[2], "{:?}", w);
    assert!(w[0] > third + 0.1, "{:?}", w);
}

#[test]
fn markowitz_mixes_anticorrelated_assets() {
    let mut prices = vec![vec![1.0, 1.0]];
    for i in 0..12 {
        let last = prices[prices.len() - 1].clone();
        let step = if i % 2 == 0 { [1.02, 0.99] } else { [0.99, 1.025] };
        prices.push(vec![last[0] * step[0], last[1] * step[1]]);
    }
    let obs = Observation::from_prices(symbols(2), "USD", &prices).unwrap();

    let mut markowitz = Markowitz::new(MarkowitzConfig::default());
    markowitz.rebalance(&obs).unwrap();
    let w = markowitz.rebalance(&obs).unwrap();

    assert_on_simplex(&w, "markowitz");
    assert_eq!(w[2], 0.0);
    assert!(w[0] > 0.3 && w[0] < 0.8, "{:?}", w);
    assert!(w[1] > 0.2 && w[1] < 0.7, "{:?}", w);
}

#[test]
fn reset_returns_to_step_zero() {
    let obs = Observation::from_prices(symbols(2), "USD", &gbm(10, 2, 3)).unwrap();
    let mut strategy = build_strategy(StrategyKind::Ons);
    strategy.rebalance(&obs).unwrap();
    strategy.rebalance(&obs).unwrap();
    assert_eq!(strategy.step(), 2);
    strategy.reset();
    assert_eq!(strategy.step(), 0);
    let w = strategy.rebalance(&obs).unwrap();
    assert!((w[0] - 0.5).abs() < 1e-12 && w[2] == 0.0);
}

#[test]
fn mixture_propagates_its_step() {
    let obs = Observation::from_prices(symbols(2), "USD", &gbm(10, 2, 4)).unwrap();
    let mut mixture = build_strategy(StrategyKind::LinearMixture);
    mixture.set_step(5);
    let w = mixture.rebalance(&obs).unwrap();
    assert_on_simplex(&w, "mixture");
    assert_eq!(mixture.step(), 6);
}

#[test]
fn pipeline_forwards_prefixed_params() {
    let mut pipeline = build_strategy(StrategyKind::Pipeline);
    pipeline
        .set_params(&param_set([("risk_window", ParamValue::Number(12.0))]))
        .unwrap();
    let err = pipeline
        .set_params(&param_set([("window", ParamValue::Number(12.0))]))
        .unwrap_err();
    assert!(err.to_string().contains("window"));
}
