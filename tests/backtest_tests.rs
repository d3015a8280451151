use ops_engine::backtest::{evaluate, Environment, ReplayConfig, ReplayEnvironment};
use ops_engine::error::OpsError;
use ops_engine::strategy::{build_strategy, StrategyKind};

fn rising(rows: usize) -> Vec<Vec<f64>> {
    (0..rows)
        .map(|i| vec![1.0 + 0.01 * i as f64, 2.0 + 0.03 * i as f64])
        .collect()
}

fn replay(rows: usize, config: ReplayConfig) -> ReplayEnvironment {
    ReplayEnvironment::new(vec!["AAA".into(), "BBB".into()], "USD", rising(rows), config).unwrap()
}

#[test]
fn short_series_reports_data_insufficiency() {
    let config = ReplayConfig {
        obs_steps: 10,
        ..ReplayConfig::default()
    };
    let err = ReplayEnvironment::new(vec!["AAA".into(), "BBB".into()], "USD", rising(10), config)
        .unwrap_err();
    assert!(matches!(
        err,
        OpsError::DataInsufficiency {
            needed: 11,
            available: 10
        }
    ));
}

#[test]
fn ragged_rows_report_shape_error() {
    let mut prices = rising(12);
    prices[4].pop();
    let err = ReplayEnvironment::new(
        vec!["AAA".into(), "BBB".into()],
        "USD",
        prices,
        ReplayConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, OpsError::Shape(_)));
}

#[test]
fn seeded_random_start_is_reproducible() {
    let config = ReplayConfig {
        obs_steps: 5,
        random_start: true,
        seed: 11,
        ..ReplayConfig::default()
    };
    let mut a = replay(50, config.clone());
    let mut b = replay(50, config);
    for _ in 0..10 {
        a.reset().unwrap();
        b.reset().unwrap();
        assert_eq!(a.cursor(), b.cursor());
        assert!(a.cursor() >= 4 && a.cursor() <= 48);
    }
}

#[test]
fn first_window_starts_at_the_first_row() {
    let mut env = replay(30, ReplayConfig::default());
    let obs = env.reset().unwrap();
    assert_eq!(env.cursor(), 19);
    assert_eq!(obs.len(), 20);
    assert!((env.portfolio_value() - 100.0).abs() < 1e-12);
}

#[test]
fn buy_and_hold_gains_on_a_rising_market() {
    let mut env = replay(40, ReplayConfig::default());
    let mut strategy = build_strategy(StrategyKind::BuyAndHold);
    let stats = evaluate(strategy.as_mut(), &mut env, 2, 0).unwrap();
    assert_eq!(stats.rewards.len(), 2);
    assert!(stats.mean > 1.0, "{:?}", stats);
    assert!((stats.rewards[0] - stats.rewards[1]).abs() < 1e-12);
    assert!(stats.std < 1e-12);
}

#[test]
fn max_steps_limits_the_episode() {
    let mut long = replay(40, ReplayConfig::default());
    let mut short = replay(40, ReplayConfig::default());
    let mut strategy = build_strategy(StrategyKind::ConstantRebalance);
    let full = evaluate(strategy.as_mut(), &mut long, 1, 0).unwrap();
    let partial = evaluate(strategy.as_mut(), &mut short, 1, 3).unwrap();
    assert!(full.mean > partial.mean, "{} vs {}", full.mean, partial.mean);
}

/// A jumps between 1 and 2 every row, B stays flat.
fn alternating(rows: usize) -> Vec<Vec<f64>> {
    (0..rows).map(|i| vec![1.0 + (i % 2) as f64, 1.0]).collect()
}

#[test]
fn observations_do_not_leak_the_settling_price() {
    use ops_engine::model::params::{param_set, ParamValue};

    let config = ReplayConfig {
        obs_steps: 2,
        fee: 0.0,
        ..ReplayConfig::default()
    };
    let mut env = ReplayEnvironment::new(
        vec!["AAA".into(), "BBB".into()],
        "USD",
        alternating(12),
        config,
    )
    .unwrap();

    // chasing the last jump always buys the top
    let mut chaser = build_strategy(StrategyKind::LookAhead);
    let chased = evaluate(chaser.as_mut(), &mut env, 1, 0).unwrap();
    assert!(chased.mean < 0.1, "{:?}", chased);

    // fading it always buys the bottom
    let mut fader = build_strategy(StrategyKind::LookAhead);
    fader
        .set_params(&param_set([("mr", ParamValue::from("true"))]))
        .unwrap();
    let faded = evaluate(fader.as_mut(), &mut env, 1, 0).unwrap();
    assert!(faded.mean > 10.0, "{:?}", faded);
}
