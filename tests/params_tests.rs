use ops_engine::error::OpsError;
use ops_engine::model::params::{param_set, ParamValue};
use ops_engine::strategy::{build_strategy, Strategy, StrategyKind};

fn is_config_error<T: std::fmt::Debug>(r: ops_engine::error::Result<T>) -> bool {
    matches!(r, Err(OpsError::Config(_)))
}

#[test]
fn unknown_key_is_rejected() {
    let mut pamr = build_strategy(StrategyKind::Pamr);
    let params = param_set([
        ("eps", ParamValue::Number(0.1)),
        ("variant", ParamValue::from("PAMR0")),
        ("gamma", ParamValue::Number(1.0)),
    ]);
    assert!(is_config_error(pamr.set_params(&params)));
}

#[test]
fn missing_required_key_is_rejected() {
    let mut pamr = build_strategy(StrategyKind::Pamr);
    let err = pamr
        .set_params(&param_set([("eps", ParamValue::Number(0.1))]))
        .unwrap_err();
    assert!(err.to_string().contains("variant"), "{}", err);
}

#[test]
fn unknown_choice_is_rejected() {
    let mut pamr = build_strategy(StrategyKind::Pamr);
    let params = param_set([
        ("eps", ParamValue::Number(0.1)),
        ("variant", ParamValue::from("PAMR9")),
    ]);
    assert!(is_config_error(pamr.set_params(&params)));

    let mut momentum = build_strategy(StrategyKind::Momentum);
    let params = param_set([
        ("alpha_v", ParamValue::Number(1.0)),
        ("alpha_a", ParamValue::Number(1.0)),
        ("mean_type", ParamValue::from("lstm")),
        ("ma1", ParamValue::Number(2.0)),
        ("ma2", ParamValue::Number(4.0)),
        ("std_span", ParamValue::Number(3.0)),
    ]);
    assert!(is_config_error(momentum.set_params(&params)));
}

#[test]
fn number_where_choice_expected_is_rejected() {
    let mut pamr = build_strategy(StrategyKind::Pamr);
    let params = param_set([
        ("eps", ParamValue::Number(0.1)),
        ("variant", ParamValue::Number(1.0)),
    ]);
    assert!(is_config_error(pamr.set_params(&params)));
}

#[test]
fn out_of_range_values_are_rejected() {
    let mut mw = build_strategy(StrategyKind::MultiplicativeWeights);
    assert!(is_config_error(
        mw.set_params(&param_set([("lr", ParamValue::Number(-0.5))]))
    ));
    assert!(is_config_error(
        mw.set_params(&param_set([("lr", ParamValue::Number(f64::NAN))]))
    ));
    assert!(mw
        .set_params(&param_set([("lr", ParamValue::Number(0.5))]))
        .is_ok());
}

#[test]
fn rejected_params_leave_the_strategy_usable() {
    let mut momentum = build_strategy(StrategyKind::Momentum);
    let bad = param_set([
        ("alpha_v", ParamValue::Number(1.0)),
        ("alpha_a", ParamValue::Number(1.0)),
        ("mean_type", ParamValue::from("simple")),
        ("ma1", ParamValue::Number(1.0)),
        ("ma2", ParamValue::Number(4.0)),
        ("std_span", ParamValue::Number(3.0)),
    ]);
    assert!(is_config_error(momentum.set_params(&bad)));

    let good = param_set([
        ("alpha_v", ParamValue::Number(1.0)),
        ("alpha_a", ParamValue::Number(1.0)),
        ("mean_type", ParamValue::from("exp")),
        ("ma1", ParamValue::Number(2.9)),
        ("ma2", ParamValue::Number(4.0)),
        ("std_span", ParamValue::Number(3.0)),
    ]);
    assert!(momentum.set_params(&good).is_ok());
}

#[test]
fn mixture_rejects_out_of_range_index() {
    let mut mixture = build_strategy(StrategyKind::LinearMixture);
    assert!(is_config_error(
        mixture.set_params(&param_set([("w_2", ParamValue::Number(1.0))]))
    ));
    assert!(is_config_error(
        mixture.set_params(&param_set([("w_0", ParamValue::Number(-1.0))]))
    ));
    assert!(is_config_error(
        mixture.set_params(&param_set([("weights", ParamValue::Number(1.0))]))
    ));
    assert!(mixture
        .set_params(&param_set([
            ("w_0", ParamValue::Number(2.0)),
            ("w_1", ParamValue::Number(0.5)),
        ]))
        .is_ok());
}

#[test]
fn mixture_forwards_indexed_keys() {
    let mut mixture = build_strategy(StrategyKind::LinearMixture);
    let ok = param_set([
        ("eps_0", ParamValue::Number(0.1)),
        ("variant_0", ParamValue::from("PAMR2")),
    ]);
    assert!(mixture.set_params(&ok).is_ok());

    let missing = param_set([("eps_0", ParamValue::Number(0.1))]);
    assert!(is_config_error(mixture.set_params(&missing)));
}
