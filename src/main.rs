use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use ops_engine::backtest::ReplayEnvironment;
use ops_engine::config::{Config, MarketConfig};
use ops_engine::optimize::{fit, CancelToken};
use ops_engine::strategy::{build_strategy, default_constraints, default_search_space};

/// Open prices following a geometric Brownian motion per asset, starting at 1.
fn synthetic_prices(market: &MarketConfig, n_assets: usize) -> Result<Vec<Vec<f64>>> {
    let step = Normal::new(market.drift, market.volatility)
        .context("market.drift / market.volatility do not form a normal distribution")?;
    let mut rng = SmallRng::seed_from_u64(market.seed);

    let mut rows = Vec::with_capacity(market.rows);
    let mut last = vec![1.0; n_assets];
    for _ in 0..market.rows {
        rows.push(last.clone());
        for p in last.iter_mut() {
            let r: f64 = step.sample(&mut rng);
            *p *= r.exp();
        }
    }
    Ok(rows)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set OPS_CONFIG or provide config/default.toml");
            std::process::exit(1);
        }
    };

    let log_file = std::fs::File::create(&config.logging.file)
        .with_context(|| format!("failed to create {}", config.logging.file))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
            }),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .json()
        .init();

    let symbols = config.market.symbols();
    let kind = config.strategy.kind;
    tracing::info!(
        strategy = %kind,
        symbols = ?symbols,
        fiat = %config.market.fiat,
        rows = config.market.rows,
        obs_steps = config.market.obs_steps,
        "Starting ops-fit"
    );

    let prices = synthetic_prices(&config.market, symbols.len())?;
    let env = ReplayEnvironment::new(symbols, &config.market.fiat, prices, config.market.replay())
        .context("failed to build the replay environment")?;

    let mut strategy = build_strategy(kind);
    if !config.strategy.params.is_empty() {
        strategy
            .set_params(&config.strategy.params)
            .with_context(|| format!("strategy.params rejected by {}", kind))?;
    }
    let space = default_search_space(kind, config.market.obs_steps);
    let constraints = default_constraints(kind);
    let options = config.fit.options();

    let cancel = CancelToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Ctrl+C received");
        ctrl_c_cancel.cancel();
    });

    let report = tokio::task::spawn_blocking(move || {
        let mut env = env;
        fit(
            strategy.as_mut(),
            &mut env,
            &space,
            &constraints,
            &options,
            &cancel,
        )
    })
    .await
    .context("fit task panicked")?
    .context("hyperparameter search failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::info!(run_id = %report.run_id, "Shutdown complete");
    eprintln!("Done. Check {} for details.", config.logging.file);
    Ok(())
}
