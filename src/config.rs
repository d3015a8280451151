use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::backtest::ReplayConfig;
use crate::model::params::ParamSet;
use crate::optimize::FitOptions;
use crate::strategy::StrategyKind;

/// Environment variable overriding the configuration file path.
pub const CONFIG_PATH_VAR: &str = "OPS_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub fit: FitConfig,
    pub market: MarketConfig,
    pub strategy: StrategySection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FitConfig {
    pub budget: usize,
    pub batch_size: usize,
    #[serde(default)]
    pub max_steps: usize,
    #[serde(default = "default_explore")]
    pub explore: f64,
    #[serde(default)]
    pub seed: u64,
}

fn default_explore() -> f64 {
    FitOptions::default().explore
}

/// Synthetic market the binary replays: geometric Brownian motion per asset.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    pub symbols: Vec<String>,
    pub fiat: String,
    pub rows: usize,
    pub obs_steps: usize,
    pub fee: f64,
    /// Per-row log drift.
    pub drift: f64,
    /// Per-row log volatility.
    pub volatility: f64,
    #[serde(default = "default_initial_fiat")]
    pub initial_fiat: f64,
    #[serde(default)]
    pub random_start: bool,
    #[serde(default)]
    pub seed: u64,
}

fn default_initial_fiat() -> f64 {
    ReplayConfig::default().initial_fiat
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySection {
    pub kind: StrategyKind,
    /// Applied before the search starts.
    #[serde(default)]
    pub params: ParamSet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_file() -> String {
    "ops-fit.log".to_string()
}

impl FitConfig {
    pub fn options(&self) -> FitOptions {
        FitOptions {
            budget: self.budget,
            batch_size: self.batch_size,
            max_steps: self.max_steps,
            explore: self.explore,
            seed: self.seed,
            ..FitOptions::default()
        }
    }
}

impl MarketConfig {
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for sym in &self.symbols {
            let s = sym.trim().to_ascii_uppercase();
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }

    pub fn replay(&self) -> ReplayConfig {
        ReplayConfig {
            obs_steps: self.obs_steps,
            fee: self.fee,
            initial_fiat: self.initial_fiat,
            random_start: self.random_start,
            seed: self.seed,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fit.budget == 0 {
            bail!("fit.budget must be > 0");
        }
        if self.fit.batch_size == 0 {
            bail!("fit.batch_size must be > 0");
        }
        if !(0.0..=1.0).contains(&self.fit.explore) {
            bail!("fit.explore must be within [0, 1], got {}", self.fit.explore);
        }
        if self.market.symbols().is_empty() {
            bail!("market.symbols must name at least one asset");
        }
        if self.market.fiat.trim().is_empty() {
            bail!("market.fiat must not be empty");
        }
        if self.market.obs_steps < 2 {
            bail!("market.obs_steps must be >= 2");
        }
        if self.market.rows <= self.market.obs_steps {
            bail!(
                "market.rows ({}) must exceed market.obs_steps ({})",
                self.market.rows,
                self.market.obs_steps
            );
        }
        if !(0.0..1.0).contains(&self.market.fee) {
            bail!("market.fee must be within [0, 1), got {}", self.market.fee);
        }
        if !self.market.volatility.is_finite() || self.market.volatility < 0.0 {
            bail!("market.volatility must be a non-negative number");
        }
        Ok(())
    }
}
