use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::backtest::{EnvStatus, Environment, StepOutcome};
use crate::error::{OpsError, Result};
use crate::math::{array_normalize, safe_div};
use crate::model::observation::{Observation, ObservationRow};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Rows in every observation window.
    pub obs_steps: usize,
    /// Proportional fee charged on the traded value.
    pub fee: f64,
    pub initial_fiat: f64,
    /// Start each episode at a random row instead of the first full window.
    pub random_start: bool,
    pub seed: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            obs_steps: 20,
            fee: 0.0025,
            initial_fiat: 100.0,
            random_start: false,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Account {
    holdings: Vec<f64>,
    fiat: f64,
}

impl Account {
    fn value(&self, prices: &[f64]) -> f64 {
        self.fiat
            + self
                .holdings
                .iter()
                .zip(prices)
                .map(|(h, p)| h * p)
                .sum::<f64>()
    }
}

/// Replays an in-memory open-price matrix, rows oldest first.
#[derive(Debug, Clone)]
pub struct ReplayEnvironment {
    symbols: Vec<String>,
    fiat: String,
    prices: Vec<Vec<f64>>,
    config: ReplayConfig,
    /// Account at every row, as held at that row's open.
    accounts: Vec<Account>,
    cursor: usize,
    rng: SmallRng,
    training: bool,
    status: EnvStatus,
}

impl ReplayEnvironment {
    pub fn new(
        symbols: Vec<String>,
        fiat: &str,
        prices: Vec<Vec<f64>>,
        config: ReplayConfig,
    ) -> Result<Self> {
        if config.obs_steps < 2 {
            return Err(OpsError::Config(format!(
                "obs_steps = {} must be at least 2",
                config.obs_steps
            )));
        }
        if prices.len() <= config.obs_steps {
            return Err(OpsError::DataInsufficiency {
                needed: config.obs_steps + 1,
                available: prices.len(),
            });
        }
        if let Some(i) = prices.iter().position(|row| {
            row.len() != symbols.len() || row.iter().any(|p| !p.is_finite() || *p <= 0.0)
        }) {
            return Err(OpsError::Shape(format!(
                "price row {} is not {} positive prices",
                i,
                symbols.len()
            )));
        }
        if !(0.0..1.0).contains(&config.fee) || config.initial_fiat <= 0.0 {
            return Err(OpsError::Config(format!(
                "fee = {} and initial_fiat = {} out of range",
                config.fee, config.initial_fiat
            )));
        }

        let rng = SmallRng::seed_from_u64(config.seed);
        let mut env = Self {
            symbols,
            fiat: fiat.to_string(),
            prices,
            config,
            accounts: Vec::new(),
            cursor: 0,
            rng,
            training: false,
            status: EnvStatus::default(),
        };
        env.reset_accounts();
        Ok(env)
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Index of the last row of the current window.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn status(&self) -> &EnvStatus {
        &self.status
    }

    pub fn portfolio_value(&self) -> f64 {
        self.accounts[self.cursor].value(&self.prices[self.cursor])
    }

    fn reset_accounts(&mut self) {
        let start = Account {
            holdings: vec![0.0; self.symbols.len()],
            fiat: self.config.initial_fiat,
        };
        self.accounts = vec![start; self.prices.len()];
        self.cursor = self.config.obs_steps - 1;
    }

    fn fail(&mut self, message: String) -> Result<StepOutcome> {
        tracing::warn!(error = %message, cursor = self.cursor, "rejected action");
        self.status.error = Some(message);
        Ok(StepOutcome {
            observation: self.observation()?,
            reward: 1.0,
            done: true,
            status: self.status.clone(),
        })
    }
}

impl Environment for ReplayEnvironment {
    fn reset(&mut self) -> Result<Observation> {
        self.reset_accounts();
        if self.config.random_start {
            let first = self.config.obs_steps - 1;
            let last = self.prices.len() - 2;
            self.cursor = self.rng.gen_range(first..=last);
        }
        self.status.out_of_data = false;
        self.observation()
    }

    fn reset_status(&mut self) {
        self.status = EnvStatus::default();
    }

    fn observation(&self) -> Result<Observation> {
        let first = self.cursor + 1 - self.config.obs_steps;
        let rows = (first..=self.cursor)
            .map(|i| {
                let account = &self.accounts[i];
                ObservationRow::new(self.prices[i].clone(), account.holdings.clone(), account.fiat)
            })
            .collect();
        Observation::new(self.symbols.clone(), &self.fiat, rows)
    }

    fn step(&mut self, weights: &[f64]) -> Result<StepOutcome> {
        if self.status.out_of_data {
            return Err(OpsError::Environment(
                "step called after the end of the series".to_string(),
            ));
        }
        let n = self.symbols.len();
        if weights.len() != n + 1 {
            return self.fail(format!("{} weights for {} assets", weights.len(), n + 1));
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return self.fail("non-finite portfolio weight".to_string());
        }
        let target = array_normalize(&weights.iter().map(|w| w.max(0.0)).collect::<Vec<_>>());

        let t = self.cursor;
        let price = &self.prices[t];
        let value = self.accounts[t].value(price);
        let turnover: f64 = (0..n)
            .map(|i| (target[i] - safe_div(self.accounts[t].holdings[i] * price[i], value)).abs())
            .sum();
        let net = value * (1.0 - self.config.fee * turnover);

        let traded = Account {
            holdings: (0..n).map(|i| safe_div(target[i] * net, price[i])).collect(),
            fiat: target[n] * net,
        };
        let next_value = traded.value(&self.prices[t + 1]);
        self.accounts[t] = traded.clone();
        self.accounts[t + 1] = traded;
        self.cursor = t + 1;

        let reward = safe_div(next_value, value);
        let done = self.cursor + 1 >= self.prices.len();
        self.status.out_of_data = done;

        Ok(StepOutcome {
            observation: self.observation()?,
            reward,
            done,
            status: self.status.clone(),
        })
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn data_length(&self) -> usize {
        self.prices.len()
    }
}
