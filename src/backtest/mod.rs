//! Backtest environment contract and the episode runner.

pub mod evaluate;
pub mod replay;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::observation::Observation;

pub use evaluate::{evaluate, EpisodeStats};
pub use replay::{ReplayConfig, ReplayEnvironment};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvStatus {
    /// The series has no row left to step into.
    pub out_of_data: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub observation: Observation,
    /// Portfolio value ratio across the step.
    pub reward: f64,
    pub done: bool,
    pub status: EnvStatus,
}

/// Market the strategies trade against.
pub trait Environment {
    /// Starts a new episode and returns its first window.
    fn reset(&mut self) -> Result<Observation>;

    fn reset_status(&mut self);

    fn observation(&self) -> Result<Observation>;

    /// Trades to `weights` (fiat last) and moves one row forward.
    fn step(&mut self, weights: &[f64]) -> Result<StepOutcome>;

    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    /// Rows in the underlying series.
    fn data_length(&self) -> usize;
}
