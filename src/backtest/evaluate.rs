use serde::{Deserialize, Serialize};

use crate::backtest::Environment;
use crate::error::{OpsError, Result};
use crate::math::{mean, variance};
use crate::strategy::Strategy;

/// Cumulative reward of every episode, in episode order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStats {
    pub mean: f64,
    pub std: f64,
    pub rewards: Vec<f64>,
}

impl EpisodeStats {
    fn from_rewards(rewards: Vec<f64>) -> Self {
        Self {
            mean: mean(&rewards),
            std: variance(&rewards).sqrt(),
            rewards,
        }
    }
}

/// Runs `episodes` episodes of at most `max_steps` steps each (`0` runs to the
/// end of the data) and multiplies the per-step rewards of each episode.
/// At least one episode is required.
pub fn evaluate(
    strategy: &mut dyn Strategy,
    env: &mut dyn Environment,
    episodes: usize,
    max_steps: usize,
) -> Result<EpisodeStats> {
    if episodes == 0 {
        return Err(OpsError::Config(
            "evaluation needs at least one episode".to_string(),
        ));
    }
    let max_steps = if max_steps == 0 {
        env.data_length()
    } else {
        max_steps
    };

    let mut rewards = Vec::with_capacity(episodes);
    for _ in 0..episodes {
        env.reset_status();
        let mut obs = env.reset()?;
        strategy.reset();

        let mut episode_reward = 1.0;
        for _ in 0..max_steps {
            let weights = strategy.rebalance(&obs)?;
            let outcome = env.step(&weights)?;
            if let Some(error) = outcome.status.error {
                return Err(OpsError::Environment(error));
            }
            episode_reward *= outcome.reward;
            obs = outcome.observation;
            if outcome.done || outcome.status.out_of_data {
                break;
            }
        }
        rewards.push(episode_reward);
    }
    Ok(EpisodeStats::from_rewards(rewards))
}
