use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backtest::{evaluate, Environment};
use crate::error::{OpsError, Result};
use crate::model::params::ParamSet;
use crate::optimize::cma_es::CmaEs;
use crate::optimize::space::{Constraint, SearchLeaf, SearchSpace};
use crate::strategy::Strategy;

/// Shared flag checked between evaluations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Evaluations to run, constraint violations included.
    pub budget: usize,
    /// Episodes per evaluation.
    pub batch_size: usize,
    /// Steps per episode, `0` runs to the end of the data.
    pub max_steps: usize,
    /// Probability of visiting a random leaf instead of the best one.
    pub explore: f64,
    /// Objective reported for candidates that break a constraint.
    pub violation_reward: f64,
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            budget: 100,
            batch_size: 1,
            max_steps: 0,
            explore: 0.2,
            violation_reward: -100.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub evaluation: usize,
    pub leaf: String,
    pub params: ParamSet,
    pub reward: f64,
    pub reward_std: f64,
    /// Name of the first constraint the candidate broke.
    pub violated: Option<String>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub run_id: Uuid,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Best candidate the strategy accepted and was scored on; empty when
    /// every candidate was rejected.
    pub best_params: ParamSet,
    pub best_reward: Option<f64>,
    pub evaluations: usize,
    pub cancelled: bool,
    pub trace: Vec<TraceEntry>,
}

/// Search state of one leaf of the space.
struct LeafSearch {
    leaf: SearchLeaf,
    es: Option<CmaEs>,
    evaluations: usize,
    best: f64,
}

impl LeafSearch {
    fn new(leaf: SearchLeaf, seed: u64) -> Self {
        let es = (leaf.dimension() > 0).then(|| {
            let ranges = leaf.ranges.iter().map(|(_, r)| *r).collect();
            CmaEs::new(ranges, seed)
        });
        Self {
            leaf,
            es,
            evaluations: 0,
            best: f64::NEG_INFINITY,
        }
    }

    /// Visited at least one full generation (one evaluation without numeric
    /// dimensions).
    fn is_warm(&self) -> bool {
        match &self.es {
            Some(es) => es.generation() > 0,
            None => self.evaluations > 0,
        }
    }

    fn next_candidate(&mut self) -> (Option<DVector<f64>>, ParamSet) {
        match self.es.as_mut() {
            Some(es) => {
                let (raw, point) = es.next_candidate();
                (Some(raw), self.leaf.params(&point))
            }
            None => (None, self.leaf.params(&[])),
        }
    }

    fn record(&mut self, raw: Option<DVector<f64>>, reward: f64) {
        self.evaluations += 1;
        self.best = self.best.max(reward);
        if let (Some(raw), Some(es)) = (raw, self.es.as_mut()) {
            es.report(raw, reward);
        }
    }
}

fn pick_leaf(leaves: &[LeafSearch], explore: f64, rng: &mut SmallRng) -> usize {
    if let Some(cold) = leaves.iter().position(|l| !l.is_warm()) {
        return cold;
    }
    if leaves.len() > 1 && rng.gen::<f64>() < explore {
        return rng.gen_range(0..leaves.len());
    }
    leaves
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, top), (i, l)| {
            if l.best > top {
                (i, l.best)
            } else {
                (best, top)
            }
        })
        .0
}

/// Searches `space` for the parameters with the highest mean episode reward
/// of `strategy` on `env`, applies them and reports the run.
///
/// The environment is in training mode for the duration of the search and
/// leaves it with training off, whatever the outcome.
pub fn fit(
    strategy: &mut dyn Strategy,
    env: &mut dyn Environment,
    space: &SearchSpace,
    constraints: &[Constraint],
    options: &FitOptions,
    cancel: &CancelToken,
) -> Result<FitReport> {
    env.set_training(true);
    let result = run_search(strategy, env, space, constraints, options, cancel);
    env.set_training(false);
    result
}

fn run_search(
    strategy: &mut dyn Strategy,
    env: &mut dyn Environment,
    space: &SearchSpace,
    constraints: &[Constraint],
    options: &FitOptions,
    cancel: &CancelToken,
) -> Result<FitReport> {
    if options.batch_size == 0 {
        return Err(OpsError::Config("batch_size must be at least 1".to_string()));
    }
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let mut leaves: Vec<LeafSearch> = space
        .leaves()?
        .into_iter()
        .enumerate()
        .map(|(i, leaf)| LeafSearch::new(leaf, options.seed.wrapping_add(i as u64)))
        .collect();
    if leaves.is_empty() {
        return Err(OpsError::Config("search space has no leaves".to_string()));
    }
    let mut rng = SmallRng::seed_from_u64(options.seed);

    tracing::info!(
        run_id = %run_id,
        strategy = strategy.name(),
        leaves = leaves.len(),
        budget = options.budget,
        batch_size = options.batch_size,
        "Starting hyperparameter search"
    );

    let mut trace = Vec::with_capacity(options.budget);
    let mut best: Option<(ParamSet, f64)> = None;
    let mut cancelled = false;
    let mut reward_sum = 0.0;

    for evaluation in 0..options.budget {
        if cancel.is_cancelled() {
            tracing::warn!(run_id = %run_id, evaluation, "Search cancelled");
            cancelled = true;
            break;
        }

        let idx = pick_leaf(&leaves, options.explore, &mut rng);
        let (raw, params) = leaves[idx].next_candidate();

        let mut violated = constraints
            .iter()
            .find(|c| !c.is_satisfied(&params))
            .map(|c| c.name().to_string());
        if violated.is_none() {
            if let Err(e) = strategy.set_params(&params) {
                match e {
                    OpsError::Config(msg) => {
                        tracing::warn!(error = %msg, "Candidate rejected by the strategy");
                        violated = Some(msg);
                    }
                    other => return Err(other),
                }
            }
        }

        let (reward, reward_std) = match violated {
            Some(_) => (options.violation_reward, 0.0),
            None => {
                let stats = evaluate(strategy, env, options.batch_size, options.max_steps)?;
                (stats.mean, stats.std)
            }
        };
        leaves[idx].record(raw, reward);
        reward_sum += reward;

        if violated.is_none() && best.as_ref().map_or(true, |(_, r)| reward > *r) {
            best = Some((params.clone(), reward));
        }

        tracing::info!(
            run_id = %run_id,
            evaluation = evaluation + 1,
            budget = options.budget,
            leaf = %leaves[idx].leaf.label(),
            reward,
            reward_std,
            mean_reward = reward_sum / (evaluation + 1) as f64,
            "Evaluation finished"
        );
        trace.push(TraceEntry {
            evaluation,
            leaf: leaves[idx].leaf.label(),
            params,
            reward,
            reward_std,
            violated,
            timestamp_ms: Utc::now().timestamp_millis(),
        });
    }

    let (best_params, best_reward) = match best {
        Some((params, reward)) => {
            strategy.set_params(&params)?;
            (params, Some(reward))
        }
        None => {
            tracing::warn!(run_id = %run_id, "No candidate was accepted, parameters left unchanged");
            (ParamSet::new(), None)
        }
    };

    tracing::info!(
        run_id = %run_id,
        best_reward = ?best_reward,
        evaluations = trace.len(),
        cancelled,
        "Hyperparameter search finished"
    );

    Ok(FitReport {
        run_id,
        strategy: strategy.name().to_string(),
        started_at,
        finished_at: Utc::now(),
        best_params,
        best_reward,
        evaluations: trace.len(),
        cancelled,
        trace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::space::ParamRange;

    #[test]
    fn leaf_tells_after_full_generation() {
        let space = SearchSpace::params([("x", ParamRange::real(0.0, 1.0))]);
        let leaf = space.leaves().unwrap().remove(0);
        let mut search = LeafSearch::new(leaf, 1);
        let size = search.es.as_ref().unwrap().population_size();
        for _ in 0..size {
            assert!(!search.is_warm());
            let (raw, params) = search.next_candidate();
            assert!(params.contains_key("x"));
            search.record(raw, 0.0);
        }
        assert!(search.is_warm());
    }

    #[test]
    fn cold_leaves_come_first() {
        let space = SearchSpace::choice(
            "k",
            [("a", SearchSpace::empty()), ("b", SearchSpace::empty())],
        );
        let mut leaves: Vec<LeafSearch> = space
            .leaves()
            .unwrap()
            .into_iter()
            .map(|l| LeafSearch::new(l, 0))
            .collect();
        let mut rng = SmallRng::seed_from_u64(0);
        assert_eq!(pick_leaf(&leaves, 0.0, &mut rng), 0);
        leaves[0].record(None, 1.0);
        assert_eq!(pick_leaf(&leaves, 0.0, &mut rng), 1);
        leaves[1].record(None, 2.0);
        assert_eq!(pick_leaf(&leaves, 0.0, &mut rng), 1);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
