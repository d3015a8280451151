//! CMA-ES over the numeric box of one search leaf.
//!
//! The search distribution lives in unbounded coordinates; each coordinate is
//! mapped into its [`ParamRange`] with [`ParamRange::from_unbounded`]. The
//! optimiser is driven one candidate at a time: [`CmaEs::next_candidate`]
//! hands out the queued members of the current generation and
//! [`CmaEs::report`] collects their fitness, updating the distribution once
//! the whole generation has been scored.

use std::collections::VecDeque;

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::optimize::space::ParamRange;

const INITIAL_SIGMA: f64 = 0.6;
const SIGMA_BOUNDS: (f64, f64) = (1e-10, 10.0);

/// Population size, recombination weights and adaptation rates; all fixed by
/// the dimension.
#[derive(Debug, Clone)]
struct Rates {
    lambda: usize,
    weights: Vec<f64>,
    mu_eff: f64,
    c_sigma: f64,
    d_sigma: f64,
    c_c: f64,
    c_1: f64,
    c_mu: f64,
    /// Expected length of a standard normal vector.
    chi_n: f64,
}

impl Rates {
    fn for_dimension(dim: usize) -> Self {
        let n = dim as f64;
        let lambda = 4 + (3.0 * n.ln()).floor() as usize;
        let parents = lambda / 2;

        let log_ranks: Vec<f64> = (1..=parents)
            .map(|rank| (parents as f64 + 0.5).ln() - (rank as f64).ln())
            .collect();
        let total: f64 = log_ranks.iter().sum();
        let weights: Vec<f64> = log_ranks.iter().map(|w| w / total).collect();
        let mu_eff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let c_sigma = (mu_eff + 2.0) / (n + mu_eff + 5.0);
        let c_1 = 2.0 / ((n + 1.3).powi(2) + mu_eff);
        Self {
            lambda,
            mu_eff,
            c_sigma,
            d_sigma: 1.0 + c_sigma + 2.0 * (((mu_eff - 1.0) / (n + 1.0)).sqrt() - 1.0).max(0.0),
            c_c: (4.0 + mu_eff / n) / (n + 4.0 + 2.0 * mu_eff / n),
            c_1,
            c_mu: (2.0 * (mu_eff - 2.0 + 1.0 / mu_eff) / ((n + 2.0).powi(2) + mu_eff))
                .min(1.0 - c_1),
            chi_n: n.sqrt() * (1.0 - 1.0 / (4.0 * n) + 1.0 / (21.0 * n * n)),
            weights,
        }
    }
}

pub struct CmaEs {
    ranges: Vec<ParamRange>,
    rates: Rates,
    mean: DVector<f64>,
    sigma: f64,
    cov: DMatrix<f64>,
    path_c: DVector<f64>,
    path_sigma: DVector<f64>,
    /// `B·D` of the eigen decomposition of `cov`; maps standard normal
    /// draws onto the distribution.
    transform: DMatrix<f64>,
    /// `C^(-1/2) = B·D⁻¹·Bᵀ`.
    whiten: DMatrix<f64>,
    queue: VecDeque<DVector<f64>>,
    scored: Vec<(DVector<f64>, f64)>,
    generation: u64,
    rng: SmallRng,
}

impl CmaEs {
    /// Search over `ranges`, starting at their centres.
    pub fn new(ranges: Vec<ParamRange>, seed: u64) -> Self {
        let dim = ranges.len().max(1);
        let mut es = Self {
            rates: Rates::for_dimension(dim),
            mean: DVector::zeros(dim),
            sigma: INITIAL_SIGMA,
            cov: DMatrix::identity(dim, dim),
            path_c: DVector::zeros(dim),
            path_sigma: DVector::zeros(dim),
            transform: DMatrix::identity(dim, dim),
            whiten: DMatrix::identity(dim, dim),
            queue: VecDeque::new(),
            scored: Vec::new(),
            generation: 0,
            rng: SmallRng::seed_from_u64(seed),
            ranges,
        };
        es.refresh();
        es
    }

    /// Moves the mean to `start`, given in bounded coordinates.
    pub fn with_start(mut self, start: &[f64]) -> Self {
        for (i, range) in self.ranges.iter().enumerate() {
            if let Some(v) = start.get(i) {
                self.mean[i] = range.to_unbounded(*v);
            }
        }
        self
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn population_size(&self) -> usize {
        self.rates.lambda
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Next unscored member of the current generation, raw and decoded.
    /// Samples a fresh generation when the previous one is used up.
    pub fn next_candidate(&mut self) -> (DVector<f64>, Vec<f64>) {
        if self.queue.is_empty() {
            self.sample_generation();
        }
        let raw = self
            .queue
            .pop_front()
            .unwrap_or_else(|| self.mean.clone());
        let point = self.decode(&raw);
        (raw, point)
    }

    /// Records the fitness (higher is better) of a candidate handed out by
    /// [`Self::next_candidate`].
    pub fn report(&mut self, raw: DVector<f64>, fitness: f64) {
        if raw.len() != self.dimension() {
            tracing::warn!(
                expected = self.dimension(),
                got = raw.len(),
                "cma-es candidate of the wrong dimension ignored"
            );
            return;
        }
        let fitness = if fitness.is_finite() { fitness } else { f64::MIN };
        self.scored.push((raw, fitness));
        if self.queue.is_empty() && self.scored.len() >= self.rates.lambda {
            self.update();
        }
    }

    pub fn decode(&self, raw: &DVector<f64>) -> Vec<f64> {
        self.ranges
            .iter()
            .zip(raw.iter())
            .map(|(range, x)| range.from_unbounded(*x))
            .collect()
    }

    fn sample_generation(&mut self) {
        self.scored.clear();
        let dim = self.dimension();
        for _ in 0..self.rates.lambda {
            let z = DVector::<f64>::from_iterator(
                dim,
                (0..dim).map(|_| StandardNormal.sample(&mut self.rng)),
            );
            let x = &self.mean + self.sigma * (&self.transform * z);
            self.queue.push_back(x);
        }
    }

    /// Recomputes the sampling transform and the whitening matrix from `cov`.
    fn refresh(&mut self) {
        let eigen = SymmetricEigen::new(self.cov.clone());
        let scales = eigen.eigenvalues.map(|v| v.max(1e-20).sqrt());
        let basis = eigen.eigenvectors;
        self.transform = &basis * DMatrix::from_diagonal(&scales);
        self.whiten =
            &basis * DMatrix::from_diagonal(&scales.map(|s| 1.0 / s)) * basis.transpose();
    }

    fn update(&mut self) {
        let dim = self.dimension();
        let mut scored = std::mem::take(&mut self.scored);
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let r = self.rates.clone();

        // selected steps in units of sigma, best first
        let steps: Vec<DVector<f64>> = scored
            .iter()
            .take(r.weights.len())
            .map(|(x, _)| (x - &self.mean) / self.sigma)
            .collect();
        let shift = steps
            .iter()
            .zip(&r.weights)
            .fold(DVector::zeros(dim), |acc, (y, w)| acc + y * *w);
        self.mean += self.sigma * &shift;

        self.path_sigma = (1.0 - r.c_sigma) * &self.path_sigma
            + (r.c_sigma * (2.0 - r.c_sigma) * r.mu_eff).sqrt() * (&self.whiten * &shift);
        let sigma_len = self.path_sigma.norm();
        let decay = 1.0 - (1.0 - r.c_sigma).powi(2 * (self.generation as i32 + 1));
        let stalled = sigma_len / decay.sqrt() >= (1.4 + 2.0 / (dim as f64 + 1.0)) * r.chi_n;

        self.path_c *= 1.0 - r.c_c;
        if !stalled {
            self.path_c += (r.c_c * (2.0 - r.c_c) * r.mu_eff).sqrt() * &shift;
        }

        let rank_mu = steps
            .iter()
            .zip(&r.weights)
            .fold(DMatrix::zeros(dim, dim), |acc, (y, w)| {
                acc + *w * (y * y.transpose())
            });
        let keep = 1.0 - r.c_1 - r.c_mu
            + if stalled {
                r.c_1 * r.c_c * (2.0 - r.c_c)
            } else {
                0.0
            };
        let rank_one = &self.path_c * self.path_c.transpose();
        let cov = keep * &self.cov + r.c_1 * rank_one + r.c_mu * rank_mu;
        self.cov = (&cov + cov.transpose()) * 0.5;

        self.sigma = (self.sigma * ((r.c_sigma / r.d_sigma) * (sigma_len / r.chi_n - 1.0)).exp())
            .clamp(SIGMA_BOUNDS.0, SIGMA_BOUNDS.1);
        self.generation += 1;

        let finite = self.mean.iter().chain(self.cov.iter()).all(|v| v.is_finite());
        if !finite || !self.sigma.is_finite() {
            tracing::warn!(generation = self.generation, "cma-es state went non-finite, restarting");
            self.mean = DVector::zeros(dim);
            self.sigma = INITIAL_SIGMA;
            self.cov = DMatrix::identity(dim, dim);
            self.path_c = DVector::zeros(dim);
            self.path_sigma = DVector::zeros(dim);
        }
        self.refresh();
    }
}
