//! General constrained local minimisation over the probability simplex.
//!
//! Objective and constraints are closures; gradients are central finite
//! differences. Extra constraints (`c(w) >= 0`, `h(w) = 0`) go through an
//! augmented Lagrangian, the simplex itself through projection. Inner steps
//! are projected gradient with backtracking.

use crate::math::qp::SolveStatus;
use crate::math::simplex::simplex_proj;

type ScalarFn<'a> = Box<dyn Fn(&[f64]) -> f64 + 'a>;

#[derive(Debug, Clone, Copy)]
pub struct MinimizeOptions {
    pub max_outer: usize,
    pub max_inner: usize,
    pub grad_step: f64,
    pub step_tol: f64,
    pub feas_tol: f64,
    pub rho: f64,
    pub rho_max: f64,
}

impl Default for MinimizeOptions {
    fn default() -> Self {
        Self {
            max_outer: 25,
            max_inner: 400,
            grad_step: 1e-7,
            step_tol: 1e-10,
            feas_tol: 1e-6,
            rho: 10.0,
            rho_max: 1e8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MinimizeResult {
    pub x: Vec<f64>,
    pub status: SolveStatus,
    pub objective: f64,
    pub violation: f64,
}

pub struct ConstrainedMinimizer<'a> {
    objective: ScalarFn<'a>,
    ineq: Vec<ScalarFn<'a>>,
    eq: Vec<ScalarFn<'a>>,
    opts: MinimizeOptions,
}

impl<'a> ConstrainedMinimizer<'a> {
    pub fn new(objective: impl Fn(&[f64]) -> f64 + 'a) -> Self {
        Self {
            objective: Box::new(objective),
            ineq: Vec::new(),
            eq: Vec::new(),
            opts: MinimizeOptions::default(),
        }
    }

    pub fn options(mut self, opts: MinimizeOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Adds `c(w) >= 0`.
    pub fn with_ineq(mut self, c: impl Fn(&[f64]) -> f64 + 'a) -> Self {
        self.ineq.push(Box::new(c));
        self
    }

    /// Adds `h(w) = 0`.
    pub fn with_eq(mut self, h: impl Fn(&[f64]) -> f64 + 'a) -> Self {
        self.eq.push(Box::new(h));
        self
    }

    pub fn minimize(&self, x0: &[f64]) -> MinimizeResult {
        let opts = self.opts;
        let mut x = simplex_proj(x0);
        let mut nu = vec![0.0; self.eq.len()];
        let mut mu = vec![0.0; self.ineq.len()];
        let mut rho = opts.rho;
        let has_rows = !self.eq.is_empty() || !self.ineq.is_empty();
        let rounds = if has_rows { opts.max_outer } else { 1 };
        let mut converged = false;
        let mut prev_violation = f64::INFINITY;

        for _ in 0..rounds {
            converged = self.inner_loop(&mut x, &nu, &mu, rho);
            if !has_rows {
                break;
            }
            let violation = self.violation(&x);
            for (j, h) in self.eq.iter().enumerate() {
                nu[j] += rho * h(&x);
            }
            for (i, c) in self.ineq.iter().enumerate() {
                mu[i] = (mu[i] - rho * c(&x)).max(0.0);
            }
            if violation < opts.feas_tol && converged {
                break;
            }
            if violation > 0.25 * prev_violation {
                rho = (rho * 10.0).min(opts.rho_max);
            }
            prev_violation = violation;
        }

        let violation = self.violation(&x);
        let status = if converged && violation < opts.feas_tol {
            SolveStatus::Optimal
        } else {
            SolveStatus::MaxIterations
        };
        MinimizeResult {
            objective: (self.objective)(&x),
            x,
            status,
            violation,
        }
    }

    fn inner_loop(&self, x: &mut Vec<f64>, nu: &[f64], mu: &[f64], rho: f64) -> bool {
        let opts = self.opts;
        let mut step: f64 = 1.0;
        let mut value = self.lagrangian(x, nu, mu, rho);
        for _ in 0..opts.max_inner {
            let grad = self.numeric_grad(x, nu, mu, rho);
            let mut accepted = false;
            step = (step * 2.0).min(1e6);
            let mut candidate = x.clone();
            let mut cand_value = value;
            for _ in 0..60 {
                let trial: Vec<f64> = x.iter().zip(&grad).map(|(xi, gi)| xi - step * gi).collect();
                candidate = simplex_proj(&trial);
                cand_value = self.lagrangian(&candidate, nu, mu, rho);
                let linear: f64 = grad
                    .iter()
                    .zip(candidate.iter().zip(x.iter()))
                    .map(|(g, (c, xi))| g * (c - xi))
                    .sum();
                let dist2: f64 = candidate
                    .iter()
                    .zip(x.iter())
                    .map(|(c, xi)| (c - xi).powi(2))
                    .sum();
                if cand_value.is_finite() && cand_value <= value + linear + dist2 / (2.0 * step) {
                    accepted = true;
                    break;
                }
                step *= 0.5;
            }
            if !accepted {
                return true;
            }
            let moved: f64 = candidate
                .iter()
                .zip(x.iter())
                .map(|(c, xi)| (c - xi).powi(2))
                .sum::<f64>()
                .sqrt();
            *x = candidate;
            value = cand_value;
            if moved < opts.step_tol {
                return true;
            }
        }
        false
    }

    fn lagrangian(&self, x: &[f64], nu: &[f64], mu: &[f64], rho: f64) -> f64 {
        let f = (self.objective)(x);
        let f = if f.is_finite() { f } else { f64::INFINITY };
        let eq: f64 = self
            .eq
            .iter()
            .zip(nu)
            .map(|(h, n)| {
                let v = h(x);
                n * v + 0.5 * rho * v * v
            })
            .sum();
        let ineq: f64 = self
            .ineq
            .iter()
            .zip(mu)
            .map(|(c, m)| {
                let v = c(x);
                if v <= m / rho {
                    -m * v + 0.5 * rho * v * v
                } else {
                    -m * m / (2.0 * rho)
                }
            })
            .sum();
        f + eq + ineq
    }

    fn numeric_grad(&self, x: &[f64], nu: &[f64], mu: &[f64], rho: f64) -> Vec<f64> {
        let h = self.opts.grad_step;
        let mut shifted = x.to_vec();
        (0..x.len())
            .map(|i| {
                let orig = shifted[i];
                shifted[i] = orig + h;
                let up = self.lagrangian(&shifted, nu, mu, rho);
                shifted[i] = orig - h;
                let down = self.lagrangian(&shifted, nu, mu, rho);
                shifted[i] = orig;
                let g = (up - down) / (2.0 * h);
                if g.is_finite() {
                    g
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn violation(&self, x: &[f64]) -> f64 {
        let eq = self.eq.iter().map(|h| h(x).abs()).fold(0.0, f64::max);
        let ineq = self.ineq.iter().map(|c| (-c(x)).max(0.0)).fold(0.0, f64::max);
        eq.max(ineq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimizes_quadratic_over_simplex() {
        let target = [0.7, 0.2, 0.1];
        let res = ConstrainedMinimizer::new(|w: &[f64]| {
            w.iter().zip(target.iter()).map(|(a, b)| (a - b).powi(2)).sum()
        })
        .minimize(&[1.0 / 3.0; 3]);
        for (a, b) in res.x.iter().zip(target.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn respects_inequality_constraint() {
        // push weight to asset 0, but cap it at 0.6
        let res = ConstrainedMinimizer::new(|w: &[f64]| -w[0])
            .with_ineq(|w: &[f64]| 0.6 - w[0])
            .minimize(&[0.5, 0.5]);
        assert!(res.x[0] <= 0.6 + 1e-4, "{:?}", res.x);
        assert!(res.x[0] > 0.55, "{:?}", res.x);
        assert!((res.x.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn respects_equality_constraint() {
        let res = ConstrainedMinimizer::new(|w: &[f64]| w.iter().map(|v| v * v).sum())
            .with_eq(|w: &[f64]| w[0] - 0.5)
            .minimize(&[1.0 / 3.0; 3]);
        assert!((res.x[0] - 0.5).abs() < 1e-4, "{:?}", res.x);
        assert!((res.x[1] - 0.25).abs() < 1e-3);
    }
}
