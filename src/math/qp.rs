//! Small dense convex quadratic programs, solved with clarabel.
//!
//! `min 0.5 x'Px + q'x` over either the probability simplex or the
//! non-negative orthant, with extra equality rows `a'x = b` and inequality
//! rows `g'x >= h`. In clarabel's `Ax + s = b, s in K` form the equalities
//! (the simplex sum included) go to a zero cone and everything else to one
//! non-negative cone.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{OpsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QpDomain {
    Simplex,
    NonNegative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Optimal,
    /// Solved to the reduced tolerances only.
    Inaccurate,
    MaxIterations,
    /// Stalled or hit a numerical error; the point is the last iterate.
    Stalled,
}

#[derive(Debug, Clone)]
pub struct QpProblem {
    pub p: DMatrix<f64>,
    pub q: DVector<f64>,
    pub domain: QpDomain,
    pub eq: Vec<(DVector<f64>, f64)>,
    pub ineq: Vec<(DVector<f64>, f64)>,
}

impl QpProblem {
    pub fn new(p: DMatrix<f64>, q: DVector<f64>, domain: QpDomain) -> Self {
        Self {
            p,
            q,
            domain,
            eq: Vec::new(),
            ineq: Vec::new(),
        }
    }

    pub fn with_eq(mut self, a: DVector<f64>, b: f64) -> Self {
        self.eq.push((a, b));
        self
    }

    /// Adds the row `g'x >= h`.
    pub fn with_ineq(mut self, g: DVector<f64>, h: f64) -> Self {
        self.ineq.push((g, h));
        self
    }

    fn dimension(&self) -> usize {
        self.q.len()
    }

    fn validate(&self) -> Result<()> {
        let n = self.dimension();
        if n == 0 {
            return Err(OpsError::Shape("empty quadratic program".to_string()));
        }
        if self.p.nrows() != n || self.p.ncols() != n {
            return Err(OpsError::Shape(format!(
                "hessian is {}x{}, linear term has {} entries",
                self.p.nrows(),
                self.p.ncols(),
                n
            )));
        }
        for (row, _) in self.eq.iter().chain(self.ineq.iter()) {
            if row.len() != n {
                return Err(OpsError::Shape(format!(
                    "constraint row has {} entries, expected {}",
                    row.len(),
                    n
                )));
            }
        }
        let finite = self.p.iter().chain(self.q.iter()).all(|v| v.is_finite())
            && self
                .eq
                .iter()
                .chain(self.ineq.iter())
                .all(|(row, rhs)| rhs.is_finite() && row.iter().all(|v| v.is_finite()));
        if !finite {
            return Err(OpsError::Numerical(
                "quadratic program has non-finite data".to_string(),
            ));
        }
        Ok(())
    }

    /// Stacked constraint matrix, right-hand side and the number of leading
    /// equality rows.
    fn constraints(&self) -> (DMatrix<f64>, Vec<f64>, usize) {
        let n = self.dimension();
        let mut rows: Vec<(Vec<f64>, f64)> = Vec::new();

        for (a, b) in &self.eq {
            rows.push((a.iter().copied().collect(), *b));
        }
        if self.domain == QpDomain::Simplex {
            rows.push((vec![1.0; n], 1.0));
        }
        let n_eq = rows.len();

        for (g, h) in &self.ineq {
            rows.push((g.iter().map(|v| -v).collect(), -h));
        }
        for j in 0..n {
            let mut row = vec![0.0; n];
            row[j] = -1.0;
            rows.push((row, 0.0));
        }

        let a = DMatrix::from_fn(rows.len(), n, |i, j| rows[i].0[j]);
        let b = rows.iter().map(|(_, rhs)| *rhs).collect();
        (a, b, n_eq)
    }

    fn violation(&self, x: &DVector<f64>) -> f64 {
        let eq = self
            .eq
            .iter()
            .map(|(a, b)| (a.dot(x) - b).abs())
            .fold(0.0, f64::max);
        let ineq = self
            .ineq
            .iter()
            .map(|(g, h)| (h - g.dot(x)).max(0.0))
            .fold(0.0, f64::max);
        let simplex = match self.domain {
            QpDomain::Simplex => (x.sum() - 1.0).abs(),
            QpDomain::NonNegative => 0.0,
        };
        let sign = x.iter().map(|v| (-v).max(0.0)).fold(0.0, f64::max);
        eq.max(ineq).max(simplex).max(sign)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QpOptions {
    pub max_iter: u32,
    pub tol_gap_abs: f64,
    pub tol_gap_rel: f64,
    pub tol_feas: f64,
}

impl Default for QpOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol_gap_abs: 1e-8,
            tol_gap_rel: 1e-8,
            tol_feas: 1e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub x: DVector<f64>,
    pub status: SolveStatus,
    pub objective: f64,
    pub violation: f64,
}

/// Dense to compressed-column, dropping exact zeros. With `upper` only the
/// upper triangle is kept, which is what clarabel reads for `P`.
fn to_csc(m: &DMatrix<f64>, upper: bool) -> CscMatrix<f64> {
    let mut colptr = vec![0];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for j in 0..m.ncols() {
        let last = if upper { j + 1 } else { m.nrows() };
        for i in 0..last {
            let v = m[(i, j)];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr.push(nzval.len());
    }
    CscMatrix::new(m.nrows(), m.ncols(), colptr, rowval, nzval)
}

pub fn solve_qp(problem: &QpProblem, opts: &QpOptions) -> Result<QpSolution> {
    problem.validate()?;
    let n = problem.dimension();

    let p_sym = (&problem.p + problem.p.transpose()) * 0.5;
    let p = to_csc(&p_sym, true);
    let q: Vec<f64> = problem.q.iter().copied().collect();
    let (a_dense, b, n_eq) = problem.constraints();
    let a = to_csc(&a_dense, false);

    let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(2);
    if n_eq > 0 {
        cones.push(SupportedConeT::ZeroConeT(n_eq));
    }
    cones.push(SupportedConeT::NonnegativeConeT(b.len() - n_eq));

    let settings = DefaultSettingsBuilder::default()
        .max_iter(opts.max_iter)
        .tol_gap_abs(opts.tol_gap_abs)
        .tol_gap_rel(opts.tol_gap_rel)
        .tol_feas(opts.tol_feas)
        .verbose(false)
        .build()
        .map_err(|e| OpsError::Config(format!("invalid solver settings: {}", e)))?;

    let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings)
        .map_err(|e| OpsError::Numerical(format!("failed to set up QP solver: {:?}", e)))?;
    solver.solve();

    let status = match solver.solution.status {
        SolverStatus::Solved => SolveStatus::Optimal,
        SolverStatus::AlmostSolved => SolveStatus::Inaccurate,
        SolverStatus::MaxIterations | SolverStatus::MaxTime => SolveStatus::MaxIterations,
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            return Err(OpsError::Numerical(
                "quadratic program is infeasible".to_string(),
            ))
        }
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
            return Err(OpsError::Numerical(
                "quadratic program is unbounded".to_string(),
            ))
        }
        _ => SolveStatus::Stalled,
    };

    let x = DVector::from_iterator(n, solver.solution.x.iter().map(|v| v.max(0.0)));
    if x.iter().any(|v| !v.is_finite()) {
        return Err(OpsError::Numerical(format!(
            "QP solver returned a non-finite point ({:?})",
            solver.solution.status
        )));
    }

    Ok(QpSolution {
        objective: 0.5 * x.dot(&(&p_sym * &x)) + problem.q.dot(&x),
        violation: problem.violation(&x),
        x,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::simplex::simplex_proj;

    #[test]
    fn simplex_projection_in_identity_norm_matches_closed_form() {
        // min |x - y|^2 over the simplex is the Euclidean projection of y
        let y = DVector::from_vec(vec![0.9, 0.4, -0.3]);
        let p = DMatrix::identity(3, 3) * 2.0;
        let q = -2.0 * &y;
        let sol = solve_qp(&QpProblem::new(p, q, QpDomain::Simplex), &QpOptions::default())
            .unwrap();
        let expected = simplex_proj(y.as_slice());
        for (a, b) in sol.x.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
        assert_eq!(sol.status, SolveStatus::Optimal);
    }

    #[test]
    fn min_variance_with_return_floor() {
        let p = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 4.0]));
        let q = DVector::zeros(2);
        let mu = DVector::from_vec(vec![0.01, 0.03]);
        let problem = QpProblem::new(p, q, QpDomain::Simplex).with_ineq(mu.clone(), 0.025);
        let sol = solve_qp(&problem, &QpOptions::default()).unwrap();
        assert!(mu.dot(&sol.x) >= 0.025 - 1e-6);
        assert!((sol.x.sum() - 1.0).abs() < 1e-6);
        // return floor binds: w2 = 0.75
        assert!((sol.x[1] - 0.75).abs() < 1e-4, "{:?}", sol.x);
    }

    #[test]
    fn unconstrained_floor_gives_inverse_variance_weights() {
        // min-variance on a diagonal covariance: w_i proportional to 1 / sigma_i^2
        let p = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 4.0])) * 2.0;
        let sol = solve_qp(
            &QpProblem::new(p, DVector::zeros(2), QpDomain::Simplex),
            &QpOptions::default(),
        )
        .unwrap();
        assert!((sol.x[0] - 0.8).abs() < 1e-6, "{:?}", sol.x);
        assert!((sol.x[1] - 0.2).abs() < 1e-6, "{:?}", sol.x);
        assert!(sol.violation < 1e-6);
    }

    #[test]
    fn orthant_with_return_row_matches_closed_form() {
        // min y'Sy s.t. mu'y >= 1, y >= 0 with S = I: y = mu / |mu|^2
        let mu = DVector::from_vec(vec![1.0, 2.0]);
        let problem = QpProblem::new(
            DMatrix::identity(2, 2) * 2.0,
            DVector::zeros(2),
            QpDomain::NonNegative,
        )
        .with_ineq(mu, 1.0);
        let sol = solve_qp(&problem, &QpOptions::default()).unwrap();
        assert!((sol.x[0] - 0.2).abs() < 1e-6, "{:?}", sol.x);
        assert!((sol.x[1] - 0.4).abs() < 1e-6, "{:?}", sol.x);
    }

    #[test]
    fn equality_row_is_respected() {
        // pin x0 = 0.6 on the simplex
        let problem = QpProblem::new(
            DMatrix::identity(3, 3),
            DVector::zeros(3),
            QpDomain::Simplex,
        )
        .with_eq(DVector::from_vec(vec![1.0, 0.0, 0.0]), 0.6);
        let sol = solve_qp(&problem, &QpOptions::default()).unwrap();
        assert!((sol.x[0] - 0.6).abs() < 1e-6, "{:?}", sol.x);
        assert!((sol.x[1] - 0.2).abs() < 1e-6, "{:?}", sol.x);
    }

    #[test]
    fn infeasible_floor_is_an_error() {
        let problem = QpProblem::new(
            DMatrix::identity(2, 2),
            DVector::zeros(2),
            QpDomain::Simplex,
        )
        .with_ineq(DVector::from_vec(vec![0.01, 0.02]), 1.0);
        let err = solve_qp(&problem, &QpOptions::default());
        assert!(matches!(err, Err(OpsError::Numerical(_))));
    }

    #[test]
    fn rejects_misaligned_inputs() {
        let p = DMatrix::identity(3, 3);
        let q = DVector::zeros(2);
        let err = solve_qp(&QpProblem::new(p, q, QpDomain::Simplex), &QpOptions::default());
        assert!(matches!(err, Err(OpsError::Shape(_))));
    }
}
