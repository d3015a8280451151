use nalgebra::DMatrix;

pub mod minimize;
pub mod qp;
pub mod simplex;

pub use minimize::{ConstrainedMinimizer, MinimizeOptions, MinimizeResult};
pub use qp::{solve_qp, QpDomain, QpOptions, QpProblem, QpSolution, SolveStatus};
pub use simplex::{array_normalize, simplex_proj};

/// Denominators closer to zero than this are treated as zero.
pub const DIV_EPSILON: f64 = 1e-16;

/// Division that never yields NaN or infinity: returns 0 when the denominator
/// vanishes or the quotient is not finite.
pub fn safe_div(num: f64, den: f64) -> f64 {
    if den.abs() < DIV_EPSILON {
        return 0.0;
    }
    let q = num / den;
    if q.is_finite() {
        q
    } else {
        0.0
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

/// Population variance.
pub fn variance(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    let m = mean(v);
    v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / v.len() as f64
}

pub fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

pub fn norm1(v: &[f64]) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

/// `x - mean(x)`.
pub fn demean(v: &[f64]) -> Vec<f64> {
    let m = mean(v);
    v.iter().map(|x| x - m).collect()
}

/// Equal weight across the first `n - 1` slots, zero in the last (fiat) slot.
pub fn equal_risky(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![1.0];
    }
    let w = 1.0 / (n - 1) as f64;
    let mut out = vec![w; n];
    out[n - 1] = 0.0;
    out
}

pub fn uniform(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

/// Convex blend `(1 - eta) * a + eta * b`.
pub fn blend(a: &[f64], b: &[f64], eta: f64) -> Vec<f64> {
    a.iter()
        .zip(b)
        .map(|(x, y)| x * (1.0 - eta) + y * eta)
        .collect()
}

/// Sample covariance (ddof = 1) of the columns of `rows`; zeros when there
/// are fewer than two rows.
pub fn covariance(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let n = rows.first().map_or(0, Vec::len);
    let t = rows.len();
    let mut cov = DMatrix::zeros(n, n);
    if t < 2 {
        return cov;
    }
    let means: Vec<f64> = (0..n)
        .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / t as f64)
        .collect();
    for r in rows {
        for i in 0..n {
            for j in i..n {
                cov[(i, j)] += (r[i] - means[i]) * (r[j] - means[j]);
            }
        }
    }
    for i in 0..n {
        for j in i..n {
            let v = cov[(i, j)] / (t - 1) as f64;
            cov[(i, j)] = v;
            cov[(j, i)] = v;
        }
    }
    cov
}
