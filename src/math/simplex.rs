/// Euclidean projection onto `{w : w_i >= 0, sum(w) = 1}`.
///
/// Sort-and-threshold method: find the largest `rho` with
/// `u[rho] + (1 - css[rho]) / (rho + 1) > 0` on the descending sort `u`,
/// then shift every entry by `tau = (css[rho] - 1) / (rho + 1)` and clip at 0.
/// Non-finite inputs are treated as 0.
pub fn simplex_proj(v: &[f64]) -> Vec<f64> {
    let n = v.len();
    if n == 0 {
        return Vec::new();
    }
    let clean: Vec<f64> = v
        .iter()
        .map(|x| if x.is_finite() { *x } else { 0.0 })
        .collect();

    let mut u = clean.clone();
    u.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut css = 0.0;
    let mut rho = 0usize;
    let mut rho_css = u[0];
    for (i, ui) in u.iter().enumerate() {
        css += ui;
        if ui + (1.0 - css) / (i + 1) as f64 > 0.0 {
            rho = i;
            rho_css = css;
        }
    }
    let tau = (rho_css - 1.0) / (rho + 1) as f64;
    clean.iter().map(|x| (x - tau).max(0.0)).collect()
}

/// L1-normalise a vector; falls back to uniform weights when the absolute
/// sum vanishes.
pub fn array_normalize(v: &[f64]) -> Vec<f64> {
    let n = v.len();
    let total: f64 = v.iter().map(|x| x.abs()).sum();
    if n == 0 {
        return Vec::new();
    }
    if !total.is_finite() || total < super::DIV_EPSILON {
        return vec![1.0 / n as f64; n];
    }
    v.iter().map(|x| x / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_on_simplex(w: &[f64]) {
        assert!(w.iter().all(|x| *x >= -1e-9), "negative entry in {:?}", w);
        let s: f64 = w.iter().sum();
        assert!((s - 1.0).abs() < 1e-9, "sum {} for {:?}", s, w);
    }

    #[test]
    fn zero_vector_projects_to_uniform() {
        let w = simplex_proj(&[0.0; 4]);
        for x in &w {
            assert!((x - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn projection_is_idempotent_on_simplex_points() {
        let p = vec![0.2, 0.5, 0.0, 0.3];
        let w = simplex_proj(&p);
        for (a, b) in p.iter().zip(&w) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn handles_negative_and_duplicate_entries() {
        let w = simplex_proj(&[-1.0, 3.0, 3.0 + 1e-15, -7.5, 0.0]);
        assert_on_simplex(&w);
        assert!((w[1] - 0.5).abs() < 1e-9);
        assert!((w[2] - 0.5).abs() < 1e-9);
        assert_eq!(w[0], 0.0);
    }

    #[test]
    fn projects_pseudo_random_vectors_onto_simplex() {
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for n in 1..12 {
            for _ in 0..50 {
                let v: Vec<f64> = (0..n)
                    .map(|_| {
                        state ^= state << 13;
                        state ^= state >> 7;
                        state ^= state << 17;
                        ((state % 20_000) as f64 / 1_000.0) - 10.0
                    })
                    .collect();
                assert_on_simplex(&simplex_proj(&v));
            }
        }
    }

    #[test]
    fn non_finite_entries_are_ignored() {
        let w = simplex_proj(&[f64::NAN, 1.0, f64::INFINITY]);
        assert_on_simplex(&w);
    }

    #[test]
    fn normalize_falls_back_to_uniform() {
        assert_eq!(array_normalize(&[0.0, 0.0]), vec![0.5, 0.5]);
        assert_eq!(array_normalize(&[1.0, 3.0]), vec![0.25, 0.75]);
    }
}
