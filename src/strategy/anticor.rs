use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::{safe_div, simplex_proj};
use crate::model::observation::Observation;
use crate::model::params::{apply_params, lenient, require_span, ParamSet, StrategyConfig};
use crate::model::portfolio::portfolio_vector;
use crate::strategy::{initial_allocation, short_window, AgentState, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnticorConfig {
    #[serde(deserialize_with = "lenient::usize")]
    pub window: usize,
}

impl Default for AnticorConfig {
    fn default() -> Self {
        Self { window: 30 }
    }
}

impl StrategyConfig for AnticorConfig {
    const REQUIRED: &'static [&'static str] = &["window"];

    fn validate(&self) -> Result<()> {
        require_span("window", self.window, 3)
    }
}

/// Log-relative windows: rows are steps, columns are risky assets.
#[derive(Debug, Clone)]
pub struct LogWindows {
    pub earlier: DMatrix<f64>,
    pub later: DMatrix<f64>,
}

fn column_stats(m: &DMatrix<f64>) -> (Vec<f64>, Vec<f64>) {
    let rows = m.nrows().max(1) as f64;
    let means: Vec<f64> = m.column_iter().map(|c| c.sum() / rows).collect();
    let stds = m
        .column_iter()
        .zip(&means)
        .map(|(c, mu)| (c.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / rows).sqrt())
        .collect();
    (means, stds)
}

/// Anti-correlation heuristic (Borodin, El-Yaniv, Gogan 2004).
#[derive(Debug, Clone, Default)]
pub struct Anticor {
    config: AnticorConfig,
    state: AgentState,
}

impl Anticor {
    pub fn new(config: AnticorConfig) -> Self {
        Self {
            config,
            state: AgentState::default(),
        }
    }

    /// Rows needed for two back-to-back windows of `window - 1` log relatives.
    fn lookback(&self) -> usize {
        2 * self.config.window - 1
    }

    pub fn log_windows(&self, obs: &Observation) -> Result<LogWindows> {
        let w = self.config.window;
        let steps = w - 1;
        let n = obs.n_risky();
        let mut earlier = DMatrix::zeros(steps, n);
        let mut later = DMatrix::zeros(steps, n);
        for asset in 0..n {
            let tail = obs.open_tail(asset, self.lookback())?;
            let logs: Vec<f64> = tail
                .windows(2)
                .map(|p| safe_div(p[1], p[0]).max(1e-12).ln())
                .collect();
            for t in 0..steps {
                earlier[(t, asset)] = logs[t];
                later[(t, asset)] = logs[steps + t];
            }
        }
        Ok(LogWindows { earlier, later })
    }

    /// Moves weight from asset `i` to `j` when `i` outperformed and the two are
    /// positively cross-correlated across the windows.
    pub fn update(&self, b: &[f64], windows: &LogWindows) -> Vec<f64> {
        let n = b.len();
        let (mean1, std1) = column_stats(&windows.earlier);
        let (mean2, std2) = column_stats(&windows.later);
        let steps = windows.earlier.nrows().max(1) as f64;

        let mut corr = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                if std1[i] < 1e-12 || std2[j] < 1e-12 {
                    continue;
                }
                let cov: f64 = (0..windows.earlier.nrows())
                    .map(|t| {
                        (windows.earlier[(t, i)] - mean1[i]) * (windows.later[(t, j)] - mean2[j])
                    })
                    .sum();
                corr[(i, j)] = cov / (steps * std1[i] * std2[j]);
            }
        }

        let mut claim = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                if i == j || mean2[i] <= mean2[j] || corr[(i, j)] <= 0.0 {
                    continue;
                }
                let mut c = corr[(i, j)];
                if corr[(i, i)] < 0.0 {
                    c += corr[(i, i)].abs();
                }
                if corr[(j, j)] < 0.0 {
                    c += corr[(j, j)].abs();
                }
                claim[(i, j)] = c;
            }
        }

        let mut next = b.to_vec();
        for i in 0..n {
            let total: f64 = claim.row(i).sum();
            if total == 0.0 {
                continue;
            }
            for j in 0..n {
                let transfer = b[i] * safe_div(claim[(i, j)], total);
                next[i] -= transfer;
                next[j] += transfer;
            }
        }
        next
    }
}

impl Strategy for Anticor {
    fn name(&self) -> &str {
        "Anticor"
    }

    /// Later-window mean log relative per risky asset, fiat 0.
    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        let windows = self.log_windows(obs)?;
        let (mut means, _) = column_stats(&windows.later);
        means.push(0.0);
        Ok(means)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            return Ok(initial_allocation(obs));
        }
        if let Some(fallback) = short_window(self.name(), obs, self.lookback()) {
            return Ok(fallback);
        }
        let held = portfolio_vector(obs, 0)?;
        let risky = &held[..obs.n_risky()];
        let windows = self.log_windows(obs)?;
        let mut out = simplex_proj(&self.update(risky, &windows));
        out.push(0.0);
        Ok(out)
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<()> {
        self.config = apply_params(&self.config, params)?;
        Ok(())
    }

    fn check_params(&self, params: &ParamSet) -> Result<()> {
        apply_params(&self.config, params).map(|_| ())
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows(earlier: &[[f64; 2]], later: &[[f64; 2]]) -> LogWindows {
        // one column per asset, two steps each
        let to_matrix = |cols: &[[f64; 2]]| {
            DMatrix::from_fn(2, cols.len(), |t, asset| cols[asset][t])
        };
        LogWindows {
            earlier: to_matrix(earlier),
            later: to_matrix(later),
        }
    }

    #[test]
    fn winner_hands_weight_to_the_correlated_loser() {
        let w = windows(&[[1.0, -1.0], [1.0, -1.0]], &[[3.0, 1.0], [1.0, -1.0]]);
        let out = Anticor::default().update(&[0.6, 0.4], &w);
        assert!(out[0].abs() < 1e-12, "{:?}", out);
        assert!((out[1] - 1.0).abs() < 1e-12, "{:?}", out);
    }

    #[test]
    fn negative_autocorrelation_enlarges_the_claim() {
        // corr(0,1) = corr(0,2) = 1, corr(1,1) = -1: claims 2 and 1 on asset 0
        let w = windows(
            &[[1.0, -1.0], [-1.0, 1.0], [1.0, -1.0]],
            &[[3.0, 1.0], [1.0, -1.0], [1.0, -1.0]],
        );
        let out = Anticor::default().update(&[0.6, 0.3, 0.1], &w);
        let expected = [0.0, 0.7, 0.3];
        for (o, e) in out.iter().zip(expected) {
            assert!((o - e).abs() < 1e-12, "{:?}", out);
        }
    }

    #[test]
    fn flat_windows_transfer_nothing() {
        let w = windows(&[[0.0, 0.0], [0.0, 0.0]], &[[0.0, 0.0], [0.0, 0.0]]);
        assert_eq!(Anticor::default().update(&[0.6, 0.4], &w), vec![0.6, 0.4]);
    }

    #[test]
    fn log_windows_split_the_lookback() {
        let anticor = Anticor::new(AnticorConfig { window: 3 });
        let e = std::f64::consts::E;
        let obs = Observation::from_prices(
            vec!["A".to_string()],
            "USD",
            &[vec![1.0], vec![e], vec![e], vec![1.0], vec![e]],
        )
        .unwrap();
        let w = anticor.log_windows(&obs).unwrap();
        assert_eq!(w.earlier.shape(), (2, 1));
        assert!((w.earlier[(0, 0)] - 1.0).abs() < 1e-12);
        assert!(w.earlier[(1, 0)].abs() < 1e-12);
        assert!((w.later[(0, 0)] + 1.0).abs() < 1e-12);
        assert!((w.later[(1, 0)] - 1.0).abs() < 1e-12);
    }
}
