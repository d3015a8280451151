use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::simplex_proj;
use crate::model::observation::Observation;
use crate::model::params::{
    apply_params, lenient, require_range, require_span, ParamSet, StrategyConfig,
};
use crate::strategy::{held_or_initial, initial_allocation, AgentState, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarmonicConfig {
    /// Neighbours on each side an extremum must strictly dominate.
    #[serde(deserialize_with = "lenient::usize")]
    pub peak_order: usize,
    /// Widening applied to every Fibonacci band.
    pub err_allowed: f64,
    pub decay: f64,
    pub alpha_up: f64,
    pub alpha_down: f64,
}

impl Default for HarmonicConfig {
    fn default() -> Self {
        Self {
            peak_order: 7,
            err_allowed: 0.05,
            decay: 0.99,
            alpha_up: 1.0,
            alpha_down: 1.0,
        }
    }
}

impl StrategyConfig for HarmonicConfig {
    const REQUIRED: &'static [&'static str] =
        &["err_allowed", "peak_order", "decay", "alpha_up", "alpha_down"];

    fn validate(&self) -> Result<()> {
        require_span("peak_order", self.peak_order, 1)?;
        require_range("decay", self.decay, 0.0, 1.0)?;
        require_range("err_allowed", self.err_allowed, 0.0, f64::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn score(self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Bearish => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternScan {
    Matched(Direction),
    NoPattern,
    /// Fewer than five extrema in the series.
    InsufficientExtrema,
}

impl PatternScan {
    pub fn score(self) -> f64 {
        match self {
            Self::Matched(d) => d.score(),
            Self::NoPattern | Self::InsufficientExtrema => 0.0,
        }
    }
}

/// Fibonacci retracement bands of the AB, BC and CD legs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicPattern {
    pub name: &'static str,
    pub ab: (f64, f64),
    pub bc: (f64, f64),
    pub cd: (f64, f64),
}

pub const PATTERNS: [HarmonicPattern; 4] = [
    HarmonicPattern {
        name: "gartley",
        ab: (0.618, 0.618),
        bc: (0.382, 0.886),
        cd: (1.27, 1.618),
    },
    HarmonicPattern {
        name: "butterfly",
        ab: (0.786, 0.786),
        bc: (0.382, 0.886),
        cd: (1.618, 2.618),
    },
    HarmonicPattern {
        name: "bat",
        ab: (0.382, 0.5),
        bc: (0.382, 0.886),
        cd: (1.618, 2.618),
    },
    HarmonicPattern {
        name: "crab",
        ab: (0.382, 0.618),
        bc: (0.382, 0.886),
        cd: (2.24, 3.618),
    },
];

/// Indices of strict local maxima and minima of order `k`, plus the last
/// index, in ascending order.
///
/// Neighbour indices past either end are clipped to the end, so a point near
/// the edge is compared with the points that exist there and the two end
/// points themselves never qualify.
pub fn find_extrema(series: &[f64], k: usize) -> Vec<usize> {
    let n = series.len();
    let mut idx = Vec::new();
    if k > 0 && n > 2 {
        for i in 1..n - 1 {
            let v = series[i];
            let neighbours = (1..=k).flat_map(|s| [i.saturating_sub(s), (i + s).min(n - 1)]);
            if neighbours.clone().all(|j| v > series[j]) || neighbours.clone().all(|j| v < series[j]) {
                idx.push(i);
            }
        }
    }
    if n > 0 && idx.last() != Some(&(n - 1)) {
        idx.push(n - 1);
    }
    idx
}

fn within(value: f64, band: (f64, f64), err: f64, scale: f64) -> bool {
    (band.0 - err) * scale < value && value < (band.1 + err) * scale
}

/// Tests the last five extrema of `series` against `pattern`.
pub fn scan(series: &[f64], pattern: &HarmonicPattern, k: usize, err: f64) -> PatternScan {
    let idx = find_extrema(series, k);
    if idx.len() < 5 {
        return PatternScan::InsufficientExtrema;
    }
    let e = |back: usize| series[idx[idx.len() - back]];
    let xa = e(2) - e(1);
    let ab = e(3) - e(2);
    let bc = e(4) - e(3);
    let cd = e(5) - e(4);

    if !(within(ab.abs(), pattern.ab, err, xa.abs())
        && within(bc.abs(), pattern.bc, err, ab.abs())
        && within(cd.abs(), pattern.cd, err, bc.abs()))
    {
        return PatternScan::NoPattern;
    }
    if xa > 0.0 && ab < 0.0 && bc > 0.0 && cd < 0.0 {
        PatternScan::Matched(Direction::Bullish)
    } else if xa < 0.0 && ab > 0.0 && bc < 0.0 && cd > 0.0 {
        PatternScan::Matched(Direction::Bearish)
    } else {
        PatternScan::NoPattern
    }
}

/// Fibonacci harmonic pattern trader.
#[derive(Debug, Clone, Default)]
pub struct Harmonic {
    config: HarmonicConfig,
    state: AgentState,
}

impl Harmonic {
    pub fn new(config: HarmonicConfig) -> Self {
        Self {
            config,
            state: AgentState::default(),
        }
    }

    /// Net pattern score of one price series and whether any scan ran short
    /// of extrema.
    fn score_series(&self, series: &[f64]) -> (f64, bool) {
        let cfg = &self.config;
        PATTERNS.iter().fold((0.0, false), |(score, short), p| {
            let result = scan(series, p, cfg.peak_order, cfg.err_allowed);
            (
                score + result.score(),
                short || result == PatternScan::InsufficientExtrema,
            )
        })
    }
}

impl Strategy for Harmonic {
    fn name(&self) -> &str {
        "Harmonic"
    }

    /// Summed pattern direction per risky asset, fiat 0.
    fn predict(&self, obs: &Observation) -> Result<Vec<f64>> {
        let mut out: Vec<f64> = (0..obs.n_risky())
            .map(|asset| self.score_series(&obs.open_series(asset)).0)
            .collect();
        out.push(0.0);
        Ok(out)
    }

    fn rebalance(&mut self, obs: &Observation) -> Result<Vec<f64>> {
        if self.state.advance() == 0 {
            return Ok(simplex_proj(&initial_allocation(obs)));
        }
        let cfg = self.config.clone();
        let prev = held_or_initial(obs, 0)?;

        let mut short = Vec::new();
        let mut port = vec![0.0; obs.n_assets()];
        for asset in 0..obs.n_risky() {
            let (score, insufficient) = self.score_series(&obs.open_series(asset));
            if insufficient {
                short.push(obs.symbols()[asset].clone());
            }
            let alpha = if score >= 0.0 { cfg.alpha_up } else { cfg.alpha_down };
            port[asset] = (cfg.decay * prev[asset] + (1.0 - cfg.decay) + alpha * score).max(0.0);
        }
        let risky: f64 = port.iter().sum();
        let n = port.len();
        port[n - 1] = (1.0 - risky).max(0.0);

        if short.is_empty() {
            self.state.log.remove("insufficient_extrema");
        } else {
            self.state
                .log
                .insert("insufficient_extrema".to_string(), short.join(","));
        }
        Ok(simplex_proj(&port))
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

    #[test]
    fn extrema_skip_edges_and_append_last() {
        let series = [5.0, 1.0, 3.0, 0.5, 4.0, 2.0, 2.5];
        assert_eq!(find_extrema(&series, 1), vec![1, 2, 3, 4, 5, 6]);
        // index 0 would be a maximum but sits on the edge
        assert!(!find_extrema(&series, 1).contains(&0));
    }

    #[test]
    fn neighbours_are_clipped_at_the_edges() {
        // index 1 and 5 see fewer than two points on one side
        let series = [1.0, 5.0, 2.0, 3.0, 2.5, 0.5, 2.0];
        assert_eq!(find_extrema(&series, 2), vec![1, 5, 6]);
        assert_eq!(find_extrema(&series, 10), vec![1, 5, 6]);
        assert_eq!(find_extrema(&[3.0, 1.0], 1), vec![1]);
    }

    #[test]
    fn short_series_reports_insufficient_extrema() {
        let scan_result = scan(&[1.0, 2.0, 3.0], &PATTERNS[0], 1, 0.05);
        assert_eq!(scan_result, PatternScan::InsufficientExtrema);
        assert_eq!(scan_result.score(), 0.0);
    }

    #[test]
    fn detects_bullish_bat() {
        // XA = 10, AB = -4.5, BC = 3, CD = -6
        let series = [13.0, 12.5, 18.5, 15.5, 20.0, 10.0];
        assert_eq!(find_extrema(&series, 1), vec![1, 2, 3, 4, 5]);
        let bat = scan(&series, &PATTERNS[2], 1, 0.05);
        assert_eq!(bat, PatternScan::Matched(Direction::Bullish));
        let gartley = scan(&series, &PATTERNS[0], 1, 0.05);
        assert_eq!(gartley, PatternScan::NoPattern);
    }

    #[test]
    fn mirrored_series_is_bearish() {
        let series: Vec<f64> = [13.0, 12.5, 18.5, 15.5, 20.0, 10.0].iter().map(|v| 40.0 - v).collect();
        let bat = scan(&series, &PATTERNS[2], 1, 0.05);
        assert_eq!(bat, PatternScan::Matched(Direction::Bearish));
    }
}
