use serde::{Deserialize, Serialize};

/// Which moving average a trend strategy smooths prices with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeanType {
    Simple,
    Exp,
    Kama,
}

impl MeanType {
    /// Moving average of `values` aligned with the input; `None` until the
    /// average has enough data.
    pub fn series(self, values: &[f64], span: usize) -> Vec<Option<f64>> {
        match self {
            Self::Simple => {
                let mut sma = Sma::new(span);
                values.iter().map(|v| sma.push(*v)).collect()
            }
            Self::Exp => {
                let mut ewm = Ewm::new(span);
                values.iter().map(|v| Some(ewm.push(*v))).collect()
            }
            Self::Kama => {
                let mut kama = Kama::new(span);
                values.iter().map(|v| kama.push(*v)).collect()
            }
        }
    }

    /// Value of the average at the last point of `values`.
    pub fn last(self, values: &[f64], span: usize) -> Option<f64> {
        self.series(values, span).last().copied().flatten()
    }
}

/// Simple Moving Average over a ring buffer.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    buffer: Vec<f64>,
    head: usize,
    count: usize,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            buffer: vec![0.0; period],
            head: 0,
            count: 0,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) -> Option<f64> {
        if self.count >= self.period {
            self.sum -= self.buffer[self.head];
        }
        self.buffer[self.head] = value;
        self.sum += value;
        self.head = (self.head + 1) % self.period;
        if self.count < self.period {
            self.count += 1;
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.count >= self.period {
            Some(self.sum / self.period as f64)
        } else {
            None
        }
    }
}

/// Bias-adjusted exponentially weighted mean with `alpha = 2 / (span + 1)`.
/// Defined from the first sample on.
#[derive(Debug, Clone)]
pub struct Ewm {
    decay: f64,
    weighted_sum: f64,
    weight: f64,
}

impl Ewm {
    pub fn new(span: usize) -> Self {
        let alpha = 2.0 / (span.max(1) as f64 + 1.0);
        Self {
            decay: 1.0 - alpha,
            weighted_sum: 0.0,
            weight: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) -> f64 {
        self.weighted_sum = self.weighted_sum * self.decay + value;
        self.weight = self.weight * self.decay + 1.0;
        self.weighted_sum / self.weight
    }
}

/// Kaufman Adaptive Moving Average (fast 2, slow 30).
///
/// The first value appears at index `period`, seeded with the previous price.
#[derive(Debug, Clone)]
pub struct Kama {
    period: usize,
    history: Vec<f64>,
    kama: Option<f64>,
}

const KAMA_FAST: f64 = 2.0 / 3.0;
const KAMA_SLOW: f64 = 2.0 / 31.0;

impl Kama {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            history: Vec::new(),
            kama: None,
        }
    }

    pub fn push(&mut self, value: f64) -> Option<f64> {
        self.history.push(value);
        let n = self.history.len();
        if n <= self.period {
            return None;
        }
        // keep exactly period + 1 samples for the efficiency ratio
        if n > self.period + 1 {
            self.history.remove(0);
        }
        let change = (value - self.history[0]).abs();
        let volatility: f64 = self
            .history
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .sum();
        let er = if volatility > 0.0 {
            change / volatility
        } else {
            0.0
        };
        let sc = (er * (KAMA_FAST - KAMA_SLOW) + KAMA_SLOW).powi(2);
        let prev = self
            .kama
            .unwrap_or(self.history[self.history.len() - 2]);
        let next = prev + sc * (value - prev);
        self.kama = Some(next);
        self.kama
    }

    pub fn value(&self) -> Option<f64> {
        self.kama
    }
}
