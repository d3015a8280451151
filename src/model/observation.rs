use serde::{Deserialize, Serialize};

use crate::error::{OpsError, Result};
use crate::math::safe_div;

/// One step of the observation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    /// Open price per risky asset, quoted in fiat.
    pub open: Vec<f64>,
    /// Units held per risky asset.
    pub holdings: Vec<f64>,
    /// Fiat balance.
    pub fiat_balance: f64,
}

impl ObservationRow {
    pub fn new(open: Vec<f64>, holdings: Vec<f64>, fiat_balance: f64) -> Self {
        Self {
            open,
            holdings,
            fiat_balance,
        }
    }

    /// Row with no risky holdings and one unit of fiat.
    pub fn prices_only(open: Vec<f64>) -> Self {
        let n = open.len();
        Self {
            open,
            holdings: vec![0.0; n],
            fiat_balance: 1.0,
        }
    }
}

/// Rolling, read-only window of price bars and holdings, oldest row first.
/// The fiat asset is implicit and always occupies the last portfolio slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    symbols: Vec<String>,
    fiat: String,
    rows: Vec<ObservationRow>,
}

impl Observation {
    pub fn new(symbols: Vec<String>, fiat: &str, rows: Vec<ObservationRow>) -> Result<Self> {
        let width = symbols.len();
        for (i, row) in rows.iter().enumerate() {
            if row.open.len() != width || row.holdings.len() != width {
                return Err(OpsError::Shape(format!(
                    "row {} has {} prices and {} holdings, expected {}",
                    i,
                    row.open.len(),
                    row.holdings.len(),
                    width
                )));
            }
        }
        Ok(Self {
            symbols,
            fiat: fiat.to_string(),
            rows,
        })
    }

    /// Window built from a price matrix `[step][asset]` with empty holdings.
    pub fn from_prices(symbols: Vec<String>, fiat: &str, prices: &[Vec<f64>]) -> Result<Self> {
        let rows = prices
            .iter()
            .map(|p| ObservationRow::prices_only(p.clone()))
            .collect();
        Self::new(symbols, fiat, rows)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn fiat(&self) -> &str {
        &self.fiat
    }

    pub fn rows(&self) -> &[ObservationRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [ObservationRow] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_risky(&self) -> usize {
        self.symbols.len()
    }

    /// Risky assets plus the fiat slot.
    pub fn n_assets(&self) -> usize {
        self.symbols.len() + 1
    }

    pub fn require(&self, rows: usize) -> Result<()> {
        if self.rows.len() < rows {
            return Err(OpsError::DataInsufficiency {
                needed: rows,
                available: self.rows.len(),
            });
        }
        Ok(())
    }

    /// Row `back` steps before the last one (`0` is the last row).
    pub fn row_back(&self, back: usize) -> Result<&ObservationRow> {
        self.require(back + 1)?;
        Ok(&self.rows[self.rows.len() - 1 - back])
    }

    pub fn open_back(&self, back: usize) -> Result<&[f64]> {
        Ok(&self.row_back(back)?.open)
    }

    /// Full open-price history of one risky asset.
    pub fn open_series(&self, asset: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r.open[asset]).collect()
    }

    /// Last `n` open prices of one risky asset.
    pub fn open_tail(&self, asset: usize, n: usize) -> Result<Vec<f64>> {
        self.require(n)?;
        Ok(self.rows[self.rows.len() - n..]
            .iter()
            .map(|r| r.open[asset])
            .collect())
    }

    /// Single-step price relatives `p[t] / p[t-1]` of the risky assets, one
    /// row per step after the first.
    pub fn price_relatives(&self) -> Vec<Vec<f64>> {
        self.rows
            .windows(2)
            .map(|w| {
                w[1].open
                    .iter()
                    .zip(&w[0].open)
                    .map(|(cur, prev)| safe_div(*cur, *prev))
                    .collect()
            })
            .collect()
    }

    /// Last price relative with the fiat slot (`1.0`) appended. `inverse`
    /// yields `p[-2] / p[-1]` instead of `p[-1] / p[-2]`.
    pub fn last_price_relative(&self, inverse: bool) -> Result<Vec<f64>> {
        let cur = self.open_back(0)?;
        let prev = self.open_back(1)?;
        let mut x: Vec<f64> = cur
            .iter()
            .zip(prev)
            .map(|(c, p)| if inverse { safe_div(*p, *c) } else { safe_div(*c, *p) })
            .collect();
        x.push(1.0);
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> Observation {
        Observation::from_prices(
            vec!["BTC".to_string(), "ETH".to_string()],
            "USDT",
            &[vec![100.0, 10.0], vec![110.0, 10.0], vec![121.0, 5.0]],
        )
        .unwrap()
    }

    #[test]
    fn rejects_ragged_rows() {
        let rows = vec![ObservationRow::prices_only(vec![1.0])];
        let err = Observation::new(vec!["A".to_string(), "B".to_string()], "USDT", rows);
        assert!(matches!(err, Err(OpsError::Shape(_))));
    }

    #[test]
    fn row_back_reports_insufficiency() {
        let obs = window();
        assert_eq!(obs.open_back(2).unwrap(), &[100.0, 10.0]);
        let err = obs.row_back(3).unwrap_err();
        assert!(err.is_data_insufficiency());
    }

    #[test]
    fn last_price_relative_appends_fiat() {
        let obs = window();
        let x = obs.last_price_relative(false).unwrap();
        assert!((x[0] - 1.1).abs() < 1e-12);
        assert!((x[1] - 0.5).abs() < 1e-12);
        assert_eq!(x[2], 1.0);
        let inv = obs.last_price_relative(true).unwrap();
        assert!((inv[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn price_relatives_have_one_row_less() {
        let obs = window();
        let rel = obs.price_relatives();
        assert_eq!(rel.len(), 2);
        assert!((rel[0][0] - 1.1).abs() < 1e-12);
    }
}
