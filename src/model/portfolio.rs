use crate::error::Result;
use crate::math::safe_div;
use crate::model::observation::Observation;

/// Current fractional allocation read from the window's embedded holdings.
///
/// `back` selects the row (`0` = last, `1` = second-to-last). Each risky
/// asset is valued at `open * holdings`; fiat is taken at face value. The
/// returned vector has the fiat fraction in its last slot.
pub fn portfolio_vector(obs: &Observation, back: usize) -> Result<Vec<f64>> {
    let row = obs.row_back(back)?;
    let values: Vec<f64> = row
        .open
        .iter()
        .zip(&row.holdings)
        .map(|(price, units)| price * units)
        .collect();
    let total = values.iter().sum::<f64>() + row.fiat_balance;

    let mut out: Vec<f64> = values.iter().map(|v| safe_div(*v, total)).collect();
    out.push(safe_div(row.fiat_balance, total));
    Ok(out)
}
