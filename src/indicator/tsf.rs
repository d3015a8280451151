/// Time series forecast: least-squares line through the last `period` values,
/// extrapolated one step past the end. `None` if there is not enough data.
pub fn tsf(values: &[f64], period: usize) -> Option<f64> {
    if period < 2 || values.len() < period {
        return None;
    }
    let tail = &values[values.len() - period..];
    let n = period as f64;
    let sum_x = n * (n - 1.0) / 2.0;
    let sum_xx = (n - 1.0) * n * (2.0 * n - 1.0) / 6.0;
    let (sum_y, sum_xy) = tail
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sy, sxy), (i, y)| (sy + y, sxy + i as f64 * y));

    let divisor = n * sum_xx - sum_x * sum_x;
    let slope = (n * sum_xy - sum_x * sum_y) / divisor;
    let intercept = (sum_y - slope * sum_x) / n;
    Some(intercept + slope * n)
}
