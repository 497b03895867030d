//! Small helpers for combining uncertainties.

/// Quadrature sum `sqrt(sum x_i^2)`.
#[inline]
pub fn quadrature<I: IntoIterator<Item = f64>>(xs: I) -> f64 {
    xs.into_iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Arithmetic mean; `NaN` for empty input.
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Unbiased sample standard deviation (`n - 1` denominator).
///
/// Returns 0 for fewer than two values.
pub fn sample_std(xs: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let ss: f64 = xs.iter().map(|x| (x - m) * (x - m)).sum();
    (ss / (n - 1) as f64).sqrt()
}
