//! Errors on tight/loose efficiency ratios.

use ssdl_core::{Error, Result};
use statrs::distribution::{Beta, ContinuousCDF};

fn check_counts(passed: f64, total: f64) -> Result<()> {
    if !(passed.is_finite() && total.is_finite()) {
        return Err(Error::Validation(format!(
            "counts must be finite, got passed={} total={}",
            passed, total
        )));
    }
    if total <= 0.0 {
        return Err(Error::Validation(format!("total must be > 0, got {}", total)));
    }
    if passed < 0.0 || passed > total {
        return Err(Error::Validation(format!(
            "passed must be in [0, total], got passed={} total={}",
            passed, total
        )));
    }
    Ok(())
}

/// Binomial error on `passed / total`: `sqrt(n (1 - n/N)) / N`.
///
/// Valid for weighted counts.
pub fn binomial_error(passed: f64, total: f64) -> Result<f64> {
    check_counts(passed, total)?;
    Ok((passed * (1.0 - passed / total)).max(0.0).sqrt() / total)
}

/// Error on `passed / total` treating both counts as independent Poisson
/// variables: `sqrt(n^2 (N + n) / N^3)`.
pub fn poisson_ratio_error(passed: f64, total: f64) -> Result<f64> {
    check_counts(passed, total)?;
    Ok((passed * passed * (total + passed) / (total * total * total)).sqrt())
}

/// Clopper-Pearson central interval `(lower, upper)` on the efficiency
/// `passed / total` at confidence level `conf_level`.
///
/// Integer counts only; `passed == 0` gives lower bound 0 and
/// `passed == total` gives upper bound 1.
pub fn clopper_pearson(passed: u64, total: u64, conf_level: f64) -> Result<(f64, f64)> {
    if total == 0 {
        return Err(Error::Validation("clopper_pearson requires total > 0".to_string()));
    }
    if passed > total {
        return Err(Error::Validation(format!(
            "passed must be <= total, got passed={} total={}",
            passed, total
        )));
    }
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation(format!("conf_level must be in (0,1), got {}", conf_level)));
    }

    let alpha = 1.0 - conf_level;
    let k = passed as f64;
    let n = total as f64;

    let lower = if passed == 0 {
        0.0
    } else {
        let dist = Beta::new(k, n - k + 1.0)
            .map_err(|e| Error::Computation(format!("beta({}, {}): {}", k, n - k + 1.0, e)))?;
        dist.inverse_cdf(alpha / 2.0)
    };
    let upper = if passed == total {
        1.0
    } else {
        let dist = Beta::new(k + 1.0, n - k)
            .map_err(|e| Error::Computation(format!("beta({}, {}): {}", k + 1.0, n - k, e)))?;
        dist.inverse_cdf(1.0 - alpha / 2.0)
    };
    Ok((lower, upper))
}

/// Whether a weighted count is a non-negative integer (up to rounding noise).
pub fn as_integer_count(x: f64) -> Option<u64> {
    if !(x.is_finite() && x >= 0.0) {
        return None;
    }
    let r = x.round();
    if (x - r).abs() <= 1e-9 { Some(r as u64) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ONE_SIGMA_CL;
    use approx::assert_relative_eq;

    #[test]
    fn test_binomial_error_matches_formula() {
        let e = binomial_error(20.0, 80.0).unwrap();
        let expected = (20.0_f64 * (1.0 - 0.25)).sqrt() / 80.0;
        assert_relative_eq!(e, expected, epsilon = 1e-15);
        assert_eq!(binomial_error(0.0, 10.0).unwrap(), 0.0);
        assert_eq!(binomial_error(10.0, 10.0).unwrap(), 0.0);
    }

    #[test]
    fn test_poisson_ratio_error_matches_formula() {
        let e = poisson_ratio_error(20.0, 80.0).unwrap();
        let expected = (400.0_f64 * 100.0 / 512000.0).sqrt();
        assert_relative_eq!(e, expected, epsilon = 1e-15);
    }

    #[test]
    fn test_invalid_counts_rejected() {
        assert!(binomial_error(1.0, 0.0).is_err());
        assert!(binomial_error(5.0, 4.0).is_err());
        assert!(binomial_error(-1.0, 4.0).is_err());
        assert!(poisson_ratio_error(f64::NAN, 4.0).is_err());
        assert!(clopper_pearson(3, 0, ONE_SIGMA_CL).is_err());
        assert!(clopper_pearson(5, 4, ONE_SIGMA_CL).is_err());
        assert!(clopper_pearson(1, 4, 1.0).is_err());
    }

    #[test]
    fn test_clopper_pearson_closed_form_edges() {
        // For k=0 the upper limit is 1 - (alpha/2)^(1/n); for k=n the lower is (alpha/2)^(1/n).
        let n = 10u64;
        let half_alpha: f64 = (1.0 - ONE_SIGMA_CL) / 2.0;
        let (lo, hi) = clopper_pearson(0, n, ONE_SIGMA_CL).unwrap();
        assert_eq!(lo, 0.0);
        assert_relative_eq!(hi, 1.0 - half_alpha.powf(1.0 / n as f64), epsilon = 1e-6);

        let (lo, hi) = clopper_pearson(n, n, ONE_SIGMA_CL).unwrap();
        assert_eq!(hi, 1.0);
        assert_relative_eq!(lo, half_alpha.powf(1.0 / n as f64), epsilon = 1e-6);
    }

    #[test]
    fn test_clopper_pearson_brackets_and_mirrors() {
        let (lo, hi) = clopper_pearson(7, 30, ONE_SIGMA_CL).unwrap();
        assert!(lo < 7.0 / 30.0 && 7.0 / 30.0 < hi, "interval [{}, {}]", lo, hi);

        let (lo_m, hi_m) = clopper_pearson(23, 30, ONE_SIGMA_CL).unwrap();
        assert_relative_eq!(lo, 1.0 - hi_m, epsilon = 1e-6);
        assert_relative_eq!(hi, 1.0 - lo_m, epsilon = 1e-6);
    }

    #[test]
    fn test_as_integer_count() {
        assert_eq!(as_integer_count(12.0), Some(12));
        assert_eq!(as_integer_count(12.0 + 1e-12), Some(12));
        assert_eq!(as_integer_count(12.5), None);
        assert_eq!(as_integer_count(-1.0), None);
    }
}
