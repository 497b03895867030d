//! Poisson intervals on observed event counts.

use ssdl_core::{Error, Result};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Garwood central interval for an observed count `n`, returned as
/// `(error_low, error_high)` relative to `n`.
///
/// `lo = n - 0.5 * chi2_{alpha/2, 2n}`, `hi = 0.5 * chi2_{1-alpha/2, 2(n+1)} - n`.
pub fn garwood_errors(n: u64, conf_level: f64) -> Result<(f64, f64)> {
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation(format!("conf_level must be in (0,1), got {}", conf_level)));
    }
    let alpha = 1.0 - conf_level;
    let nf = n as f64;

    let lo = if n == 0 {
        0.0
    } else {
        let dist = ChiSquared::new(2.0 * nf)
            .map_err(|e| Error::Computation(format!("chi2({}): {}", 2.0 * nf, e)))?;
        nf - 0.5 * dist.inverse_cdf(alpha / 2.0)
    };
    let dist_hi = ChiSquared::new(2.0 * (nf + 1.0))
        .map_err(|e| Error::Computation(format!("chi2({}): {}", 2.0 * (nf + 1.0), e)))?;
    let hi = 0.5 * dist_hi.inverse_cdf(1.0 - alpha / 2.0) - nf;
    Ok((lo, hi))
}

/// Statistical error on a luminosity-scaled MC yield: `scale * sqrt(sumw2)`.
///
/// `sumw2` is the sum of squared event weights, the raw entry count for
/// unweighted events.
pub fn scaled_entries_error(sumw2: f64, scale: f64) -> f64 {
    scale.abs() * sumw2.max(0.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ONE_SIGMA_CL;
    use approx::assert_relative_eq;

    #[test]
    fn test_garwood_zero_count() {
        let (lo, hi) = garwood_errors(0, ONE_SIGMA_CL).unwrap();
        assert_eq!(lo, 0.0);
        // Upper limit for n=0 at 68.27% central: -ln(alpha/2) = 1.8410
        assert_relative_eq!(hi, 1.8410, epsilon = 1e-3);
    }

    #[test]
    fn test_garwood_approaches_sqrt_n() {
        let (lo, hi) = garwood_errors(400, ONE_SIGMA_CL).unwrap();
        // Large-n limits: lo ~ sqrt(n), hi ~ sqrt(n) + 1.
        assert!((lo - 20.0).abs() < 0.2, "lo={}", lo);
        assert!((hi - 21.0).abs() < 0.2, "hi={}", hi);
        assert!(hi > lo);
    }

    #[test]
    fn test_scaled_entries_error() {
        assert_relative_eq!(scaled_entries_error(16.0, 0.5), 2.0, epsilon = 1e-15);
        assert_eq!(scaled_entries_error(0.0, 3.0), 0.0);
    }
}
