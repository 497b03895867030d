//! Toy-MC error propagation for the matrix method.
//!
//! The closed-form solve is repeated with the ratios drawn from Gaussians
//! around their measured values (clipped to `[0, 1]`) and the category
//! counts drawn from Poisson distributions around the observed counts. The
//! statistical error on each output is the sample standard deviation across
//! toys.
//!
//! Randomness is deterministic via per-toy seeding (`seed + toy_idx`),
//! independent of threading.

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use ssdl_core::{Channel, Error, Measurement, Result, TightLooseCounts};
use ssdl_prob::math::sample_std;

use crate::matrix::{self, Composition, DEFAULT_MIN_SEPARATION, LegRatios};
use crate::ratio::Ratio;

fn default_n_toys() -> usize {
    100
}

fn default_additional_syst() -> f64 {
    0.5
}

fn default_seed() -> u64 {
    42
}

fn default_min_separation() -> f64 {
    DEFAULT_MIN_SEPARATION
}

/// Matrix-method settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixMethodConfig {
    /// Number of toy experiments for the statistical error
    #[serde(default = "default_n_toys")]
    pub n_toys: usize,
    /// Flat relative systematic on every predicted component
    #[serde(default = "default_additional_syst")]
    pub additional_syst: f64,
    /// Inputs are simulation truth (closure test): no additional systematic
    #[serde(default)]
    pub mc_truth: bool,
    /// Base RNG seed
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Minimum accepted `|p - f|`
    #[serde(default = "default_min_separation")]
    pub min_separation: f64,
}

impl Default for MatrixMethodConfig {
    fn default() -> Self {
        Self {
            n_toys: default_n_toys(),
            additional_syst: default_additional_syst(),
            mc_truth: false,
            seed: default_seed(),
            min_separation: default_min_separation(),
        }
    }
}

/// Measured fake and prompt ratios per leg, with errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegInputs {
    /// Fake ratio, leg 1
    pub f1: Ratio,
    /// Prompt ratio, leg 1
    pub p1: Ratio,
    /// Fake ratio, leg 2
    pub f2: Ratio,
    /// Prompt ratio, leg 2
    pub p2: Ratio,
}

impl LegInputs {
    /// Both legs share one measurement.
    pub fn same_flavor(f: Ratio, p: Ratio) -> Self {
        Self { f1: f.clone(), p1: p.clone(), f2: f, p2: p }
    }

    /// Muon (leg 1) and electron (leg 2) measurements.
    pub fn mixed(f_mu: Ratio, p_mu: Ratio, f_el: Ratio, p_el: Ratio) -> Self {
        Self { f1: f_mu, p1: p_mu, f2: f_el, p2: p_el }
    }

    /// Central values.
    pub fn central(&self) -> LegRatios {
        LegRatios { f1: self.f1.value, p1: self.p1.value, f2: self.f2.value, p2: self.p2.value }
    }
}

/// Matrix-method prediction for one channel.
///
/// Components are tight-tight contributions; `fakes` is `pf + fp + ff` with its
/// own toy spread, so the correlation between components is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryWeights {
    /// Channel the counts belong to
    pub channel: Channel,
    /// Loose-level composition at the central ratios
    pub loose: Composition,
    /// Both prompt
    pub pp: Measurement,
    /// Leg 1 prompt, leg 2 fake (both orderings in same-flavor channels)
    pub pf: Measurement,
    /// Leg 1 fake, leg 2 prompt
    pub fp: Measurement,
    /// Both fake
    pub ff: Measurement,
    /// Fake background `pf + fp + ff`
    pub fakes: Measurement,
    /// Toys entering the error estimate
    pub n_toys: usize,
    /// Toys rejected by the separation guard
    pub n_toys_rejected: usize,
}

/// Matrix-method solver with toy-MC statistical errors.
#[derive(Debug, Clone)]
pub struct MatrixMethod {
    config: MatrixMethodConfig,
}

impl MatrixMethod {
    /// Create a solver, validating the configuration.
    pub fn new(config: MatrixMethodConfig) -> Result<Self> {
        if !(config.additional_syst.is_finite() && config.additional_syst >= 0.0) {
            return Err(Error::Validation(format!(
                "additional_syst must be >= 0, got {}",
                config.additional_syst
            )));
        }
        if !(config.min_separation.is_finite() && config.min_separation > 0.0) {
            return Err(Error::Validation(format!(
                "min_separation must be > 0, got {}",
                config.min_separation
            )));
        }
        Ok(Self { config })
    }

    /// Solver configuration.
    pub fn config(&self) -> &MatrixMethodConfig {
        &self.config
    }

    /// Relative systematic applied to predictions (zero for MC truth inputs).
    pub fn syst_fraction(&self) -> f64 {
        if self.config.mc_truth { 0.0 } else { self.config.additional_syst }
    }

    /// Solve one channel and propagate errors with toys.
    pub fn solve(
        &self,
        channel: Channel,
        inputs: &LegInputs,
        counts: &TightLooseCounts,
    ) -> Result<CategoryWeights> {
        for (name, r) in
            [("f1", &inputs.f1), ("p1", &inputs.p1), ("f2", &inputs.f2), ("p2", &inputs.p2)]
        {
            if r.degenerate {
                log::warn!("{}: {} is a degenerate ratio measurement", channel.label(), name);
            }
        }
        let central = inputs.central();
        let loose = matrix::solve(channel, &central, counts, self.config.min_separation)?;
        let tt = matrix::tight_tight_contributions(&central, &loose);

        let toys: Vec<Option<[f64; 5]>> = (0..self.config.n_toys)
            .into_par_iter()
            .map(|toy_idx| self.run_toy(toy_idx, channel, inputs, counts))
            .collect();
        let accepted: Vec<[f64; 5]> = toys.into_iter().flatten().collect();
        let n_rejected = self.config.n_toys - accepted.len();
        if n_rejected > 0 {
            log::warn!(
                "{}: {}/{} toys rejected by the separation guard",
                channel.label(),
                n_rejected,
                self.config.n_toys
            );
        }

        let spread = |k: usize| -> f64 {
            let column: Vec<f64> = accepted.iter().map(|t| t[k]).collect();
            sample_std(&column)
        };
        let frac = self.syst_fraction();
        let measurement = |value: f64, k: usize| Measurement::new(value, spread(k), (frac * value).abs());

        let out = CategoryWeights {
            channel,
            loose,
            pp: measurement(tt.pp, 0),
            pf: measurement(tt.pf, 1),
            fp: measurement(tt.fp, 2),
            ff: measurement(tt.ff, 3),
            fakes: measurement(tt.fakes(), 4),
            n_toys: accepted.len(),
            n_toys_rejected: n_rejected,
        };
        log::debug!(
            "{}: fakes = {:.3} +- {:.3} (stat) +- {:.3} (syst), {} toys",
            channel.label(),
            out.fakes.value,
            out.fakes.stat,
            out.fakes.syst,
            out.n_toys
        );
        Ok(out)
    }

    /// One toy: `[pp, pf, fp, ff, fakes]` at tight-tight level, or `None` if rejected.
    fn run_toy(
        &self,
        toy_idx: usize,
        channel: Channel,
        inputs: &LegInputs,
        counts: &TightLooseCounts,
    ) -> Option<[f64; 5]> {
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(toy_idx as u64));

        let f1 = sample_ratio(&mut rng, &inputs.f1);
        let p1 = sample_ratio(&mut rng, &inputs.p1);
        let ratios = if channel.is_same_flavor() {
            LegRatios::same_flavor(f1, p1)
        } else {
            let f2 = sample_ratio(&mut rng, &inputs.f2);
            let p2 = sample_ratio(&mut rng, &inputs.p2);
            LegRatios { f1, p1, f2, p2 }
        };

        let toy_counts = if channel.is_same_flavor() {
            TightLooseCounts::same_flavor(
                sample_count(&mut rng, counts.tt),
                sample_count(&mut rng, counts.single_tight()),
                sample_count(&mut rng, counts.ll),
            )
        } else {
            TightLooseCounts::new(
                sample_count(&mut rng, counts.tt),
                sample_count(&mut rng, counts.tl),
                sample_count(&mut rng, counts.lt),
                sample_count(&mut rng, counts.ll),
            )
        };

        let loose =
            matrix::solve(channel, &ratios, &toy_counts, self.config.min_separation).ok()?;
        let tt = matrix::tight_tight_contributions(&ratios, &loose);
        Some([tt.pp, tt.pf, tt.fp, tt.ff, tt.fakes()])
    }
}

/// Gaussian draw around a ratio, clipped to `[0, 1]`.
///
/// The normal deviate is drawn even when the error is zero so that every
/// toy consumes the same number of random values regardless of which
/// ratios carry an uncertainty.
fn sample_ratio(rng: &mut StdRng, ratio: &Ratio) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    let sigma = ratio.stat_error();
    if !(sigma.is_finite() && sigma > 0.0) {
        return ratio.value;
    }
    (ratio.value + sigma * z).clamp(0.0, 1.0)
}

/// Poisson draw with mean `mean`; non-positive or non-finite means give 0.
fn sample_count(rng: &mut StdRng, mean: f64) -> f64 {
    if !mean.is_finite() || mean <= 0.0 {
        return 0.0;
    }
    match Poisson::new(mean) {
        Ok(dist) => dist.sample(rng),
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn golden_inputs() -> LegInputs {
        LegInputs::same_flavor(Ratio::with_error(0.085, 5.8e-5), Ratio::with_error(0.930, 1.6e-3))
    }

    fn golden_counts() -> TightLooseCounts {
        TightLooseCounts::same_flavor(196.0, 4600.0, 768.0)
    }

    #[test]
    fn test_default_config() {
        let c = MatrixMethodConfig::default();
        assert_eq!(c.n_toys, 100);
        assert_eq!(c.additional_syst, 0.5);
        assert!(!c.mc_truth);
        let parsed: MatrixMethodConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn test_golden_central_values_and_syst() {
        let mm = MatrixMethod::new(MatrixMethodConfig::default()).unwrap();
        let w = mm.solve(Channel::MuMu, &golden_inputs(), &golden_counts()).unwrap();
        assert_relative_eq!(w.pp.value, -227.870276937082, max_relative = 1e-12);
        assert_relative_eq!(w.pf.value, 420.1694296138091, max_relative = 1e-12);
        assert_relative_eq!(w.ff.value, 3.7008473232729964, max_relative = 1e-10);
        assert_relative_eq!(w.fakes.value, w.pf.value + w.ff.value, max_relative = 1e-12);
        assert_relative_eq!(w.pf.syst, 0.5 * w.pf.value, max_relative = 1e-12);
        assert_relative_eq!(w.pp.syst, 0.5 * 227.870276937082, max_relative = 1e-12);
        assert_eq!(w.n_toys, 100);
        assert_eq!(w.n_toys_rejected, 0);
        assert!(w.fakes.stat > 0.0);
    }

    #[test]
    fn test_mc_truth_disables_syst() {
        let cfg = MatrixMethodConfig { mc_truth: true, n_toys: 10, ..Default::default() };
        let mm = MatrixMethod::new(cfg).unwrap();
        let w = mm.solve(Channel::ElEl, &golden_inputs(), &golden_counts()).unwrap();
        assert_eq!(w.fakes.syst, 0.0);
        assert_eq!(w.pp.syst, 0.0);
    }

    #[test]
    fn test_toys_reproducible_for_seed() {
        let cfg = MatrixMethodConfig { n_toys: 50, seed: 7, ..Default::default() };
        let mm = MatrixMethod::new(cfg).unwrap();
        let a = mm.solve(Channel::MuMu, &golden_inputs(), &golden_counts()).unwrap();
        let b = mm.solve(Channel::MuMu, &golden_inputs(), &golden_counts()).unwrap();
        assert_eq!(a, b);

        let other = MatrixMethod::new(MatrixMethodConfig { seed: 8, ..mm.config().clone() }).unwrap();
        let c = other.solve(Channel::MuMu, &golden_inputs(), &golden_counts()).unwrap();
        assert_ne!(a.fakes.stat, c.fakes.stat);
    }

    #[test]
    fn test_zero_errors_and_zero_counts_give_no_spread() {
        let inputs = LegInputs::same_flavor(Ratio::with_error(0.1, 0.0), Ratio::with_error(0.9, 0.0));
        let counts = TightLooseCounts::same_flavor(0.0, 0.0, 0.0);
        let mm = MatrixMethod::new(MatrixMethodConfig { n_toys: 20, ..Default::default() }).unwrap();
        let w = mm.solve(Channel::MuMu, &inputs, &counts).unwrap();
        assert_eq!(w.fakes.value, 0.0);
        assert_eq!(w.fakes.stat, 0.0);
    }

    #[test]
    fn test_ratio_draw_consumes_rng_without_error() {
        let mut exact = StdRng::seed_from_u64(7);
        let mut smeared = StdRng::seed_from_u64(7);
        assert_eq!(sample_ratio(&mut exact, &Ratio::with_error(0.2, 0.0)), 0.2);
        let drawn = sample_ratio(&mut smeared, &Ratio::with_error(0.2, 0.01));
        assert!((0.0..=1.0).contains(&drawn));
        assert_eq!(exact.random::<u64>(), smeared.random::<u64>());
    }

    #[test]
    fn test_zero_error_ratio_keeps_other_draws_fixed() {
        let counts = TightLooseCounts::new(20.0, 40.0, 35.0, 60.0);
        let base = LegInputs::mixed(
            Ratio::with_error(0.1, 0.0),
            Ratio::with_error(0.9, 0.0),
            Ratio::with_error(0.15, 0.02),
            Ratio::with_error(0.85, 0.0),
        );
        let mm = MatrixMethod::new(MatrixMethodConfig { n_toys: 50, ..Default::default() }).unwrap();
        let a = mm.solve(Channel::ElMu, &base, &counts).unwrap();
        let b = mm.solve(Channel::ElMu, &base, &counts).unwrap();
        assert_eq!(a.fakes.stat, b.fakes.stat);

        // Giving leg 1 an error must not reshuffle the leg 2 and count draws.
        let mut with_p1 = base.clone();
        with_p1.p1 = Ratio::with_error(0.9, 1e-9);
        let c = mm.solve(Channel::ElMu, &with_p1, &counts).unwrap();
        assert_relative_eq!(a.fakes.stat, c.fakes.stat, max_relative = 1e-4);
    }

    #[test]
    fn test_singular_central_value_is_error() {
        let inputs = LegInputs::same_flavor(Ratio::with_error(0.5, 0.01), Ratio::with_error(0.5, 0.01));
        let mm = MatrixMethod::new(MatrixMethodConfig::default()).unwrap();
        let err = mm.solve(Channel::MuMu, &inputs, &golden_counts()).unwrap_err();
        assert!(matches!(err, Error::SingularDecomposition { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = MatrixMethodConfig { additional_syst: -0.1, ..Default::default() };
        assert!(MatrixMethod::new(bad).is_err());
        let bad = MatrixMethodConfig { min_separation: 0.0, ..Default::default() };
        assert!(MatrixMethod::new(bad).is_err());
    }
}
