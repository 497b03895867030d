//! Tight/loose ratio measurements.
//!
//! The fake ratio `f` is measured on control-region leptons in a signal-suppressed
//! control selection, the prompt ratio `p` in a Z-decay enriched one. Both are
//! `Σ tight / Σ loose` over luminosity-scaled samples.

use serde::{Deserialize, Serialize};
use ssdl_core::{Binning2D, ControlKind, Error, Flavor, PassedTotal, Result, Sample, YieldSource};
use ssdl_prob::ONE_SIGMA_CL;
use ssdl_prob::efficiency::{as_integer_count, binomial_error, clopper_pearson, poisson_ratio_error};

use crate::yields::{get_passed_total, sample_scale};

/// Requested error treatment for a ratio measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Clopper-Pearson for integer data-only counts, binomial otherwise.
    #[default]
    Auto,
    /// Symmetric binomial error.
    Binomial,
    /// Numerator and denominator as independent Poisson counts.
    Poisson,
    /// Asymmetric Clopper-Pearson 68.3% interval (integer counts required).
    ClopperPearson,
}

/// Error treatment actually applied to a [`Ratio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMethod {
    /// Symmetric binomial error
    Binomial,
    /// Symmetric Poisson ratio error
    Poisson,
    /// Clopper-Pearson interval
    ClopperPearson,
    /// Supplied from outside (configuration, previous measurement)
    External,
    /// Zero denominator: sentinel value
    Degenerate,
}

/// A measured tight/loose ratio with (possibly asymmetric) errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ratio {
    /// Central value
    pub value: f64,
    /// Downward error (non-negative)
    pub error_low: f64,
    /// Upward error; `None` when undefined (degenerate measurement)
    pub error_high: Option<f64>,
    /// How the errors were obtained
    pub method: ErrorMethod,
    /// Zero-denominator sentinel
    #[serde(default)]
    pub degenerate: bool,
    /// Human-readable remark for degenerate or adjusted values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Ratio {
    /// Ratio with a symmetric externally-supplied error.
    pub fn with_error(value: f64, error: f64) -> Self {
        Self {
            value,
            error_low: error,
            error_high: Some(error),
            method: ErrorMethod::External,
            degenerate: false,
            note: None,
        }
    }

    /// Sentinel returned when no control-region lepton passed the loose selection.
    pub fn degenerate() -> Self {
        Self {
            value: 1.0,
            error_low: 0.0,
            error_high: None,
            method: ErrorMethod::Degenerate,
            degenerate: true,
            note: Some("zero denominator: ratio set to 1, upper error undefined".to_string()),
        }
    }

    /// Ratio from scaled passed/total counts using the given mode.
    ///
    /// `all_data` restricts [`ErrorMode::Auto`] to Clopper-Pearson only when
    /// every contributing sample is unscaled collision data.
    pub fn from_counts(counts: &PassedTotal, mode: ErrorMode, all_data: bool) -> Result<Self> {
        let PassedTotal { passed, total } = *counts;
        if !(passed.is_finite() && total.is_finite()) || passed < 0.0 || total < 0.0 {
            return Err(Error::Validation(format!(
                "ratio counts must be finite and non-negative, got {}/{}",
                passed, total
            )));
        }
        if total == 0.0 {
            return Ok(Self::degenerate());
        }

        let integers = as_integer_count(passed).zip(as_integer_count(total));
        let method = match mode {
            ErrorMode::Auto if all_data && integers.is_some() => ErrorMethod::ClopperPearson,
            ErrorMode::Auto | ErrorMode::Binomial => ErrorMethod::Binomial,
            ErrorMode::Poisson => ErrorMethod::Poisson,
            ErrorMode::ClopperPearson => ErrorMethod::ClopperPearson,
        };

        let value = passed / total;
        let (error_low, error_high) = match method {
            ErrorMethod::ClopperPearson => {
                let (k, n) = integers.ok_or_else(|| {
                    Error::Validation(format!(
                        "Clopper-Pearson needs integer counts, got {}/{}",
                        passed, total
                    ))
                })?;
                let (lo, hi) = clopper_pearson(k, n, ONE_SIGMA_CL)?;
                ((value - lo).max(0.0), (hi - value).max(0.0))
            }
            ErrorMethod::Poisson => {
                let e = poisson_ratio_error(passed, total)?;
                (e, e)
            }
            _ => {
                let e = binomial_error(passed, total)?;
                (e, e)
            }
        };

        Ok(Self { value, error_low, error_high: Some(error_high), method, degenerate: false, note: None })
    }

    /// Symmetrized statistical error: the mean of the two sides, or the lower
    /// error alone when the upper one is undefined.
    pub fn stat_error(&self) -> f64 {
        match self.error_high {
            Some(hi) => 0.5 * (self.error_low + hi),
            None => self.error_low,
        }
    }

    /// Copy with an absolute systematic `syst` added in quadrature to both sides.
    pub fn with_systematic(&self, syst: f64) -> Self {
        let mut out = self.clone();
        out.error_low = self.error_low.hypot(syst);
        out.error_high = self.error_high.map(|hi| hi.hypot(syst));
        out
    }
}

/// Measures fake and prompt ratios from a [`YieldSource`].
#[derive(Debug, Clone)]
pub struct TightLooseRatioEstimator {
    target_lumi: f64,
    error_mode: ErrorMode,
}

impl TightLooseRatioEstimator {
    /// Create an estimator normalising simulation to `target_lumi` (pb^-1).
    pub fn new(target_lumi: f64) -> Result<Self> {
        if !(target_lumi.is_finite() && target_lumi > 0.0) {
            return Err(Error::Validation(format!("target lumi must be > 0, got {}", target_lumi)));
        }
        Ok(Self { target_lumi, error_mode: ErrorMode::Auto })
    }

    /// Force an error treatment.
    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// Target luminosity used for simulation scaling.
    pub fn target_lumi(&self) -> f64 {
        self.target_lumi
    }

    /// Integrated ratio over all control-region leptons of `flavor` in the `kind` control region.
    pub fn measure_ratio<S: YieldSource + ?Sized>(
        &self,
        source: &S,
        samples: &[Sample],
        flavor: Flavor,
        kind: ControlKind,
    ) -> Result<Ratio> {
        if samples.is_empty() {
            return Err(Error::Validation("measure_ratio needs at least one sample".to_string()));
        }
        let counts = get_passed_total(source, samples, self.target_lumi, flavor, kind)?;
        let all_data = samples.iter().all(Sample::is_data);
        let ratio = Ratio::from_counts(&counts, self.error_mode, all_data)?;
        if ratio.degenerate {
            log::warn!(
                "{} {:?} ratio: no loose control-region leptons in {} sample(s), using sentinel 1",
                flavor.label(),
                kind,
                samples.len()
            );
        }
        Ok(ratio)
    }

    /// Ratio map in (pT, |eta|) cells.
    pub fn measure_ratio_map<S: YieldSource + ?Sized>(
        &self,
        source: &S,
        samples: &[Sample],
        flavor: Flavor,
        kind: ControlKind,
        binning: &Binning2D,
    ) -> Result<RatioMap> {
        validate_binning(binning)?;

        let n_cells = binning.n_cells();
        let mut cells = vec![PassedTotal::default(); n_cells];
        for sample in samples {
            let scale = sample_scale(sample, self.target_lumi)?;
            let binned = source.passed_total_binned(sample, flavor, kind, binning)?;
            if binned.len() != n_cells {
                return Err(Error::Validation(format!(
                    "sample '{}': expected {} cells, got {}",
                    sample.name,
                    n_cells,
                    binned.len()
                )));
            }
            for (acc, c) in cells.iter_mut().zip(&binned) {
                acc.add_scaled(c, scale);
            }
        }

        let all_data = samples.iter().all(Sample::is_data);
        let n_eta = binning.n_eta();
        let mut pt_proj = vec![PassedTotal::default(); binning.n_pt()];
        let mut eta_proj = vec![PassedTotal::default(); n_eta];
        for (idx, c) in cells.iter().enumerate() {
            pt_proj[idx / n_eta].add_scaled(c, 1.0);
            eta_proj[idx % n_eta].add_scaled(c, 1.0);
        }

        let to_ratios = |counts: &[PassedTotal]| -> Result<Vec<Ratio>> {
            counts.iter().map(|c| Ratio::from_counts(c, self.error_mode, all_data)).collect()
        };
        let map = RatioMap {
            flavor,
            kind,
            binning: binning.clone(),
            cells: to_ratios(&cells)?,
            pt_projection: to_ratios(&pt_proj)?,
            eta_projection: to_ratios(&eta_proj)?,
        };
        let n_degenerate = map.cells.iter().filter(|r| r.degenerate).count();
        if n_degenerate > 0 {
            log::warn!(
                "{} {:?} ratio map: {}/{} cells have no loose leptons",
                flavor.label(),
                kind,
                n_degenerate,
                n_cells
            );
        }
        Ok(map)
    }
}

/// Binned tight/loose ratio with projections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioMap {
    /// Lepton flavor
    pub flavor: Flavor,
    /// Control region the ratio was measured in
    pub kind: ControlKind,
    /// Cell layout
    pub binning: Binning2D,
    /// Per-cell ratios, row-major (pT outer)
    pub cells: Vec<Ratio>,
    /// Ratio per pT bin, integrated over |eta|
    pub pt_projection: Vec<Ratio>,
    /// Ratio per |eta| bin, integrated over pT
    pub eta_projection: Vec<Ratio>,
}

impl RatioMap {
    /// Check that the cells and projections match the binning.
    pub fn validate(&self) -> Result<()> {
        validate_binning(&self.binning)?;
        let expected = [
            ("cells", self.cells.len(), self.binning.n_cells()),
            ("pt_projection", self.pt_projection.len(), self.binning.n_pt()),
            ("eta_projection", self.eta_projection.len(), self.binning.n_eta()),
        ];
        for (what, got, want) in expected {
            if got != want {
                return Err(Error::Validation(format!(
                    "{} {:?} ratio map: {} has {} entries, binning needs {}",
                    self.flavor.label(),
                    self.kind,
                    what,
                    got,
                    want
                )));
            }
        }
        Ok(())
    }

    /// Ratio of the cell containing `(pt, eta)`; out-of-range values clamp.
    pub fn lookup(&self, pt: f64, eta: f64) -> Result<&Ratio> {
        let idx = self.binning.cell(pt, eta);
        self.cells.get(idx).ok_or_else(|| {
            Error::Validation(format!(
                "{} {:?} ratio map has no cell {} ({} cells)",
                self.flavor.label(),
                self.kind,
                idx,
                self.cells.len()
            ))
        })
    }

    /// Ratio in cell `(i_pt, i_eta)`.
    pub fn get(&self, i_pt: usize, i_eta: usize) -> Option<&Ratio> {
        if i_pt >= self.binning.n_pt() || i_eta >= self.binning.n_eta() {
            return None;
        }
        self.cells.get(i_pt * self.binning.n_eta() + i_eta)
    }
}

fn validate_binning(binning: &Binning2D) -> Result<()> {
    if binning.n_pt() == 0 || binning.n_eta() == 0 {
        return Err(Error::Validation("binning needs at least one pT and one eta bin".into()));
    }
    for edges in [&binning.pt_edges, &binning.eta_edges] {
        if edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(Error::Validation(format!("bin edges must increase: {:?}", edges)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_counts_auto_uses_clopper_pearson_for_data() {
        let r = Ratio::from_counts(&PassedTotal::new(20.0, 80.0), ErrorMode::Auto, true).unwrap();
        assert_eq!(r.method, ErrorMethod::ClopperPearson);
        assert_relative_eq!(r.value, 0.25);
        assert!(r.error_low > 0.0 && r.error_high.unwrap() > 0.0);
        assert!(r.error_low != r.error_high.unwrap());
    }

    #[test]
    fn test_from_counts_auto_uses_binomial_for_weighted() {
        let r = Ratio::from_counts(&PassedTotal::new(20.5, 80.0), ErrorMode::Auto, true).unwrap();
        assert_eq!(r.method, ErrorMethod::Binomial);
        let mc = Ratio::from_counts(&PassedTotal::new(20.0, 80.0), ErrorMode::Auto, false).unwrap();
        assert_eq!(mc.method, ErrorMethod::Binomial);
        assert_relative_eq!(mc.stat_error(), (20.0_f64 * 0.75).sqrt() / 80.0, epsilon = 1e-15);
    }

    #[test]
    fn test_forced_clopper_pearson_rejects_weights() {
        let err = Ratio::from_counts(&PassedTotal::new(2.5, 8.0), ErrorMode::ClopperPearson, false);
        assert!(err.is_err());
    }

    #[test]
    fn test_zero_denominator_is_sentinel() {
        let r = Ratio::from_counts(&PassedTotal::new(0.0, 0.0), ErrorMode::Auto, true).unwrap();
        assert!(r.degenerate);
        assert_eq!(r.value, 1.0);
        assert_eq!(r.error_low, 0.0);
        assert!(r.error_high.is_none());
        assert!(r.stat_error().is_finite());
    }

    #[test]
    fn test_with_systematic_adds_in_quadrature() {
        let r = Ratio::with_error(0.1, 0.03).with_systematic(0.04);
        assert_relative_eq!(r.error_low, 0.05, epsilon = 1e-15);
        assert_relative_eq!(r.error_high.unwrap(), 0.05, epsilon = 1e-15);
        assert_eq!(Ratio::degenerate().with_systematic(0.1).error_high, None);
    }

    fn map_2x1(n_cells: usize) -> RatioMap {
        let r = Ratio::with_error(0.1, 0.01);
        RatioMap {
            flavor: Flavor::Muon,
            kind: ControlKind::SignalSuppressed,
            binning: Binning2D::new(vec![10.0, 30.0, 100.0], vec![0.0, 2.5]),
            cells: vec![r.clone(); n_cells],
            pt_projection: vec![r.clone(); 2],
            eta_projection: vec![r],
        }
    }

    #[test]
    fn test_short_ratio_map_is_rejected() {
        let short = map_2x1(1);
        assert!(matches!(short.validate(), Err(Error::Validation(_))));
        assert!(short.lookup(15.0, 0.5).is_ok());
        assert!(matches!(short.lookup(50.0, 0.5), Err(Error::Validation(_))));

        let full = map_2x1(2);
        full.validate().unwrap();
        assert_eq!(full.lookup(50.0, 0.5).unwrap().value, 0.1);
    }

    #[test]
    fn test_estimator_rejects_bad_lumi() {
        assert!(TightLooseRatioEstimator::new(0.0).is_err());
        assert!(TightLooseRatioEstimator::new(f64::NAN).is_err());
        assert!(TightLooseRatioEstimator::new(35.0).is_ok());
    }
}
