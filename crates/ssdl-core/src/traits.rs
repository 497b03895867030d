//! Core traits for the SSDL estimator
//!
//! Estimators never read events directly: every count reaches them through
//! [`YieldSource`], so the matrix method and the region aggregation do not
//! depend on how events were stored or selected.

use crate::Result;
use crate::types::{
    Binning2D, Channel, ChargeFlipCounts, ClassifiedEvent, ControlKind, DetectorCounts, Flavor,
    PassedTotal, RegionDef, Sample, TightLooseCounts,
};

/// Provider of per-sample, un-scaled event counts.
///
/// Luminosity scaling is applied by the caller (see `Sample::scale`).
pub trait YieldSource {
    /// Control-lepton tight (passed) and loose (total) counts in a ratio control region.
    fn passed_total(&self, sample: &Sample, flavor: Flavor, kind: ControlKind)
    -> Result<PassedTotal>;

    /// Same as [`passed_total`](Self::passed_total), split into (pT, |eta|) cells.
    ///
    /// The returned vector has `binning.n_cells()` entries in row-major order.
    fn passed_total_binned(
        &self,
        sample: &Sample,
        flavor: Flavor,
        kind: ControlKind,
        binning: &Binning2D,
    ) -> Result<Vec<PassedTotal>>;

    /// Same-sign dilepton counts per tight/loose category in a region.
    fn tight_loose_counts(
        &self,
        sample: &Sample,
        region: &RegionDef,
        channel: Channel,
    ) -> Result<TightLooseCounts>;

    /// Opposite-sign tight-tight counts per electron detector partition in a region.
    fn opposite_sign_counts(
        &self,
        sample: &Sample,
        region: &RegionDef,
        channel: Channel,
    ) -> Result<DetectorCounts>;

    /// Electron pairs in the charge-flip control selection.
    fn flip_counts(&self, sample: &Sample) -> Result<ChargeFlipCounts>;

    /// Individual same-sign loose-loose events in a region, for per-event weights.
    fn loose_events(
        &self,
        sample: &Sample,
        region: &RegionDef,
        channel: Channel,
    ) -> Result<Vec<ClassifiedEvent>>;
}
