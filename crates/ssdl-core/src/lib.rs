//! # ssdl-core
//!
//! Shared vocabulary for the same-sign dilepton background estimator:
//! lepton flavors, dilepton channels, tight/loose categories, samples,
//! measurement triples and the [`YieldSource`](traits::YieldSource) seam
//! through which event counts reach the estimators.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::YieldSource;
pub use types::{
    Binning2D, Channel, ChargeFlipCounts, ClassifiedEvent, ControlKind, DetectorCounts,
    DetectorPair, Flavor, LegKinematics, Measurement, PassedTotal, RegionDef, Sample, SampleKind,
    TightLooseCounts, TlCategory,
};

/// Crate version, reported by the CLI and embedded in artifacts.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
