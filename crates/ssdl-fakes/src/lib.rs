//! # ssdl-fakes
//!
//! Background estimation for same-sign dilepton searches.
//!
//! This crate provides:
//! - tight/loose fake and prompt ratio measurements (integrated and binned)
//! - electron charge mis-identification probabilities and predictions
//! - the tight/loose matrix method with toy-MC statistical errors
//! - per-region aggregation of fake, charge-flip, rare-SM and diboson yields
//!
//! ## Architecture
//!
//! Every count is read through `ssdl_core::YieldSource`; [`EventStore`] is the
//! in-memory implementation used by the CLI and the tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Electron charge mis-identification.
pub mod chmid;
/// Closed-form tight/loose inversions and per-event weights.
pub mod matrix;
/// Tight/loose ratio measurements.
pub mod ratio;
/// Region-level background aggregation.
pub mod region;
/// In-memory classified event store.
pub mod store;
/// Toy-MC error propagation for the matrix method.
pub mod toys;
/// Luminosity-scaled sums over sample lists.
pub mod yields;

pub use chmid::{ChargeMisIdModel, ChargeMisIdProbability, predict_charge_mis_id_yield};
pub use matrix::{Composition, LegRatios};
pub use ratio::{ErrorMethod, ErrorMode, Ratio, RatioMap, TightLooseRatioEstimator};
pub use region::{
    AggregatorConfig, ChannelPrediction, FakeMethod, FakeRatioInputs, ObservedCount, RatioMaps,
    RegionAggregator, RegionPrediction,
};
pub use store::EventStore;
pub use toys::{CategoryWeights, LegInputs, MatrixMethod, MatrixMethodConfig};
