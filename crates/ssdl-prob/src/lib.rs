//! Probability building blocks for the SSDL estimator.
//!
//! This crate hosts the counting statistics shared by the ratio measurements
//! and the region aggregation:
//! - tight/loose efficiency errors (binomial, Poisson, Clopper-Pearson)
//! - Poisson intervals on observed counts (Garwood)
//! - small helpers for quadrature sums and toy spreads

pub mod efficiency;
pub mod math;
pub mod poisson;

/// Central 1-sigma confidence level used for all intervals.
pub const ONE_SIGMA_CL: f64 = 0.682689;
