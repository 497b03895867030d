//! Electron charge mis-identification.
//!
//! The flip probability per electron is measured from same-sign and
//! opposite-sign pairs in a Z-peak selection, split by the detector region of
//! the two electrons, and applied to opposite-sign tight-tight pairs in the
//! signal regions.

use serde::{Deserialize, Serialize};
use ssdl_core::{
    Channel, DetectorCounts, DetectorPair, Error, Measurement, Result, Sample, YieldSource,
};
use ssdl_prob::math::quadrature;

use crate::yields::sample_scale;

/// Flip probabilities per detector partition.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChargeMisIdProbability {
    /// Barrel-barrel
    pub bb: Measurement,
    /// Barrel-endcap
    pub be: Measurement,
    /// Endcap-endcap
    pub ee: Measurement,
}

impl ChargeMisIdProbability {
    /// Probability for one partition.
    pub fn get(&self, pair: DetectorPair) -> &Measurement {
        match pair {
            DetectorPair::BarrelBarrel => &self.bb,
            DetectorPair::BarrelEndcap => &self.be,
            DetectorPair::EndcapEndcap => &self.ee,
        }
    }
}

/// Measures flip probabilities from a charge-flip control selection.
#[derive(Debug, Clone)]
pub struct ChargeMisIdModel {
    target_lumi: f64,
    syst_fraction: f64,
}

impl ChargeMisIdModel {
    /// Model normalising simulation to `target_lumi`, with no systematic.
    pub fn new(target_lumi: f64) -> Result<Self> {
        if !(target_lumi.is_finite() && target_lumi > 0.0) {
            return Err(Error::Validation(format!("target lumi must be > 0, got {}", target_lumi)));
        }
        Ok(Self { target_lumi, syst_fraction: 0.0 })
    }

    /// Flat relative systematic applied to every flip probability.
    pub fn with_syst_fraction(mut self, fraction: f64) -> Result<Self> {
        if !(fraction.is_finite() && fraction >= 0.0) {
            return Err(Error::Validation(format!(
                "flip systematic fraction must be >= 0, got {}",
                fraction
            )));
        }
        self.syst_fraction = fraction;
        Ok(self)
    }

    /// `0.5 * Nss / Nos` with the Poisson error propagated through the ratio.
    ///
    /// `Nos == 0` yields a zero probability with zero error.
    pub fn flip_from_counts(&self, same_sign: f64, opposite_sign: f64) -> Result<Measurement> {
        if !(same_sign.is_finite() && opposite_sign.is_finite())
            || same_sign < 0.0
            || opposite_sign < 0.0
        {
            return Err(Error::Validation(format!(
                "flip counts must be finite and non-negative, got ss={} os={}",
                same_sign, opposite_sign
            )));
        }
        if opposite_sign == 0.0 {
            log::warn!("charge flip: no opposite-sign pairs (ss={}), probability set to 0", same_sign);
            return Ok(Measurement::zero());
        }
        let nss = same_sign;
        let nos = opposite_sign;
        let value = 0.5 * nss / nos;
        let stat = 0.5 * (nss / (nos * nos) + nss * nss / (nos * nos * nos)).sqrt();
        Ok(Measurement::new(value, stat, self.syst_fraction * value))
    }

    fn scaled_counts<S: YieldSource + ?Sized>(
        &self,
        source: &S,
        samples: &[Sample],
    ) -> Result<(DetectorCounts, DetectorCounts)> {
        if samples.is_empty() {
            return Err(Error::Validation("charge flip needs at least one sample".to_string()));
        }
        let mut ss = DetectorCounts::default();
        let mut os = DetectorCounts::default();
        for sample in samples {
            let scale = sample_scale(sample, self.target_lumi)?;
            let counts = source.flip_counts(sample)?;
            ss.add_scaled(&counts.same_sign, scale);
            os.add_scaled(&counts.opposite_sign, scale);
        }
        Ok((ss, os))
    }

    /// Flip probability in one detector partition.
    pub fn measure_charge_flip<S: YieldSource + ?Sized>(
        &self,
        source: &S,
        samples: &[Sample],
        pair: DetectorPair,
    ) -> Result<Measurement> {
        let (ss, os) = self.scaled_counts(source, samples)?;
        self.flip_from_counts(ss.get(pair), os.get(pair))
    }

    /// Flip probabilities in all partitions.
    pub fn measure<S: YieldSource + ?Sized>(
        &self,
        source: &S,
        samples: &[Sample],
    ) -> Result<ChargeMisIdProbability> {
        let (ss, os) = self.scaled_counts(source, samples)?;
        let prob = ChargeMisIdProbability {
            bb: self.flip_from_counts(ss.bb, os.bb)?,
            be: self.flip_from_counts(ss.be, os.be)?,
            ee: self.flip_from_counts(ss.ee, os.ee)?,
        };
        log::debug!(
            "charge flip: bb={:.3e} be={:.3e} ee={:.3e}",
            prob.bb.value,
            prob.be.value,
            prob.ee.value
        );
        Ok(prob)
    }
}

/// Expected same-sign yield from charge mis-identification in `channel`.
///
/// Each opposite-sign pair contributes `k * flip` with `k` the number of
/// electron legs. In the mixed channel `os_counts` is keyed by the electron's
/// own detector region (`bb` for barrel, `ee` for endcap).
pub fn predict_charge_mis_id_yield(
    probability: &ChargeMisIdProbability,
    os_counts: &DetectorCounts,
    channel: Channel,
) -> Measurement {
    let k = channel.n_electrons() as f64;
    if k == 0.0 {
        return Measurement::zero();
    }
    let mut value = 0.0;
    let mut stat = Vec::with_capacity(3);
    let mut syst = Vec::with_capacity(3);
    for pair in DetectorPair::ALL {
        let n = os_counts.get(pair);
        let flip = probability.get(pair);
        value += k * flip.value * n;
        stat.push(k * flip.value * n.max(0.0).sqrt());
        syst.push(k * n * flip.total_error());
    }
    Measurement::new(value, quadrature(stat), quadrature(syst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn probability(bb: f64, be: f64, ee: f64) -> ChargeMisIdProbability {
        ChargeMisIdProbability {
            bb: Measurement::new(bb, 0.0, 0.0),
            be: Measurement::new(be, 0.0, 0.0),
            ee: Measurement::new(ee, 0.0, 0.0),
        }
    }

    #[test]
    fn test_flip_from_counts() {
        let model = ChargeMisIdModel::new(1.0).unwrap().with_syst_fraction(0.1).unwrap();
        let m = model.flip_from_counts(4.0, 1000.0).unwrap();
        assert_relative_eq!(m.value, 0.002, epsilon = 1e-15);
        let expected = 0.5 * (4.0 / 1e6 + 16.0 / 1e9_f64).sqrt();
        assert_relative_eq!(m.stat, expected, epsilon = 1e-15);
        assert_relative_eq!(m.syst, 0.0002, epsilon = 1e-15);
    }

    #[test]
    fn test_flip_zero_opposite_sign() {
        let model = ChargeMisIdModel::new(1.0).unwrap();
        assert_eq!(model.flip_from_counts(3.0, 0.0).unwrap(), Measurement::zero());
        assert!(model.flip_from_counts(-1.0, 10.0).is_err());
    }

    #[test]
    fn test_worked_example() {
        let p = probability(0.00023, 0.00093, 0.00222);
        let os = DetectorCounts::new(100.0, 20.0, 5.0);
        let y = predict_charge_mis_id_yield(&p, &os, Channel::ElEl);
        assert_relative_eq!(y.value, 0.1054, epsilon = 1e-12);
        assert_eq!(y.syst, 0.0);
    }

    #[test]
    fn test_mixed_channel_uses_single_leg() {
        let p = probability(0.001, 0.0, 0.004);
        let os = DetectorCounts::new(50.0, 0.0, 10.0);
        let y = predict_charge_mis_id_yield(&p, &os, Channel::ElMu);
        assert_relative_eq!(y.value, 0.09, epsilon = 1e-12);
        assert_eq!(predict_charge_mis_id_yield(&p, &os, Channel::MuMu), Measurement::zero());
    }

    #[test]
    fn test_prediction_is_linear_in_counts() {
        let p = probability(0.0003, 0.0011, 0.0025);
        let os = DetectorCounts::new(120.0, 33.0, 9.0);
        let y1 = predict_charge_mis_id_yield(&p, &os, Channel::ElEl);
        let mut doubled = os;
        doubled.add_scaled(&os, 1.0);
        let y2 = predict_charge_mis_id_yield(&p, &doubled, Channel::ElEl);
        assert_relative_eq!(y2.value, 2.0 * y1.value, epsilon = 1e-15);
    }

    #[test]
    fn test_errors_propagate() {
        let p = ChargeMisIdProbability {
            bb: Measurement::new(0.001, 0.0003, 0.0004),
            be: Measurement::zero(),
            ee: Measurement::zero(),
        };
        let y = predict_charge_mis_id_yield(&p, &DetectorCounts::new(100.0, 0.0, 0.0), Channel::ElEl);
        assert_relative_eq!(y.stat, 2.0 * 0.001 * 10.0, epsilon = 1e-15);
        assert_relative_eq!(y.syst, 2.0 * 100.0 * 0.0005, epsilon = 1e-12);
    }
}
