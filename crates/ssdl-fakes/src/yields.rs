use ssdl_core::{
    Channel, ControlKind, DetectorCounts, Error, Flavor, Measurement, PassedTotal, RegionDef,
    Result, Sample, TightLooseCounts, YieldSource,
};
use ssdl_prob::math::quadrature;
use ssdl_prob::poisson::scaled_entries_error;

/// Luminosity weight of `sample`, validating the luminosities involved.
pub fn sample_scale(sample: &Sample, target_lumi: f64) -> Result<f64> {
    if sample.is_data() {
        return Ok(1.0);
    }
    if !(target_lumi.is_finite() && target_lumi > 0.0) {
        return Err(Error::Validation(format!("target lumi must be > 0, got {}", target_lumi)));
    }
    if !(sample.lumi.is_finite() && sample.lumi > 0.0) {
        return Err(Error::Validation(format!(
            "sample '{}' has non-positive lumi {}",
            sample.name, sample.lumi
        )));
    }
    Ok(sample.scale(target_lumi))
}

/// Scaled passed/total counts summed over `samples`.
pub fn get_passed_total<S: YieldSource + ?Sized>(
    source: &S,
    samples: &[Sample],
    target_lumi: f64,
    flavor: Flavor,
    kind: ControlKind,
) -> Result<PassedTotal> {
    let mut acc = PassedTotal::default();
    for sample in samples {
        let scale = sample_scale(sample, target_lumi)?;
        let counts = source.passed_total(sample, flavor, kind)?;
        log::debug!(
            "{} {:?} {}: passed={} total={} scale={}",
            flavor.label(),
            kind,
            sample.name,
            counts.passed,
            counts.total,
            scale
        );
        acc.add_scaled(&counts, scale);
    }
    Ok(acc)
}

/// Scaled tight/loose category counts summed over `samples`.
pub fn get_tight_loose_counts<S: YieldSource + ?Sized>(
    source: &S,
    samples: &[Sample],
    target_lumi: f64,
    region: &RegionDef,
    channel: Channel,
) -> Result<TightLooseCounts> {
    let mut acc = TightLooseCounts::default();
    for sample in samples {
        let scale = sample_scale(sample, target_lumi)?;
        acc.add_scaled(&source.tight_loose_counts(sample, region, channel)?, scale);
    }
    Ok(acc)
}

/// Scaled opposite-sign tight-tight counts summed over `samples`.
pub fn get_opposite_sign_counts<S: YieldSource + ?Sized>(
    source: &S,
    samples: &[Sample],
    target_lumi: f64,
    region: &RegionDef,
    channel: Channel,
) -> Result<DetectorCounts> {
    let mut acc = DetectorCounts::default();
    for sample in samples {
        let scale = sample_scale(sample, target_lumi)?;
        acc.add_scaled(&source.opposite_sign_counts(sample, region, channel)?, scale);
    }
    Ok(acc)
}

/// Scaled same-sign tight-tight MC yield with statistical error
/// `sqrt(sum scale^2 * sum w^2)`, which is `scale * sqrt(raw_entries)` for
/// unit-weight events. The systematic is left at zero.
pub fn get_tight_tight_yield<S: YieldSource + ?Sized>(
    source: &S,
    samples: &[Sample],
    target_lumi: f64,
    region: &RegionDef,
    channel: Channel,
) -> Result<Measurement> {
    let mut value = 0.0;
    let mut errors = Vec::with_capacity(samples.len());
    for sample in samples {
        let scale = sample_scale(sample, target_lumi)?;
        let counts = source.tight_loose_counts(sample, region, channel)?;
        value += scale * counts.tt;
        errors.push(scaled_entries_error(counts.tt_sumw2, scale));
    }
    Ok(Measurement::new(value, quadrature(errors), 0.0))
}
