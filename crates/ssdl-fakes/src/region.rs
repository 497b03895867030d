//! Region-level background prediction.
//!
//! For each channel the same-sign tight-tight selection is populated by:
//! - fakes: matrix method on the data tight/loose counts,
//! - charge mis-ID: flip probabilities applied to opposite-sign data,
//! - rare SM and diboson processes: luminosity-scaled simulation.
//!
//! Statistical errors combine in quadrature everywhere. Systematics combine
//! in quadrature within a channel; across channels each background's
//! systematic is taken as fully correlated (linear sum) before the
//! backgrounds are combined in quadrature.

use serde::{Deserialize, Serialize};
use ssdl_core::{
    Channel, ControlKind, Error, Flavor, LegKinematics, Measurement, RegionDef, Result, Sample,
    SampleKind, TightLooseCounts, YieldSource,
};
use ssdl_prob::ONE_SIGMA_CL;
use ssdl_prob::efficiency::as_integer_count;
use ssdl_prob::math::quadrature;
use ssdl_prob::poisson::garwood_errors;

use crate::chmid::{ChargeMisIdProbability, predict_charge_mis_id_yield};
use crate::matrix::{Composition, LegRatios, checked_event_weights};
use crate::ratio::{Ratio, RatioMap};
use crate::toys::{LegInputs, MatrixMethod, MatrixMethodConfig};
use crate::yields::{
    get_opposite_sign_counts, get_tight_loose_counts, get_tight_tight_yield, sample_scale,
};

/// How the fake background is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FakeMethod {
    /// One ratio per flavor applied to the category counts, toy-MC errors.
    #[default]
    Integrated,
    /// Per-event weights from binned ratio maps.
    PerEvent,
}

fn default_rare_syst() -> f64 {
    0.5
}

fn default_diboson_syst() -> f64 {
    0.2
}

fn default_true() -> bool {
    true
}

/// Aggregator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Luminosity simulation is normalised to (pb^-1)
    pub target_lumi: f64,
    /// Matrix-method settings
    #[serde(default)]
    pub matrix: MatrixMethodConfig,
    /// Fake estimation mode
    #[serde(default)]
    pub fake_method: FakeMethod,
    /// Flat relative systematic on rare SM yields
    #[serde(default = "default_rare_syst")]
    pub rare_syst: f64,
    /// Flat relative systematic on diboson yields
    #[serde(default = "default_diboson_syst")]
    pub diboson_syst: f64,
    /// Include the charge mis-ID background
    #[serde(default = "default_true")]
    pub include_charge_mis_id: bool,
    /// Include rare SM backgrounds
    #[serde(default = "default_true")]
    pub include_rare: bool,
    /// Include diboson backgrounds
    #[serde(default = "default_true")]
    pub include_diboson: bool,
}

impl AggregatorConfig {
    /// Defaults for everything but the luminosity.
    pub fn new(target_lumi: f64) -> Self {
        Self {
            target_lumi,
            matrix: MatrixMethodConfig::default(),
            fake_method: FakeMethod::default(),
            rare_syst: default_rare_syst(),
            diboson_syst: default_diboson_syst(),
            include_charge_mis_id: true,
            include_rare: true,
            include_diboson: true,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.target_lumi.is_finite() && self.target_lumi > 0.0) {
            return Err(Error::Validation(format!(
                "target lumi must be > 0, got {}",
                self.target_lumi
            )));
        }
        for (name, v) in [("rare_syst", self.rare_syst), ("diboson_syst", self.diboson_syst)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(Error::Validation(format!("{} must be >= 0, got {}", name, v)));
            }
        }
        Ok(())
    }
}

/// Integrated fake and prompt ratios per flavor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeRatioInputs {
    /// Muon fake ratio
    pub mu_fake: Ratio,
    /// Muon prompt ratio
    pub mu_prompt: Ratio,
    /// Electron fake ratio
    pub el_fake: Ratio,
    /// Electron prompt ratio
    pub el_prompt: Ratio,
}

impl FakeRatioInputs {
    /// `(fake, prompt)` ratios of one flavor.
    pub fn for_flavor(&self, flavor: Flavor) -> (&Ratio, &Ratio) {
        match flavor {
            Flavor::Muon => (&self.mu_fake, &self.mu_prompt),
            Flavor::Electron => (&self.el_fake, &self.el_prompt),
        }
    }

    /// Matrix-method inputs for `channel`.
    pub fn leg_inputs(&self, channel: Channel) -> LegInputs {
        let (l1, l2) = channel.legs();
        let (f1, p1) = self.for_flavor(l1);
        let (f2, p2) = self.for_flavor(l2);
        LegInputs::mixed(f1.clone(), p1.clone(), f2.clone(), p2.clone())
    }
}

/// Binned fake and prompt ratios per flavor, for per-event weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioMaps {
    /// Muon fake ratio map
    pub mu_fake: RatioMap,
    /// Muon prompt ratio map
    pub mu_prompt: RatioMap,
    /// Electron fake ratio map
    pub el_fake: RatioMap,
    /// Electron prompt ratio map
    pub el_prompt: RatioMap,
}

impl RatioMaps {
    /// Map for one flavor and control region.
    pub fn map(&self, flavor: Flavor, kind: ControlKind) -> &RatioMap {
        match (flavor, kind) {
            (Flavor::Muon, ControlKind::SignalSuppressed) => &self.mu_fake,
            (Flavor::Muon, ControlKind::ZDecayEnriched) => &self.mu_prompt,
            (Flavor::Electron, ControlKind::SignalSuppressed) => &self.el_fake,
            (Flavor::Electron, ControlKind::ZDecayEnriched) => &self.el_prompt,
        }
    }

    /// Check every map against its binning and its slot.
    pub fn validate(&self) -> Result<()> {
        for flavor in [Flavor::Muon, Flavor::Electron] {
            for kind in [ControlKind::SignalSuppressed, ControlKind::ZDecayEnriched] {
                let map = self.map(flavor, kind);
                if (map.flavor, map.kind) != (flavor, kind) {
                    return Err(Error::Validation(format!(
                        "{} {:?} slot holds a {} {:?} ratio map",
                        flavor.label(),
                        kind,
                        map.flavor.label(),
                        map.kind
                    )));
                }
                map.validate()?;
            }
        }
        Ok(())
    }

    /// Ratio value at a leg's kinematics, optionally shifted up by its error.
    fn value(
        &self,
        flavor: Flavor,
        kind: ControlKind,
        leg: &LegKinematics,
        shift: Option<(Flavor, ControlKind)>,
    ) -> Result<f64> {
        let r = self.map(flavor, kind).lookup(leg.pt, leg.eta)?;
        Ok(if shift == Some((flavor, kind)) {
            (r.value + r.stat_error()).clamp(0.0, 1.0)
        } else {
            r.value
        })
    }

    /// Per-leg ratios for an event in `channel`.
    pub fn leg_ratios(
        &self,
        channel: Channel,
        leg1: &LegKinematics,
        leg2: &LegKinematics,
    ) -> Result<LegRatios> {
        self.shifted_leg_ratios(channel, leg1, leg2, None)
    }

    fn shifted_leg_ratios(
        &self,
        channel: Channel,
        leg1: &LegKinematics,
        leg2: &LegKinematics,
        shift: Option<(Flavor, ControlKind)>,
    ) -> Result<LegRatios> {
        let (fl1, fl2) = channel.legs();
        Ok(LegRatios {
            f1: self.value(fl1, ControlKind::SignalSuppressed, leg1, shift)?,
            p1: self.value(fl1, ControlKind::ZDecayEnriched, leg1, shift)?,
            f2: self.value(fl2, ControlKind::SignalSuppressed, leg2, shift)?,
            p2: self.value(fl2, ControlKind::ZDecayEnriched, leg2, shift)?,
        })
    }
}

/// Observed count with its Garwood 68% interval.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ObservedCount {
    /// Observed (weighted) count
    pub count: f64,
    /// Downward error
    pub error_low: f64,
    /// Upward error
    pub error_high: f64,
}

impl ObservedCount {
    /// Garwood interval for integer counts, `sqrt(n)` otherwise.
    pub fn new(count: f64) -> Result<Self> {
        match as_integer_count(count) {
            Some(n) => {
                let (lo, hi) = garwood_errors(n, ONE_SIGMA_CL)?;
                Ok(Self { count, error_low: lo, error_high: hi })
            }
            None => {
                let e = count.max(0.0).sqrt();
                Ok(Self { count, error_low: e, error_high: e })
            }
        }
    }

    /// `(obs - pred) / sqrt(sigma_pred^2 + sigma_obs^2)`, using the observed
    /// error on the side facing the prediction.
    pub fn discrepancy(&self, prediction: &Measurement) -> f64 {
        let sigma_obs =
            if self.count >= prediction.value { self.error_low } else { self.error_high };
        let denom = prediction.total_error().hypot(sigma_obs);
        if denom > 0.0 { (self.count - prediction.value) / denom } else { 0.0 }
    }
}

/// Prediction for one channel in one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPrediction {
    /// Channel
    pub channel: Channel,
    /// Data counts per tight/loose category
    pub data_counts: TightLooseCounts,
    /// Observed same-sign tight-tight data
    pub observed: ObservedCount,
    /// Tight-tight prompt/fake decomposition of the data
    pub composition: Composition,
    /// Fake background (`pf + fp + ff`)
    pub fakes: Measurement,
    /// Charge mis-ID background
    pub charge_mis_id: Measurement,
    /// Rare SM background
    pub rare_sm: Measurement,
    /// Diboson background
    pub diboson: Measurement,
    /// Sum of the backgrounds
    pub total: Measurement,
    /// Observed vs. predicted, in standard deviations
    pub discrepancy: f64,
}

/// Prediction for all channels of one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPrediction {
    /// Region definition
    pub region: RegionDef,
    /// Per-channel predictions in `Channel::ALL` order
    pub channels: Vec<ChannelPrediction>,
    /// Observed data summed over channels
    pub observed: ObservedCount,
    /// Fakes summed over channels
    pub fakes: Measurement,
    /// Charge mis-ID summed over channels
    pub charge_mis_id: Measurement,
    /// Rare SM summed over channels
    pub rare_sm: Measurement,
    /// Diboson summed over channels
    pub diboson: Measurement,
    /// Total background
    pub total: Measurement,
    /// Observed vs. predicted, in standard deviations
    pub discrepancy: f64,
}

impl RegionPrediction {
    /// Prediction for one channel.
    pub fn channel(&self, channel: Channel) -> Option<&ChannelPrediction> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}

/// Sum of measurements: value summed, stat in quadrature, syst linearly.
fn sum_correlated<'a>(items: impl IntoIterator<Item = &'a Measurement>) -> Measurement {
    let mut value = 0.0;
    let mut stat2 = 0.0;
    let mut syst = 0.0;
    for m in items {
        value += m.value;
        stat2 += m.stat * m.stat;
        syst += m.syst;
    }
    Measurement::new(value, stat2.sqrt(), syst)
}

/// Sum of independent measurements: value summed, both errors in quadrature.
fn sum_uncorrelated<'a>(items: impl IntoIterator<Item = &'a Measurement>) -> Measurement {
    let items: Vec<&Measurement> = items.into_iter().collect();
    Measurement::new(
        items.iter().map(|m| m.value).sum(),
        quadrature(items.iter().map(|m| m.stat)),
        quadrature(items.iter().map(|m| m.syst)),
    )
}

/// Combines all backgrounds for a set of regions.
pub struct RegionAggregator<'a, S: YieldSource + ?Sized> {
    source: &'a S,
    config: AggregatorConfig,
    ratios: FakeRatioInputs,
    ratio_maps: Option<RatioMaps>,
    flip: ChargeMisIdProbability,
    matrix: MatrixMethod,
}

impl<'a, S: YieldSource + ?Sized> RegionAggregator<'a, S> {
    /// Create an aggregator over `source`.
    pub fn new(
        source: &'a S,
        config: AggregatorConfig,
        ratios: FakeRatioInputs,
        flip: ChargeMisIdProbability,
    ) -> Result<Self> {
        config.validate()?;
        let matrix = MatrixMethod::new(config.matrix.clone())?;
        Ok(Self { source, config, ratios, ratio_maps: None, flip, matrix })
    }

    /// Binned ratios for [`FakeMethod::PerEvent`].
    pub fn with_ratio_maps(mut self, maps: RatioMaps) -> Result<Self> {
        maps.validate()?;
        self.ratio_maps = Some(maps);
        Ok(self)
    }

    /// Aggregator settings.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Predict all channels of `region`.
    ///
    /// `data_samples` provide the observed counts, the tight/loose counts for
    /// the fakes and the opposite-sign counts for charge mis-ID. Simulation
    /// may stand in for data in closure tests; it is then luminosity-scaled.
    /// Rare SM and diboson yields come from `mc_samples` of the matching kind.
    pub fn predict_region(
        &self,
        region: &RegionDef,
        data_samples: &[Sample],
        mc_samples: &[Sample],
    ) -> Result<RegionPrediction> {
        if data_samples.is_empty() {
            return Err(Error::Validation("predict_region needs at least one data sample".into()));
        }

        let channels = Channel::ALL
            .iter()
            .map(|&ch| self.predict_channel(region, ch, data_samples, mc_samples))
            .collect::<Result<Vec<_>>>()?;

        let observed = ObservedCount::new(channels.iter().map(|c| c.observed.count).sum())?;
        let fakes = sum_correlated(channels.iter().map(|c| &c.fakes));
        let charge_mis_id = sum_correlated(channels.iter().map(|c| &c.charge_mis_id));
        let rare_sm = sum_correlated(channels.iter().map(|c| &c.rare_sm));
        let diboson = sum_correlated(channels.iter().map(|c| &c.diboson));
        let total = sum_uncorrelated([&fakes, &charge_mis_id, &rare_sm, &diboson]);
        let discrepancy = observed.discrepancy(&total);

        log::debug!(
            "{}: observed {} vs predicted {:.2} +- {:.2}",
            region.name,
            observed.count,
            total.value,
            total.total_error()
        );
        Ok(RegionPrediction {
            region: region.clone(),
            channels,
            observed,
            fakes,
            charge_mis_id,
            rare_sm,
            diboson,
            total,
            discrepancy,
        })
    }

    /// Predict one channel of `region`.
    pub fn predict_channel(
        &self,
        region: &RegionDef,
        channel: Channel,
        data_samples: &[Sample],
        mc_samples: &[Sample],
    ) -> Result<ChannelPrediction> {
        let lumi = self.config.target_lumi;
        let data_counts = get_tight_loose_counts(self.source, data_samples, lumi, region, channel)?;
        let observed = ObservedCount::new(data_counts.tt)?;

        let (composition, fakes) = match self.config.fake_method {
            FakeMethod::Integrated => {
                let w = self.matrix.solve(channel, &self.ratios.leg_inputs(channel), &data_counts)?;
                let comp = Composition {
                    pp: w.pp.value,
                    pf: w.pf.value,
                    fp: w.fp.value,
                    ff: w.ff.value,
                };
                (comp, w.fakes)
            }
            FakeMethod::PerEvent => self.per_event_fakes(region, channel, data_samples)?,
        };

        let charge_mis_id = if self.config.include_charge_mis_id && channel.n_electrons() > 0 {
            let os = get_opposite_sign_counts(self.source, data_samples, lumi, region, channel)?;
            predict_charge_mis_id_yield(&self.flip, &os, channel)
        } else {
            Measurement::zero()
        };

        let rare_sm = if self.config.include_rare {
            self.mc_yield(region, channel, mc_samples, SampleKind::RareSm, self.config.rare_syst)?
        } else {
            Measurement::zero()
        };
        let diboson = if self.config.include_diboson {
            self.mc_yield(region, channel, mc_samples, SampleKind::Diboson, self.config.diboson_syst)?
        } else {
            Measurement::zero()
        };

        let total = sum_uncorrelated([&fakes, &charge_mis_id, &rare_sm, &diboson]);
        let discrepancy = observed.discrepancy(&total);
        Ok(ChannelPrediction {
            channel,
            data_counts,
            observed,
            composition,
            fakes,
            charge_mis_id,
            rare_sm,
            diboson,
            total,
            discrepancy,
        })
    }

    fn mc_yield(
        &self,
        region: &RegionDef,
        channel: Channel,
        mc_samples: &[Sample],
        kind: SampleKind,
        syst_fraction: f64,
    ) -> Result<Measurement> {
        let selected: Vec<Sample> = mc_samples.iter().filter(|s| s.kind == kind).cloned().collect();
        let mut m =
            get_tight_tight_yield(self.source, &selected, self.config.target_lumi, region, channel)?;
        m.syst = (syst_fraction * m.value).abs();
        Ok(m)
    }

    /// Per-event fake prediction.
    ///
    /// The statistical error is `sqrt(sum w^2)` over events combined in
    /// quadrature with the shift from moving each of the four ratio maps up
    /// by its own error.
    fn per_event_fakes(
        &self,
        region: &RegionDef,
        channel: Channel,
        data_samples: &[Sample],
    ) -> Result<(Composition, Measurement)> {
        let maps = self.ratio_maps.as_ref().ok_or_else(|| {
            Error::Validation("per-event fake method requires ratio maps".to_string())
        })?;

        let mut events = Vec::new();
        for sample in data_samples {
            let scale = sample_scale(sample, self.config.target_lumi)?;
            for ev in self.source.loose_events(sample, region, channel)? {
                events.push((ev, scale));
            }
        }

        let min_sep = self.config.matrix.min_separation;
        let sum_weights = |shift: Option<(Flavor, ControlKind)>| -> Result<(Composition, f64)> {
            let mut c = [0.0_f64; 4];
            let mut sumw2 = 0.0;
            for (ev, scale) in &events {
                let r = maps.shifted_leg_ratios(channel, &ev.leg1, &ev.leg2, shift)?;
                let w = checked_event_weights(ev.category, &r, min_sep)?;
                let x = ev.weight * scale;
                for k in 0..4 {
                    c[k] += x * w[k];
                }
                let fake_w = x * (w[1] + w[2] + w[3]);
                sumw2 += fake_w * fake_w;
            }
            Ok((Composition { pp: c[0], pf: c[1], fp: c[2], ff: c[3] }, sumw2))
        };

        let (nominal, sumw2) = sum_weights(None)?;
        let mut shifts = Vec::with_capacity(4);
        for flavor in [Flavor::Muon, Flavor::Electron] {
            for kind in [ControlKind::SignalSuppressed, ControlKind::ZDecayEnriched] {
                let (shifted, _) = sum_weights(Some((flavor, kind)))?;
                shifts.push(shifted.fakes() - nominal.fakes());
            }
        }
        let stat = (sumw2 + shifts.iter().map(|d| d * d).sum::<f64>()).sqrt();
        let value = nominal.fakes();
        let syst = (self.matrix.syst_fraction() * value).abs();
        log::debug!(
            "{} per-event: {} events, fakes = {:.3} +- {:.3}",
            channel.label(),
            events.len(),
            value,
            stat
        );
        Ok((nominal, Measurement::new(value, stat, syst)))
    }
}
