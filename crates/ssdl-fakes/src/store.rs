//! In-memory classified events.
//!
//! The store holds already-selected objects: dilepton candidates with their
//! tight/loose category and event-level quantities, control-region leptons from the
//! ratio control regions, and electron pairs from the charge-flip selection.
//! Loaded from JSON.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use ssdl_core::{
    Binning2D, Channel, ChargeFlipCounts, ClassifiedEvent, ControlKind, DetectorCounts,
    DetectorPair, Error, Flavor, LegKinematics, PassedTotal, RegionDef, Result, Sample,
    TightLooseCounts, TlCategory, YieldSource,
};

fn default_weight() -> f64 {
    1.0
}

/// A dilepton candidate in the signal selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DileptonEvent {
    /// Sample name
    pub sample: String,
    /// Channel (leg 1 is the muon in the mixed channel)
    pub channel: Channel,
    /// Whether the two leptons carry the same charge
    pub same_sign: bool,
    /// Tight/loose category
    pub category: TlCategory,
    /// Leg 1 kinematics
    pub leg1: LegKinematics,
    /// Leg 2 kinematics
    pub leg2: LegKinematics,
    /// Scalar sum of jet pT (GeV)
    #[serde(default)]
    pub ht: f64,
    /// Missing transverse energy (GeV)
    #[serde(default)]
    pub met: f64,
    /// Jet multiplicity
    #[serde(default)]
    pub njets: u32,
    /// b-tagged jet multiplicity
    #[serde(default)]
    pub nbjets: u32,
    /// Generator/event weight
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// A loose control-region lepton in a ratio control region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlLepton {
    /// Sample name
    pub sample: String,
    /// Flavor
    pub flavor: Flavor,
    /// Control region
    pub control: ControlKind,
    /// Transverse momentum (GeV)
    pub pt: f64,
    /// Pseudorapidity
    pub eta: f64,
    /// Passes the tight selection
    pub tight: bool,
    /// Generator/event weight
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// An electron pair in the charge-flip control selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlipPair {
    /// Sample name
    pub sample: String,
    /// First electron pseudorapidity
    pub eta1: f64,
    /// Second electron pseudorapidity
    pub eta2: f64,
    /// Whether the two electrons carry the same charge
    pub same_sign: bool,
    /// Generator/event weight
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Classified events for all samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStore {
    /// Dilepton candidates
    #[serde(default)]
    pub dileptons: Vec<DileptonEvent>,
    /// Ratio control-region leptons
    #[serde(default)]
    pub control_leptons: Vec<ControlLepton>,
    /// Charge-flip control pairs
    #[serde(default)]
    pub flip_pairs: Vec<FlipPair>,
}

impl EventStore {
    /// Parse a store from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a store from a reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Read a store from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let store = Self::from_reader(std::io::BufReader::new(file))?;
        store.validate()?;
        log::debug!(
            "loaded {} dileptons, {} control leptons, {} flip pairs from {}",
            store.dileptons.len(),
            store.control_leptons.len(),
            store.flip_pairs.len(),
            path.as_ref().display()
        );
        Ok(store)
    }

    /// Reject non-finite weights and kinematics.
    pub fn validate(&self) -> Result<()> {
        let bad = |what: &str, sample: &str| {
            Err(Error::Validation(format!("{} in sample '{}' has non-finite values", what, sample)))
        };
        for d in &self.dileptons {
            let values = [d.leg1.pt, d.leg1.eta, d.leg2.pt, d.leg2.eta, d.ht, d.met, d.weight];
            if values.iter().any(|v| !v.is_finite()) {
                return bad("dilepton", &d.sample);
            }
        }
        for p in &self.control_leptons {
            if ![p.pt, p.eta, p.weight].iter().all(|v| v.is_finite()) {
                return bad("control lepton", &p.sample);
            }
        }
        for f in &self.flip_pairs {
            if ![f.eta1, f.eta2, f.weight].iter().all(|v| v.is_finite()) {
                return bad("flip pair", &f.sample);
            }
        }
        Ok(())
    }

    /// Whether any object belongs to `sample`.
    pub fn has_sample(&self, sample: &str) -> bool {
        self.dileptons.iter().any(|d| d.sample == sample)
            || self.control_leptons.iter().any(|p| p.sample == sample)
            || self.flip_pairs.iter().any(|f| f.sample == sample)
    }

    fn control_leptons_for<'a>(
        &'a self,
        sample: &'a Sample,
        flavor: Flavor,
        kind: ControlKind,
    ) -> impl Iterator<Item = &'a ControlLepton> + 'a {
        self.control_leptons
            .iter()
            .filter(move |p| p.sample == sample.name && p.flavor == flavor && p.control == kind)
    }

    fn dileptons_for<'a>(
        &'a self,
        sample: &'a Sample,
        region: &'a RegionDef,
        channel: Channel,
        same_sign: bool,
    ) -> impl Iterator<Item = &'a DileptonEvent> + 'a {
        self.dileptons.iter().filter(move |d| {
            d.sample == sample.name
                && d.channel == channel
                && d.same_sign == same_sign
                && region.contains(d.ht, d.met, d.njets, d.nbjets)
        })
    }
}

impl YieldSource for EventStore {
    fn passed_total(
        &self,
        sample: &Sample,
        flavor: Flavor,
        kind: ControlKind,
    ) -> Result<PassedTotal> {
        let mut out = PassedTotal::default();
        for p in self.control_leptons_for(sample, flavor, kind) {
            out.total += p.weight;
            if p.tight {
                out.passed += p.weight;
            }
        }
        Ok(out)
    }

    fn passed_total_binned(
        &self,
        sample: &Sample,
        flavor: Flavor,
        kind: ControlKind,
        binning: &Binning2D,
    ) -> Result<Vec<PassedTotal>> {
        let mut out = vec![PassedTotal::default(); binning.n_cells()];
        if out.is_empty() {
            return Ok(out);
        }
        for p in self.control_leptons_for(sample, flavor, kind) {
            let cell = &mut out[binning.cell(p.pt, p.eta)];
            cell.total += p.weight;
            if p.tight {
                cell.passed += p.weight;
            }
        }
        Ok(out)
    }

    fn tight_loose_counts(
        &self,
        sample: &Sample,
        region: &RegionDef,
        channel: Channel,
    ) -> Result<TightLooseCounts> {
        let mut out = TightLooseCounts::default();
        for d in self.dileptons_for(sample, region, channel, true) {
            out.fill(d.category, d.weight);
        }
        Ok(out)
    }

    fn opposite_sign_counts(
        &self,
        sample: &Sample,
        region: &RegionDef,
        channel: Channel,
    ) -> Result<DetectorCounts> {
        let mut out = DetectorCounts::default();
        for d in self.dileptons_for(sample, region, channel, false) {
            if d.category != TlCategory::TightTight {
                continue;
            }
            let pair = match channel {
                Channel::ElEl => DetectorPair::from_etas(d.leg1.eta, d.leg2.eta),
                Channel::ElMu => DetectorPair::from_single_eta(d.leg2.eta),
                Channel::MuMu => continue,
            };
            out.fill(pair, d.weight);
        }
        Ok(out)
    }

    fn flip_counts(&self, sample: &Sample) -> Result<ChargeFlipCounts> {
        let mut out = ChargeFlipCounts::default();
        for f in self.flip_pairs.iter().filter(|f| f.sample == sample.name) {
            let pair = DetectorPair::from_etas(f.eta1, f.eta2);
            if f.same_sign {
                out.same_sign.fill(pair, f.weight);
            } else {
                out.opposite_sign.fill(pair, f.weight);
            }
        }
        Ok(out)
    }

    fn loose_events(
        &self,
        sample: &Sample,
        region: &RegionDef,
        channel: Channel,
    ) -> Result<Vec<ClassifiedEvent>> {
        Ok(self
            .dileptons_for(sample, region, channel, true)
            .map(|d| ClassifiedEvent {
                category: d.category,
                leg1: d.leg1,
                leg2: d.leg2,
                weight: d.weight,
            })
            .collect())
    }
}
