//! Common data types for the SSDL estimator

use serde::{Deserialize, Serialize};

/// Electron |eta| boundary between barrel and endcap calorimeter.
pub const BARREL_ETA_MAX: f64 = 1.479;

/// Lepton flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavor {
    /// Muon
    Muon,
    /// Electron
    Electron,
}

impl Flavor {
    /// Short label used in logs and artifacts.
    pub fn label(self) -> &'static str {
        match self {
            Flavor::Muon => "mu",
            Flavor::Electron => "el",
        }
    }
}

/// Dilepton channel.
///
/// For the mixed channel leg 1 is always the muon and leg 2 the electron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Two muons
    MuMu,
    /// One muon (leg 1) and one electron (leg 2)
    ElMu,
    /// Two electrons
    ElEl,
}

impl Channel {
    /// All channels in reporting order.
    pub const ALL: [Channel; 3] = [Channel::MuMu, Channel::ElMu, Channel::ElEl];

    /// Flavors of (leg 1, leg 2).
    pub fn legs(self) -> (Flavor, Flavor) {
        match self {
            Channel::MuMu => (Flavor::Muon, Flavor::Muon),
            Channel::ElMu => (Flavor::Muon, Flavor::Electron),
            Channel::ElEl => (Flavor::Electron, Flavor::Electron),
        }
    }

    /// Whether both legs share a flavor (legs are then indistinguishable).
    pub fn is_same_flavor(self) -> bool {
        !matches!(self, Channel::ElMu)
    }

    /// Number of electron legs that can have their charge mis-measured.
    pub fn n_electrons(self) -> usize {
        match self {
            Channel::MuMu => 0,
            Channel::ElMu => 1,
            Channel::ElEl => 2,
        }
    }

    /// Short label used in logs and artifacts.
    pub fn label(self) -> &'static str {
        match self {
            Channel::MuMu => "mumu",
            Channel::ElMu => "elmu",
            Channel::ElEl => "elel",
        }
    }
}

/// Tight/loose classification of a dilepton event (TLCat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlCategory {
    /// Both legs tight
    TightTight,
    /// Leg 1 tight, leg 2 loose-not-tight
    TightLoose,
    /// Leg 1 loose-not-tight, leg 2 tight
    LooseTight,
    /// Neither leg tight
    LooseLoose,
}

impl TlCategory {
    /// All categories.
    pub const ALL: [TlCategory; 4] = [
        TlCategory::TightTight,
        TlCategory::TightLoose,
        TlCategory::LooseTight,
        TlCategory::LooseLoose,
    ];

    /// Whether leg 1 passes the tight selection.
    pub fn leg1_tight(self) -> bool {
        matches!(self, TlCategory::TightTight | TlCategory::TightLoose)
    }

    /// Whether leg 2 passes the tight selection.
    pub fn leg2_tight(self) -> bool {
        matches!(self, TlCategory::TightTight | TlCategory::LooseTight)
    }
}

/// Control region used to measure a tight/loose ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// Signal-suppressed (QCD-like) selection: measures the fake ratio f.
    SignalSuppressed,
    /// Z-decay enriched selection: measures the prompt ratio p.
    ZDecayEnriched,
}

/// Detector-region partition of an electron pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorPair {
    /// Both electrons in the barrel
    BarrelBarrel,
    /// One barrel, one endcap electron
    BarrelEndcap,
    /// Both electrons in the endcaps
    EndcapEndcap,
}

impl DetectorPair {
    /// All partitions.
    pub const ALL: [DetectorPair; 3] =
        [DetectorPair::BarrelBarrel, DetectorPair::BarrelEndcap, DetectorPair::EndcapEndcap];

    /// Classify a pair by the electrons' pseudorapidities.
    pub fn from_etas(eta1: f64, eta2: f64) -> Self {
        match (eta1.abs() < BARREL_ETA_MAX, eta2.abs() < BARREL_ETA_MAX) {
            (true, true) => DetectorPair::BarrelBarrel,
            (false, false) => DetectorPair::EndcapEndcap,
            _ => DetectorPair::BarrelEndcap,
        }
    }

    /// Partition for a single electron: barrel maps onto BB, endcap onto EE.
    pub fn from_single_eta(eta: f64) -> Self {
        if eta.abs() < BARREL_ETA_MAX { DetectorPair::BarrelBarrel } else { DetectorPair::EndcapEndcap }
    }
}

/// Sample kind: data is never luminosity-scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// Collision data
    Data,
    /// Simulation contributing non-prompt leptons (ttbar, W+jets, QCD)
    FakeMc,
    /// Simulation of opposite-sign prompt pairs (Drell-Yan)
    ChargeFlipMc,
    /// Rare standard-model processes with genuine same-sign leptons
    RareSm,
    /// WZ / ZZ production
    Diboson,
    /// New-physics signal point
    Signal,
}

/// A named input sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unique sample name
    pub name: String,
    /// Sample kind
    pub kind: SampleKind,
    /// Integrated luminosity of the sample (pb^-1). For MC: N_generated / sigma.
    pub lumi: f64,
}

impl Sample {
    /// Create a sample.
    pub fn new(name: impl Into<String>, kind: SampleKind, lumi: f64) -> Self {
        Self { name: name.into(), kind, lumi }
    }

    /// Whether this is collision data.
    pub fn is_data(&self) -> bool {
        self.kind == SampleKind::Data
    }

    /// Luminosity weight: 1 for data, `target_lumi / lumi` for simulation.
    pub fn scale(&self, target_lumi: f64) -> f64 {
        if self.is_data() { 1.0 } else { target_lumi / self.lumi }
    }
}

/// A value with separate statistical and systematic uncertainties.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurement {
    /// Central value
    pub value: f64,
    /// Statistical uncertainty
    pub stat: f64,
    /// Systematic uncertainty
    pub syst: f64,
}

impl Measurement {
    /// Create a measurement.
    pub fn new(value: f64, stat: f64, syst: f64) -> Self {
        Self { value, stat, syst }
    }

    /// Zero with no uncertainty.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Quadrature sum of statistical and systematic uncertainties.
    pub fn total_error(&self) -> f64 {
        self.stat.hypot(self.syst)
    }
}

/// Weighted passed/total counts for a tight/loose ratio.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PassedTotal {
    /// Control-region leptons passing the tight selection
    pub passed: f64,
    /// Control-region leptons passing the loose selection (tight included)
    pub total: f64,
}

impl PassedTotal {
    /// Create passed/total counts.
    pub fn new(passed: f64, total: f64) -> Self {
        Self { passed, total }
    }

    /// Accumulate `other` with weight `scale`.
    pub fn add_scaled(&mut self, other: &PassedTotal, scale: f64) {
        self.passed += scale * other.passed;
        self.total += scale * other.total;
    }
}

/// Weighted event counts per tight/loose category.
///
/// Same-flavor channels only use `tl + lt`. In the mixed channel `tl` counts
/// muon-tight/electron-loose and `lt` electron-tight/muon-loose events.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TightLooseCounts {
    /// Both legs tight
    pub tt: f64,
    /// Leg 1 tight only
    pub tl: f64,
    /// Leg 2 tight only
    pub lt: f64,
    /// Neither leg tight
    pub ll: f64,
    /// Sum of squared tight-tight weights
    #[serde(default)]
    pub tt_sumw2: f64,
}

impl TightLooseCounts {
    /// Create counts from unit-weight events (`tt_sumw2 = tt`).
    pub fn new(tt: f64, tl: f64, lt: f64, ll: f64) -> Self {
        Self { tt, tl, lt, ll, tt_sumw2: tt }
    }

    /// Same-flavor counts: the single-tight count goes into `tl`.
    pub fn same_flavor(tt: f64, single_tight: f64, ll: f64) -> Self {
        Self::new(tt, single_tight, 0.0, ll)
    }

    /// Events with exactly one tight leg.
    pub fn single_tight(&self) -> f64 {
        self.tl + self.lt
    }

    /// All loose-loose events (every category).
    pub fn total(&self) -> f64 {
        self.tt + self.tl + self.lt + self.ll
    }

    /// Count for one category.
    pub fn get(&self, category: TlCategory) -> f64 {
        match category {
            TlCategory::TightTight => self.tt,
            TlCategory::TightLoose => self.tl,
            TlCategory::LooseTight => self.lt,
            TlCategory::LooseLoose => self.ll,
        }
    }

    /// Add one event of `weight` to a category.
    pub fn fill(&mut self, category: TlCategory, weight: f64) {
        match category {
            TlCategory::TightTight => {
                self.tt += weight;
                self.tt_sumw2 += weight * weight;
            }
            TlCategory::TightLoose => self.tl += weight,
            TlCategory::LooseTight => self.lt += weight,
            TlCategory::LooseLoose => self.ll += weight,
        }
    }

    /// Accumulate `other` with weight `scale`.
    pub fn add_scaled(&mut self, other: &TightLooseCounts, scale: f64) {
        self.tt += scale * other.tt;
        self.tl += scale * other.tl;
        self.lt += scale * other.lt;
        self.ll += scale * other.ll;
        self.tt_sumw2 += scale * scale * other.tt_sumw2;
    }
}

/// Counts split by electron detector partition.
///
/// For the mixed channel only `bb` (electron in barrel) and `ee` (electron
/// in endcap) are filled.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectorCounts {
    /// Barrel-barrel
    pub bb: f64,
    /// Barrel-endcap
    pub be: f64,
    /// Endcap-endcap
    pub ee: f64,
}

impl DetectorCounts {
    /// Create counts.
    pub fn new(bb: f64, be: f64, ee: f64) -> Self {
        Self { bb, be, ee }
    }

    /// Count in one partition.
    pub fn get(&self, pair: DetectorPair) -> f64 {
        match pair {
            DetectorPair::BarrelBarrel => self.bb,
            DetectorPair::BarrelEndcap => self.be,
            DetectorPair::EndcapEndcap => self.ee,
        }
    }

    /// Add `weight` to one partition.
    pub fn fill(&mut self, pair: DetectorPair, weight: f64) {
        match pair {
            DetectorPair::BarrelBarrel => self.bb += weight,
            DetectorPair::BarrelEndcap => self.be += weight,
            DetectorPair::EndcapEndcap => self.ee += weight,
        }
    }

    /// Accumulate `other` with weight `scale`.
    pub fn add_scaled(&mut self, other: &DetectorCounts, scale: f64) {
        self.bb += scale * other.bb;
        self.be += scale * other.be;
        self.ee += scale * other.ee;
    }

    /// Sum over partitions.
    pub fn total(&self) -> f64 {
        self.bb + self.be + self.ee
    }
}

/// Same-sign and opposite-sign electron pairs in a charge-flip control selection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChargeFlipCounts {
    /// Same-sign pairs per partition
    pub same_sign: DetectorCounts,
    /// Opposite-sign pairs per partition
    pub opposite_sign: DetectorCounts,
}

/// Transverse momentum and pseudorapidity of one lepton leg.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LegKinematics {
    /// Transverse momentum (GeV)
    pub pt: f64,
    /// Pseudorapidity
    pub eta: f64,
}

/// One classified loose-loose dilepton event, for per-event weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    /// Tight/loose category
    pub category: TlCategory,
    /// Leg 1 kinematics (the muon in the mixed channel)
    pub leg1: LegKinematics,
    /// Leg 2 kinematics (the electron in the mixed channel)
    pub leg2: LegKinematics,
    /// Event weight before luminosity scaling
    pub weight: f64,
}

/// Kinematic region definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDef {
    /// Region name
    pub name: String,
    /// Minimum HT (GeV)
    #[serde(default)]
    pub ht_min: f64,
    /// Maximum HT (GeV), unbounded if absent
    #[serde(default)]
    pub ht_max: Option<f64>,
    /// Minimum missing transverse energy (GeV)
    #[serde(default)]
    pub met_min: f64,
    /// Maximum missing transverse energy (GeV), unbounded if absent
    #[serde(default)]
    pub met_max: Option<f64>,
    /// Minimum number of jets
    #[serde(default)]
    pub njets_min: u32,
    /// Minimum number of b-tagged jets
    #[serde(default)]
    pub nbjets_min: u32,
}

impl RegionDef {
    /// Region with no kinematic requirement.
    pub fn inclusive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ht_min: 0.0,
            ht_max: None,
            met_min: 0.0,
            met_max: None,
            njets_min: 0,
            nbjets_min: 0,
        }
    }

    /// Whether an event with the given event-level quantities falls into the region.
    pub fn contains(&self, ht: f64, met: f64, njets: u32, nbjets: u32) -> bool {
        ht >= self.ht_min
            && self.ht_max.is_none_or(|max| ht < max)
            && met >= self.met_min
            && self.met_max.is_none_or(|max| met < max)
            && njets >= self.njets_min
            && nbjets >= self.nbjets_min
    }
}

/// Rectangular (pT, |eta|) binning for differential ratios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binning2D {
    /// pT bin edges (ascending, at least two)
    pub pt_edges: Vec<f64>,
    /// |eta| bin edges (ascending, at least two)
    pub eta_edges: Vec<f64>,
}

impl Binning2D {
    /// Create a binning.
    pub fn new(pt_edges: Vec<f64>, eta_edges: Vec<f64>) -> Self {
        Self { pt_edges, eta_edges }
    }

    /// Number of pT bins.
    pub fn n_pt(&self) -> usize {
        self.pt_edges.len().saturating_sub(1)
    }

    /// Number of |eta| bins.
    pub fn n_eta(&self) -> usize {
        self.eta_edges.len().saturating_sub(1)
    }

    /// Total number of cells (row-major, pT outer).
    pub fn n_cells(&self) -> usize {
        self.n_pt() * self.n_eta()
    }

    /// Flat cell index for `(pt, eta)`; out-of-range values clamp to the edge bins.
    pub fn cell(&self, pt: f64, eta: f64) -> usize {
        let i = clamp_bin(&self.pt_edges, pt);
        let j = clamp_bin(&self.eta_edges, eta.abs());
        i * self.n_eta() + j
    }
}

fn clamp_bin(edges: &[f64], x: f64) -> usize {
    let n = edges.len().saturating_sub(1);
    if n == 0 {
        return 0;
    }
    // Number of edges <= x, minus one, clamped into [0, n-1].
    let idx = edges.partition_point(|e| *e <= x);
    idx.saturating_sub(1).min(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_legs() {
        assert_eq!(Channel::ElMu.legs(), (Flavor::Muon, Flavor::Electron));
        assert!(Channel::MuMu.is_same_flavor());
        assert!(!Channel::ElMu.is_same_flavor());
        assert_eq!(Channel::ElEl.n_electrons(), 2);
    }

    #[test]
    fn test_category_leg_flags() {
        let flags: Vec<_> = TlCategory::ALL.iter().map(|c| (c.leg1_tight(), c.leg2_tight())).collect();
        assert_eq!(flags, vec![(true, true), (true, false), (false, true), (false, false)]);
    }

    #[test]
    fn test_sample_scale() {
        let data = Sample::new("DoubleMu", SampleKind::Data, 35.0);
        let mc = Sample::new("TTbar", SampleKind::FakeMc, 70.0);
        assert_eq!(data.scale(35.0), 1.0);
        assert!((mc.scale(35.0) - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_detector_pair_from_etas() {
        assert_eq!(DetectorPair::from_etas(0.3, -1.2), DetectorPair::BarrelBarrel);
        assert_eq!(DetectorPair::from_etas(0.3, 2.1), DetectorPair::BarrelEndcap);
        assert_eq!(DetectorPair::from_etas(-1.8, 2.1), DetectorPair::EndcapEndcap);
        assert_eq!(DetectorPair::from_single_eta(-2.0), DetectorPair::EndcapEndcap);
    }

    #[test]
    fn test_region_contains() {
        let mut r = RegionDef::inclusive("HT80MET30");
        r.ht_min = 80.0;
        r.met_min = 30.0;
        r.njets_min = 2;
        assert!(r.contains(120.0, 45.0, 2, 0));
        assert!(!r.contains(79.9, 45.0, 2, 0));
        assert!(!r.contains(120.0, 45.0, 1, 0));
        r.ht_max = Some(200.0);
        assert!(!r.contains(200.0, 45.0, 3, 0));
    }

    #[test]
    fn test_binning_cell_clamps() {
        let b = Binning2D::new(vec![10.0, 20.0, 30.0, 40.0, 100.0], vec![0.0, 1.479, 2.5]);
        assert_eq!(b.n_cells(), 8);
        assert_eq!(b.cell(15.0, 0.5), 0);
        assert_eq!(b.cell(15.0, -2.0), 1);
        assert_eq!(b.cell(5.0, 0.0), 0);
        assert_eq!(b.cell(500.0, 3.0), 7);
        assert_eq!(b.cell(20.0, 1.479), 3);
    }

    #[test]
    fn test_measurement_total_error() {
        let m = Measurement::new(10.0, 3.0, 4.0);
        assert!((m.total_error() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_counts_fill_and_total() {
        let mut c = TightLooseCounts::default();
        c.fill(TlCategory::TightLoose, 2.0);
        c.fill(TlCategory::LooseTight, 1.0);
        c.fill(TlCategory::LooseLoose, 4.0);
        assert_eq!(c.single_tight(), 3.0);
        assert_eq!(c.total(), 7.0);
        assert_eq!(c.get(TlCategory::LooseLoose), 4.0);
        assert_eq!(c.tt_sumw2, 0.0);
    }

    #[test]
    fn test_counts_track_tight_tight_sumw2() {
        let mut c = TightLooseCounts::default();
        c.fill(TlCategory::TightTight, 4.0);
        c.fill(TlCategory::TightTight, 1.0);
        c.fill(TlCategory::TightLoose, 3.0);
        assert_eq!(c.tt, 5.0);
        assert_eq!(c.tt_sumw2, 17.0);

        let mut acc = TightLooseCounts::default();
        acc.add_scaled(&c, 0.5);
        assert_eq!(acc.tt, 2.5);
        assert_eq!(acc.tt_sumw2, 4.25);
        assert_eq!(TightLooseCounts::new(7.0, 1.0, 2.0, 3.0).tt_sumw2, 7.0);
    }
}
