//! Measurement pipeline shared by the `ratios`, `chmid` and `predict` commands.

use anyhow::Result;
use serde::Serialize;
use ssdl_core::{ControlKind, Flavor};
use ssdl_fakes::{
    ChargeMisIdModel, ChargeMisIdProbability, EventStore, FakeMethod, FakeRatioInputs, Ratio,
    RatioMap, RatioMaps, RegionAggregator, RegionPrediction, TightLooseRatioEstimator,
};

use crate::config::AnalysisConfig;

/// Integrated ratios and, when requested, the binned maps.
#[derive(Debug, Clone, Serialize)]
pub struct RatioReport {
    pub target_lumi: f64,
    pub ratios: FakeRatioInputs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps: Option<RatioMaps>,
}

/// Full prediction output.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionReport {
    pub target_lumi: f64,
    pub ratios: FakeRatioInputs,
    pub charge_flip: ChargeMisIdProbability,
    pub regions: Vec<RegionPrediction>,
}

fn estimator(cfg: &AnalysisConfig) -> Result<TightLooseRatioEstimator> {
    Ok(TightLooseRatioEstimator::new(cfg.prediction.target_lumi)?
        .with_error_mode(cfg.ratio_error_mode))
}

/// Integrated fake and prompt ratios for both flavors.
pub fn measure_ratios(cfg: &AnalysisConfig, store: &EventStore) -> Result<FakeRatioInputs> {
    let est = estimator(cfg)?;
    let measure = |role: &str,
                   names: &[String],
                   flavor: Flavor,
                   kind: ControlKind,
                   syst: f64|
     -> Result<Ratio> {
        let samples = cfg.resolve(role, names)?;
        let mut r = est.measure_ratio(store, &samples, flavor, kind)?;
        if syst > 0.0 {
            r = r.with_systematic(syst);
        }
        tracing::info!(role, value = r.value, error = r.stat_error(), "ratio measured");
        Ok(r)
    };

    let (roles, syst) = (&cfg.roles, &cfg.ratio_syst);
    Ok(FakeRatioInputs {
        mu_fake: measure(
            "mu_fake",
            &roles.mu_fake,
            Flavor::Muon,
            ControlKind::SignalSuppressed,
            syst.mu_fake,
        )?,
        mu_prompt: measure(
            "mu_prompt",
            &roles.mu_prompt,
            Flavor::Muon,
            ControlKind::ZDecayEnriched,
            syst.mu_prompt,
        )?,
        el_fake: measure(
            "el_fake",
            &roles.el_fake,
            Flavor::Electron,
            ControlKind::SignalSuppressed,
            syst.el_fake,
        )?,
        el_prompt: measure(
            "el_prompt",
            &roles.el_prompt,
            Flavor::Electron,
            ControlKind::ZDecayEnriched,
            syst.el_prompt,
        )?,
    })
}

/// Binned fake and prompt ratio maps for both flavors.
pub fn measure_ratio_maps(cfg: &AnalysisConfig, store: &EventStore) -> Result<RatioMaps> {
    let est = estimator(cfg)?;
    let measure = |role: &str,
                   names: &[String],
                   flavor: Flavor,
                   kind: ControlKind,
                   syst: f64|
     -> Result<RatioMap> {
        let samples = cfg.resolve(role, names)?;
        let mut map = est.measure_ratio_map(store, &samples, flavor, kind, &cfg.binning)?;
        if syst > 0.0 {
            for r in map.cells.iter_mut().chain(&mut map.pt_projection).chain(&mut map.eta_projection)
            {
                *r = r.with_systematic(syst);
            }
        }
        Ok(map)
    };

    let (roles, syst) = (&cfg.roles, &cfg.ratio_syst);
    Ok(RatioMaps {
        mu_fake: measure(
            "mu_fake",
            &roles.mu_fake,
            Flavor::Muon,
            ControlKind::SignalSuppressed,
            syst.mu_fake,
        )?,
        mu_prompt: measure(
            "mu_prompt",
            &roles.mu_prompt,
            Flavor::Muon,
            ControlKind::ZDecayEnriched,
            syst.mu_prompt,
        )?,
        el_fake: measure(
            "el_fake",
            &roles.el_fake,
            Flavor::Electron,
            ControlKind::SignalSuppressed,
            syst.el_fake,
        )?,
        el_prompt: measure(
            "el_prompt",
            &roles.el_prompt,
            Flavor::Electron,
            ControlKind::ZDecayEnriched,
            syst.el_prompt,
        )?,
    })
}

/// Charge-flip probabilities from the configured control samples.
pub fn measure_charge_flip(
    cfg: &AnalysisConfig,
    store: &EventStore,
) -> Result<ChargeMisIdProbability> {
    let samples = cfg.resolve("charge_flip", &cfg.roles.charge_flip)?;
    let model =
        ChargeMisIdModel::new(cfg.prediction.target_lumi)?.with_syst_fraction(cfg.flip_syst)?;
    Ok(model.measure(store, &samples)?)
}

/// Ratios (and maps if `binned`) as a report.
pub fn ratio_report(cfg: &AnalysisConfig, store: &EventStore, binned: bool) -> Result<RatioReport> {
    let ratios = measure_ratios(cfg, store)?;
    let maps = if binned { Some(measure_ratio_maps(cfg, store)?) } else { None };
    Ok(RatioReport { target_lumi: cfg.prediction.target_lumi, ratios, maps })
}

/// Predict every configured region, or only `only` if given.
pub fn predict(
    cfg: &AnalysisConfig,
    store: &EventStore,
    only: Option<&str>,
) -> Result<PredictionReport> {
    let regions: Vec<_> = match only {
        Some(name) => {
            let found: Vec<_> = cfg.regions.iter().filter(|r| r.name == name).cloned().collect();
            if found.is_empty() {
                anyhow::bail!("unknown region '{}'", name);
            }
            found
        }
        None => cfg.regions.clone(),
    };

    let ratios = measure_ratios(cfg, store)?;
    let flip = measure_charge_flip(cfg, store)?;
    let mut agg = RegionAggregator::new(store, cfg.prediction.clone(), ratios.clone(), flip)?;
    if cfg.prediction.fake_method == FakeMethod::PerEvent {
        agg = agg.with_ratio_maps(measure_ratio_maps(cfg, store)?)?;
    }

    let data = cfg.resolve("data", &cfg.roles.data)?;
    let mc = cfg.mc_samples()?;
    let mut predictions = Vec::with_capacity(regions.len());
    for region in &regions {
        let p = agg.predict_region(region, &data, &mc)?;
        tracing::info!(
            region = %region.name,
            observed = p.observed.count,
            predicted = p.total.value,
            error = p.total.total_error(),
            "region predicted"
        );
        predictions.push(p);
    }
    Ok(PredictionReport {
        target_lumi: cfg.prediction.target_lumi,
        ratios,
        charge_flip: flip,
        regions: predictions,
    })
}
