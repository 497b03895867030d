//! Analysis configuration (YAML or JSON).

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use ssdl_core::{Binning2D, RegionDef, Sample};
use ssdl_fakes::{AggregatorConfig, ErrorMode};

fn default_binning() -> Binning2D {
    Binning2D::new(vec![10.0, 20.0, 30.0, 40.0, 100.0], vec![0.0, 1.0, 1.479, 2.0, 2.5])
}

fn default_regions() -> Vec<RegionDef> {
    vec![RegionDef::inclusive("inclusive")]
}

/// Sample names per role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleRoles {
    /// Signal-region data (observed counts, fake and charge-flip inputs)
    pub data: Vec<String>,
    /// Muon fake-ratio control samples
    pub mu_fake: Vec<String>,
    /// Muon prompt-ratio control samples
    pub mu_prompt: Vec<String>,
    /// Electron fake-ratio control samples
    pub el_fake: Vec<String>,
    /// Electron prompt-ratio control samples
    pub el_prompt: Vec<String>,
    /// Charge-flip control samples
    pub charge_flip: Vec<String>,
    /// Simulation for rare SM and diboson yields
    #[serde(default)]
    pub mc: Vec<String>,
}

/// Absolute systematics added in quadrature to the measured ratios.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RatioSystematics {
    #[serde(default)]
    pub mu_fake: f64,
    #[serde(default)]
    pub mu_prompt: f64,
    #[serde(default)]
    pub el_fake: f64,
    #[serde(default)]
    pub el_prompt: f64,
}

/// Top-level analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Prediction settings (target luminosity, matrix method, toggles)
    #[serde(flatten)]
    pub prediction: AggregatorConfig,
    /// All input samples
    pub samples: Vec<Sample>,
    /// Which samples play which role
    pub roles: SampleRoles,
    /// Signal regions
    #[serde(default = "default_regions")]
    pub regions: Vec<RegionDef>,
    /// Ratio error treatment
    #[serde(default)]
    pub ratio_error_mode: ErrorMode,
    /// Ratio map binning for the per-event method
    #[serde(default = "default_binning")]
    pub binning: Binning2D,
    /// Extra ratio systematics
    #[serde(default)]
    pub ratio_syst: RatioSystematics,
    /// Relative systematic on the charge-flip probabilities
    #[serde(default)]
    pub flip_syst: f64,
}

impl AnalysisConfig {
    /// Look up samples by name, in the given order.
    pub fn resolve(&self, role: &str, names: &[String]) -> Result<Vec<Sample>> {
        if names.is_empty() {
            bail!("role '{}' lists no samples", role);
        }
        names
            .iter()
            .map(|n| match self.samples.iter().find(|s| &s.name == n) {
                Some(s) => Ok(s.clone()),
                None => bail!("role '{}' references unknown sample '{}'", role, n),
            })
            .collect()
    }

    /// Simulation samples for rare SM and diboson yields (may be empty).
    pub fn mc_samples(&self) -> Result<Vec<Sample>> {
        if self.roles.mc.is_empty() {
            return Ok(Vec::new());
        }
        self.resolve("mc", &self.roles.mc)
    }

    /// Checks that cannot be expressed with serde defaults.
    pub fn validate(&self) -> Result<()> {
        let lumi = self.prediction.target_lumi;
        if !(lumi.is_finite() && lumi > 0.0) {
            bail!("target_lumi must be > 0, got {}", lumi);
        }
        let mut names = HashSet::new();
        for s in &self.samples {
            if !names.insert(s.name.as_str()) {
                bail!("duplicate sample name '{}'", s.name);
            }
            if !s.is_data() && !(s.lumi.is_finite() && s.lumi > 0.0) {
                bail!("sample '{}' must have lumi > 0, got {}", s.name, s.lumi);
            }
        }
        let r = &self.roles;
        for (role, list) in [
            ("data", &r.data),
            ("mu_fake", &r.mu_fake),
            ("mu_prompt", &r.mu_prompt),
            ("el_fake", &r.el_fake),
            ("el_prompt", &r.el_prompt),
            ("charge_flip", &r.charge_flip),
        ] {
            self.resolve(role, list)?;
        }
        self.mc_samples()?;

        if self.regions.is_empty() {
            bail!("at least one region is required");
        }
        let mut region_names = HashSet::new();
        for region in &self.regions {
            if !region_names.insert(region.name.as_str()) {
                bail!("duplicate region name '{}'", region.name);
            }
        }
        if !(self.flip_syst.is_finite() && self.flip_syst >= 0.0) {
            bail!("flip_syst must be >= 0, got {}", self.flip_syst);
        }
        Ok(())
    }
}

/// Read and validate a configuration; `.json` files are JSON, anything else YAML.
pub fn read_analysis_config(path: &Path) -> Result<AnalysisConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: AnalysisConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    cfg.validate()?;
    Ok(cfg)
}
