//! SSDL background estimator CLI

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use ssdl_core::{Channel, TightLooseCounts, TlCategory};
use ssdl_fakes::matrix::{LegRatios, checked_event_weights};
use ssdl_fakes::{EventStore, LegInputs, MatrixMethod, MatrixMethodConfig, Ratio};
use std::path::{Path, PathBuf};

mod analysis;
mod config;

#[derive(Parser)]
#[command(name = "ssdl")]
#[command(about = "Same-sign dilepton background estimation (fakes, charge flips, rare SM)")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure integrated (and optionally binned) fake and prompt ratios
    Ratios {
        /// Analysis configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Classified events (JSON)
        #[arg(short, long)]
        events: PathBuf,

        /// Also measure (pT, |eta|) ratio maps
        #[arg(long)]
        binned: bool,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Measure electron charge-flip probabilities
    Chmid {
        /// Analysis configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Classified events (JSON)
        #[arg(short, long)]
        events: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Predict backgrounds in the configured signal regions
    Predict {
        /// Analysis configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Classified events (JSON)
        #[arg(short, long)]
        events: PathBuf,

        /// Only this region
        #[arg(long)]
        region: Option<String>,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto). Results do not depend on this.
        #[arg(long, default_value = "1")]
        threads: usize,
    },

    /// Matrix-method solve on explicit counts and ratios
    Matrix {
        /// Channel
        #[arg(long, value_enum)]
        channel: ChannelArg,

        /// Leg 1 fake ratio (the muon in `el-mu`)
        #[arg(long)]
        f1: f64,
        /// Error on `f1`
        #[arg(long, default_value = "0")]
        f1_err: f64,
        /// Leg 1 prompt ratio
        #[arg(long)]
        p1: f64,
        /// Error on `p1`
        #[arg(long, default_value = "0")]
        p1_err: f64,
        /// Leg 2 fake ratio (required for `el-mu`)
        #[arg(long)]
        f2: Option<f64>,
        /// Error on `f2`
        #[arg(long, default_value = "0")]
        f2_err: f64,
        /// Leg 2 prompt ratio (required for `el-mu`)
        #[arg(long)]
        p2: Option<f64>,
        /// Error on `p2`
        #[arg(long, default_value = "0")]
        p2_err: f64,

        /// Tight-tight count
        #[arg(long)]
        tt: f64,
        /// Leg 1 tight, leg 2 loose count (same flavor: all single-tight events)
        #[arg(long)]
        tl: f64,
        /// Leg 2 tight, leg 1 loose count
        #[arg(long, default_value = "0")]
        lt: f64,
        /// Loose-loose count
        #[arg(long)]
        ll: f64,

        /// Toy experiments
        #[arg(long, default_value = "100")]
        n_toys: usize,
        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Relative systematic on the prediction
        #[arg(long, default_value = "0.5")]
        syst: f64,
        /// Ratios are simulation truth: no systematic
        #[arg(long)]
        mc_truth: bool,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto). Results do not depend on this.
        #[arg(long, default_value = "1")]
        threads: usize,
    },

    /// Per-event tight-tight weights for one event
    Weights {
        /// Tight/loose category
        #[arg(long, value_enum)]
        category: CategoryArg,
        /// Leg 1 fake ratio
        #[arg(long)]
        f1: f64,
        /// Leg 2 fake ratio
        #[arg(long)]
        f2: f64,
        /// Leg 1 prompt ratio
        #[arg(long)]
        p1: f64,
        /// Leg 2 prompt ratio
        #[arg(long)]
        p2: f64,
    },

    /// Print version
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    MuMu,
    ElMu,
    ElEl,
}

impl From<ChannelArg> for Channel {
    fn from(c: ChannelArg) -> Self {
        match c {
            ChannelArg::MuMu => Channel::MuMu,
            ChannelArg::ElMu => Channel::ElMu,
            ChannelArg::ElEl => Channel::ElEl,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    TightTight,
    TightLoose,
    LooseTight,
    LooseLoose,
}

impl From<CategoryArg> for TlCategory {
    fn from(c: CategoryArg) -> Self {
        match c {
            CategoryArg::TightTight => TlCategory::TightTight,
            CategoryArg::TightLoose => TlCategory::TightLoose,
            CategoryArg::LooseTight => TlCategory::LooseTight,
            CategoryArg::LooseLoose => TlCategory::LooseLoose,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Ratios { config, events, binned, output } => {
            cmd_ratios(&config, &events, binned, output.as_ref())
        }
        Commands::Chmid { config, events, output } => cmd_chmid(&config, &events, output.as_ref()),
        Commands::Predict { config, events, region, output, threads } => {
            cmd_predict(&config, &events, region.as_deref(), output.as_ref(), threads)
        }
        Commands::Matrix {
            channel,
            f1,
            f1_err,
            p1,
            p1_err,
            f2,
            f2_err,
            p2,
            p2_err,
            tt,
            tl,
            lt,
            ll,
            n_toys,
            seed,
            syst,
            mc_truth,
            output,
            threads,
        } => {
            let channel = Channel::from(channel);
            let inputs = if channel.is_same_flavor() {
                LegInputs::same_flavor(Ratio::with_error(f1, f1_err), Ratio::with_error(p1, p1_err))
            } else {
                let (Some(f2), Some(p2)) = (f2, p2) else {
                    anyhow::bail!("--f2 and --p2 are required for the el-mu channel");
                };
                LegInputs::mixed(
                    Ratio::with_error(f1, f1_err),
                    Ratio::with_error(p1, p1_err),
                    Ratio::with_error(f2, f2_err),
                    Ratio::with_error(p2, p2_err),
                )
            };
            let config =
                MatrixMethodConfig { n_toys, seed, additional_syst: syst, mc_truth, ..Default::default() };
            cmd_matrix(
                channel,
                &inputs,
                TightLooseCounts::new(tt, tl, lt, ll),
                config,
                output.as_ref(),
                threads,
            )
        }
        Commands::Weights { category, f1, f2, p1, p2 } => {
            cmd_weights(category.into(), LegRatios { f1, p1, f2, p2 })
        }
        Commands::Version => {
            println!("ssdl {}", ssdl_core::VERSION);
            Ok(())
        }
    }
}

fn setup_threads(threads: usize) {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
}

fn load_inputs(config: &Path, events: &Path) -> Result<(config::AnalysisConfig, EventStore)> {
    tracing::info!(path = %config.display(), "loading config");
    let cfg = config::read_analysis_config(config)?;
    tracing::info!(path = %events.display(), "loading events");
    let store = EventStore::from_path(events)?;
    for s in &cfg.samples {
        if !store.has_sample(&s.name) {
            tracing::warn!(sample = %s.name, "no events for configured sample");
        }
    }
    Ok((cfg, store))
}

fn cmd_ratios(
    config: &Path,
    events: &Path,
    binned: bool,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (cfg, store) = load_inputs(config, events)?;
    let report = analysis::ratio_report(&cfg, &store, binned)?;
    write_json(output, serde_json::to_value(&report)?)
}

fn cmd_chmid(config: &Path, events: &Path, output: Option<&PathBuf>) -> Result<()> {
    let (cfg, store) = load_inputs(config, events)?;
    let flip = analysis::measure_charge_flip(&cfg, &store)?;
    write_json(output, serde_json::to_value(flip)?)
}

fn cmd_predict(
    config: &Path,
    events: &Path,
    region: Option<&str>,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    setup_threads(threads);
    let (cfg, store) = load_inputs(config, events)?;
    let report = analysis::predict(&cfg, &store, region)?;
    write_json(output, serde_json::to_value(&report)?)
}

fn cmd_matrix(
    channel: Channel,
    inputs: &LegInputs,
    counts: TightLooseCounts,
    config: MatrixMethodConfig,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    setup_threads(threads);
    let mm = MatrixMethod::new(config)?;
    let weights = mm.solve(channel, inputs, &counts)?;
    tracing::info!(
        channel = channel.label(),
        fakes = weights.fakes.value,
        rejected = weights.n_toys_rejected,
        "matrix method solved"
    );
    write_json(output, serde_json::to_value(&weights)?)
}

fn cmd_weights(category: TlCategory, ratios: LegRatios) -> Result<()> {
    let w = checked_event_weights(category, &ratios, ssdl_fakes::matrix::DEFAULT_MIN_SEPARATION)?;
    let output_json = serde_json::json!({
        "category": category,
        "pp": w[0],
        "pf": w[1],
        "fp": w[2],
        "ff": w[3],
        "fakes": w[1] + w[2] + w[3],
    });
    write_json(None, output_json)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
