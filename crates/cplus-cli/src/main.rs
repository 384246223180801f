//! cplus: run a scenario analysis from the command line.
//!
//! Reads a task configuration and a dataset of in-memory layers (both
//! JSON), runs the analysis on a worker thread, and prints the scenario
//! result. Pipeline events are drained on the main thread while the
//! worker runs.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin cplus -- [OPTIONS] --dataset <FILE> <CONFIG>
//! ```
//!
//! Exit status is 0 on success, 1 on failure and 130 when the analysis
//! was cancelled.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, anyhow};
use clap::Parser;
use cplus_pipeline::config::parse_mask_list;
use cplus_pipeline::memory::{Dataset, MemoryEngine};
use cplus_pipeline::{
    LayerPath, LogLevel, PipelineEvent, ScenarioAnalysisTask, TaskConfig, TaskOutcome, TaskReport,
};
use tracing_subscriber::EnvFilter;

/// Exit status of a cancelled analysis.
const EXIT_CANCELLED: u8 = 130;

/// Rank land-use activities for a scenario.
///
/// Settings in the configuration file can be overridden with the flags
/// below.
#[derive(Parser)]
#[command(name = "cplus", version)]
struct Cli {
    /// Task configuration (JSON).
    config: PathBuf,

    /// Layers the configuration refers to (JSON dataset).
    #[arg(long)]
    dataset: PathBuf,

    /// Directory named outputs are written under.
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Pathway suitability index.
    #[arg(long)]
    suitability_index: Option<f64>,

    /// Carbon coefficient used when normalizing.
    #[arg(long)]
    carbon_coefficient: Option<f64>,

    /// Enable the sieve filter.
    #[arg(long)]
    sieve: bool,

    /// Minimum patch size kept by the sieve, in pixels.
    #[arg(long)]
    sieve_threshold: Option<f64>,

    /// Snap pathways and priority layers onto this raster's grid.
    #[arg(long)]
    snap_layer: Option<String>,

    /// Scenario-wide mask layers, comma separated.
    #[arg(long)]
    mask_layers: Option<String>,

    /// Normalize activities before cleaning.
    #[arg(long)]
    normalize: bool,

    /// Write every layer held after the run to this dataset file.
    #[arg(long)]
    save_dataset: Option<PathBuf>,

    /// Print the scenario result as JSON.
    #[arg(long)]
    json: bool,

    /// Show per-operation progress.
    #[arg(long)]
    progress: bool,
}

/// How the command ended, before it is mapped to an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Succeeded,
    Failed,
    Cancelled,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Succeeded => Self::SUCCESS,
            Status::Failed => Self::FAILURE,
            Status::Cancelled => Self::from(EXIT_CANCELLED),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(status) => status.into(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<Status> {
    let config = load_config(cli)?;
    let engine = load_dataset(&cli.dataset)?;
    tracing::info!(
        scenario = %config.scenario.name,
        activities = config.scenario.activities.len(),
        "starting scenario analysis"
    );

    let (tx, rx) = crossbeam::channel::unbounded();
    let handle = ScenarioAnalysisTask::new(config, engine, tx)
        .spawn()
        .context("starting the analysis thread")?;

    // The worker owns the only sender; the loop ends when it finishes.
    for event in rx {
        show_event(&event, cli.progress);
    }
    let report = handle
        .join()
        .map_err(|_| anyhow!("the analysis thread panicked"))?;

    if let Some(path) = &cli.save_dataset {
        save_dataset(path, &report.engine.to_dataset())?;
    }
    finish(cli, &report)
}

/// Parse the configuration file and apply the flag overrides.
fn load_config(cli: &Cli) -> anyhow::Result<TaskConfig> {
    let file = File::open(&cli.config)
        .with_context(|| format!("opening configuration {}", cli.config.display()))?;
    let mut config: TaskConfig = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing configuration {}", cli.config.display()))?;

    let settings = &mut config.settings;
    if let Some(dir) = &cli.base_dir {
        settings.base_dir.clone_from(dir);
    }
    if let Some(index) = cli.suitability_index {
        settings.pathway_suitability_index = index;
    }
    if let Some(coefficient) = cli.carbon_coefficient {
        settings.carbon_coefficient = coefficient;
    }
    if cli.sieve {
        settings.sieve.enabled = true;
    }
    if let Some(threshold) = cli.sieve_threshold {
        settings.sieve.threshold = threshold;
    }
    if let Some(layer) = &cli.snap_layer {
        settings.snapping.enabled = true;
        settings.snapping.reference_layer = Some(LayerPath::new(layer));
    }
    if let Some(masks) = &cli.mask_layers {
        settings.mask_layers = parse_mask_list(masks.split(','));
    }
    if cli.normalize {
        settings.normalize_activities = true;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn load_dataset(path: &Path) -> anyhow::Result<MemoryEngine> {
    let file =
        File::open(path).with_context(|| format!("opening dataset {}", path.display()))?;
    let dataset: Dataset = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing dataset {}", path.display()))?;
    Ok(MemoryEngine::from_dataset(dataset))
}

fn save_dataset(path: &Path, dataset: &Dataset) -> anyhow::Result<()> {
    let file =
        File::create(path).with_context(|| format!("creating dataset {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, dataset)
        .with_context(|| format!("writing dataset {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("writing dataset {}", path.display()))?;
    eprintln!("Dataset written to {}", path.display());
    Ok(())
}

fn show_event(event: &PipelineEvent, progress: bool) {
    match event {
        PipelineEvent::Status(message) => eprintln!("{message}"),
        PipelineEvent::Info { message, level } => match level {
            LogLevel::Info => eprintln!("{message}"),
            LogLevel::Warning => eprintln!("Warning: {message}"),
            LogLevel::Critical => eprintln!("Critical: {message}"),
        },
        PipelineEvent::Progress(percent) if progress => eprintln!("  {percent:>5.1}%"),
        PipelineEvent::Progress(_) => {}
        PipelineEvent::Log {
            message,
            channel,
            level,
            ..
        } => match level {
            LogLevel::Info => tracing::debug!(%channel, "{message}"),
            LogLevel::Warning => tracing::warn!(%channel, "{message}"),
            LogLevel::Critical => tracing::error!(%channel, "{message}"),
        },
        PipelineEvent::StateChanged(state) => tracing::debug!(?state, "analysis state"),
        PipelineEvent::Cancelled { with_error } => {
            tracing::debug!(with_error, "analysis stopped early");
        }
    }
}

fn finish(cli: &Cli, report: &TaskReport<MemoryEngine>) -> anyhow::Result<Status> {
    eprintln!("{}", report.diagnostics.report());
    match &report.outcome {
        TaskOutcome::Succeeded(result) => {
            if cli.json {
                let json =
                    serde_json::to_string_pretty(result).context("serializing the result")?;
                println!("{json}");
            } else {
                println!(
                    "Scenario \"{}\" written to {}",
                    result.scenario.name, result.analysis_output
                );
                for activity in &result.scenario.activities {
                    let layer = activity
                        .path
                        .as_ref()
                        .map_or_else(|| "-".to_owned(), ToString::to_string);
                    println!(
                        "{:>4}  {:<32} {layer}",
                        activity.style_pixel_value, activity.name
                    );
                }
            }
            Ok(Status::Succeeded)
        }
        TaskOutcome::Cancelled => {
            eprintln!("Analysis cancelled");
            Ok(Status::Cancelled)
        }
        TaskOutcome::Failed(err) => {
            eprintln!("Analysis failed: {}", cplus_pipeline::error::error_chain(err));
            Ok(Status::Failed)
        }
    }
}
