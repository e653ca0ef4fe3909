use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use thermo_strata::data::{columns, loader};
use thermo_strata::pipeline;
use thermo_strata::tracking;
use thermo_strata::{
    Config, Dataset, DescriptiveAnalyzer, RealtimeScorer, ReliabilityAnalyzer, ThermalAnalyzer,
};

#[derive(Parser)]
#[command(name = "thermo-strata")]
#[command(about = "Thermal interface detection and reliability scoring for stratified tanks")]
#[command(version)]
struct Cli {
    /// JSON configuration file (defaults are used for anything omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link images to dataset rows and extract thermal features for each
    Process {
        /// Historical dataset (.csv, .json or .parquet)
        #[arg(long)]
        data: PathBuf,
        /// Directory holding Imagen<N>.<ext> files
        #[arg(long)]
        images: PathBuf,
        /// Output dataset (.csv or .json)
        #[arg(long)]
        out: PathBuf,
    },

    /// Classify batches by variability and validate thermal reliability
    Analyze {
        /// Dataset with thermal features (output of `process`)
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value = "reliability_results")]
        out_dir: PathBuf,
    },

    /// Derived operating metrics, condition correlations, ratio trends and
    /// per-day / per-state aggregates
    Describe {
        /// Dataset with thermal features (output of `process`)
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value = "descriptive_results")]
        out_dir: PathBuf,
    },

    /// Score a single image against a historical reference; prints JSON
    Predict {
        #[arg(long)]
        image: PathBuf,
        /// Historical dataset the reference profile is built from
        #[arg(long)]
        reference: PathBuf,
    },

    /// Score many images and write one row per image
    BatchPredict {
        #[arg(long)]
        reference: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    let tracker = tracking::from_config(&config.tracking).context("opening tracker")?;

    match cli.command {
        Commands::Process { data, images, out } => {
            let dataset = loader::load_file(&data)?;
            let linked = pipeline::link_images(&dataset, &images)?;
            let analyzer = ThermalAnalyzer::new(config.extractor.clone(), config.detector.clone());
            let (processed, summary) = pipeline::process_dataset(&linked, &analyzer);
            loader::save_file(&processed, &out)?;
            println!(
                "{} rows → {} ({} ok, {} failed, {} without image)",
                processed.len(),
                out.display(),
                summary.processed_ok,
                summary.processed_failed,
                summary.without_image
            );
        }
        Commands::Analyze { data, out_dir } => {
            let dataset = loader::load_file(&data)?;
            let analyzer = ReliabilityAnalyzer::new(config.variability.clone(), tracker);
            let result = analyzer.analyze(&dataset);
            result.write_to(&out_dir)?;
            println!("{}", result.hypothesis.conclusion);
        }
        Commands::Describe { data, out_dir } => {
            let dataset = loader::load_file(&data)?;
            let analyzer = DescriptiveAnalyzer::new(config.descriptive.clone(), tracker);
            let result = analyzer.analyze(&dataset);
            result.write_to(&out_dir)?;
            for trend in &result.trends {
                println!(
                    "{}: {} ({}, mean change {:.4})",
                    trend.feature,
                    trend.direction.as_str(),
                    trend.magnitude.as_str(),
                    trend.mean_change
                );
            }
            println!(
                "{} days, {} operating states → {}",
                result.by_day.len(),
                result.by_state.len(),
                out_dir.display()
            );
        }
        Commands::Predict { image, reference } => {
            let scorer = scorer_from(&config, &reference, tracker)?;
            let prediction = scorer.predict_image(&image);
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
        Commands::BatchPredict { reference, out, images } => {
            let scorer = scorer_from(&config, &reference, tracker)?;
            let predictions = scorer.batch_predict(&images);
            loader::save_file(&predictions, &out)?;
            println!("{} predictions → {}", predictions.len(), out.display());
        }
    }
    Ok(())
}

/// Build a scorer from a historical dataset, classifying it first when it
/// carries no batch labels yet.
fn scorer_from(
    config: &Config,
    reference: &Path,
    tracker: std::sync::Arc<dyn tracking::Tracker>,
) -> Result<RealtimeScorer> {
    let mut history: Dataset = loader::load_file(reference)?;
    if !history.has_column(columns::BATCH_TYPE) {
        log::info!("Reference data has no batch labels; classifying");
        let analyzer = ReliabilityAnalyzer::new(config.variability.clone(), tracker.clone());
        history = analyzer.classify(&analyzer.compute_sigma(&history));
    }
    Ok(RealtimeScorer::from_history(
        config.realtime.clone(),
        &config.extractor,
        config.detector.clone(),
        &history,
        tracker,
    ))
}
