/// Land-use transition modeling CLI: reads a run file describing the class,
/// mask and covariate rasters, fits one random forest per class and writes
/// models, probability rasters and the validation table.
mod ingest;
mod logging;
mod output;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use landshift_core::features::{FeatureInputs, FeatureMatrix};
use landshift_core::pipeline::{Pipeline, RowStatus};
use tracing::{info, warn};

use crate::ingest::{load_layers, RunFile};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "landshift",
    about = "Fit per-class land-use transition models and project probability surfaces"
)]
struct Args {
    /// Run file (JSON): layer paths, legend and pipeline options
    #[arg(short, long)]
    config: PathBuf,

    /// Base directory for relative layer paths (default: the run file's directory)
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Output directory, created if absent (default: the run file's
    /// `output_dir`, else "output")
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Model only transitions into cropland
    #[arg(long)]
    focus_cropland: bool,

    /// Override the run file's random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the run file's sampling factor, in (0, 1]
    #[arg(long)]
    sampling_factor: Option<f64>,

    /// Skip the hyperparameter grid search and use the default forest
    #[arg(long)]
    no_tuning: bool,

    /// Also write probability surfaces as JSON grids
    #[arg(long)]
    json_surfaces: bool,

    /// Also write the valid-cell table to <output-dir>/feature_matrix.json
    #[arg(long)]
    dump_matrix: bool,

    /// Model from a stored feature matrix instead of reading the layers.
    /// The matrix keeps the sampling and focus filtering it was built with
    #[arg(long)]
    from_matrix: Option<PathBuf>,

    /// Log filter, e.g. "info" or "landshift_core=debug" (RUST_LOG wins)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Append logs to this file as well as stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level, args.log_file.as_deref())?;

    let mut run_file = RunFile::load(&args.config)?;
    let cfg = &mut run_file.pipeline;
    if args.focus_cropland {
        cfg.focus_on_cropland_transitions = true;
    }
    if let Some(seed) = args.seed {
        cfg.random_seed = seed;
    }
    if let Some(f) = args.sampling_factor {
        cfg.sampling_factor = f;
    }
    if args.no_tuning {
        cfg.hyperparameter_tuning = false;
    }

    let base = match &args.input_dir {
        Some(dir) => dir.clone(),
        None => args
            .config
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default(),
    };
    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| run_file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("output"));

    let pipeline = Pipeline::new(run_file.pipeline.clone()).context("Invalid pipeline options")?;
    let matrix = match &args.from_matrix {
        Some(path) => {
            let matrix = ingest::load_matrix(path)?;
            info!(
                path = %path.display(),
                valid = matrix.n_valid(),
                training = matrix.training_indices().len(),
                "feature matrix loaded"
            );
            matrix
        }
        None => build_matrix(&pipeline, &run_file, &base)?,
    };

    // ── Pipeline ────────────────────────────────────────────────────────────
    let mut written = Vec::new();
    if args.dump_matrix {
        written.push(output::write_matrix(&output_dir, &matrix)?);
    }
    let run = pipeline.run_matrix(&matrix);

    // ── Outputs ─────────────────────────────────────────────────────────────
    written.extend(output::write_run(&output_dir, &run, pipeline.config(), args.json_surfaces)?);

    for row in &run.validation_table().rows {
        match row.status {
            RowStatus::Modeled => info!(
                class = row.class,
                roc_auc = ?row.roc_auc,
                boyce_index = ?row.boyce_index,
                "class modeled"
            ),
            RowStatus::Failed => warn!(
                class = row.class,
                reason = %row.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "class failed"
            ),
        }
    }
    info!(
        files = written.len(),
        output = %output_dir.display(),
        elapsed_ms = run.elapsed_ms,
        "done"
    );
    Ok(())
}

fn build_matrix(pipeline: &Pipeline, run_file: &RunFile, base: &Path) -> Result<FeatureMatrix> {
    // legend first: fail before touching rasters
    let legend = run_file.legend_table(base)?;
    info!(scope = ?pipeline.config().class_scope(), legend_entries = legend.len(), "configured");

    let layers = load_layers(run_file, base)?;
    info!(
        width = layers.prior.frame.width,
        height = layers.prior.frame.height,
        covariates = layers.covariates.len(),
        "layers loaded"
    );
    Ok(pipeline.build_matrix(
        &legend,
        FeatureInputs {
            prior: &layers.prior,
            posterior: layers.posterior.as_ref(),
            mask: &layers.mask,
            covariates: &layers.covariates,
        },
    )?)
}
