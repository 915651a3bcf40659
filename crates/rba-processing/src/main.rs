//! CLI entry point for the RBA feature pipeline.

use anyhow::{Result, anyhow};
use clap::Parser;
use rba_processing::{
    FeatureArtifact, FileSource, Pipeline, PipelineConfig, RunReport, RunStatus,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

/// Exit code of a run that dropped every record.
const EXIT_EMPTY: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Streaming feature pipeline for risk-based-authentication login data",
    long_about = "Turns a CSV of login events into a numeric, model-ready dataset.\n\n\
                  Categorical columns are replaced by stable integer codes, numeric columns\n\
                  are normalized with statistics over the whole file, and records missing a\n\
                  required field are dropped and counted.\n\n\
                  EXIT CODES:\n  \
                  0    output written\n  \
                  1    the run failed\n  \
                  2    every record was dropped, no output written\n\n\
                  EXAMPLES:\n  \
                  # Fit on the training split and export the trained encoding\n  \
                  rba-processing -i train.csv -o train_features.csv --export-artifact features.json\n\n  \
                  # Apply the same encoding to the evaluation split\n  \
                  rba-processing -i eval.csv -o eval_features.csv --artifact features.json\n\n  \
                  # Resumable run over a large file\n  \
                  rba-processing -i rba-dataset.csv --checkpoint run.checkpoint.json --workers 4"
)]
struct Args {
    /// Path to the login-event CSV
    #[arg(short, long)]
    input: PathBuf,

    /// Path of the processed CSV
    ///
    /// Defaults to ./outputs/processed_<input name>.csv
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Load settings from a JSON configuration file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of records held in memory at once
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Number of threads validating each chunk
    #[arg(long)]
    workers: Option<usize>,

    /// Timestamp format (chrono syntax)
    #[arg(long)]
    timestamp_format: Option<String>,

    /// Write numeric columns as read instead of normalizing them
    #[arg(long)]
    no_normalize: bool,

    /// Export the trained codec and scaler to this file
    #[arg(long, conflicts_with = "artifact")]
    export_artifact: Option<PathBuf>,

    /// Encode with a previously exported codec and scaler instead of fitting
    #[arg(long)]
    artifact: Option<PathBuf>,

    /// Keep a checkpoint here so an interrupted run can resume
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Write a JSON run report to this file
    #[arg(short = 'r', long)]
    report: Option<PathBuf>,

    /// Output JSON to stdout instead of human-readable summary
    ///
    /// Disables all progress logs; only outputs the final JSON report.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    if !args.input.exists() {
        return Err(anyhow!("Input file not found: {}", args.input.display()));
    }

    let config = build_config(&args)?;
    let pipeline = build_pipeline(&args, config)?;

    info!("{}", "=".repeat(80));
    info!("Starting feature pipeline...");
    info!("{}", "=".repeat(80));

    let summary = match pipeline.run(&FileSource::new(&args.input)) {
        Ok(summary) => summary,
        Err(e) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&json!({ "error": e }))?);
            }
            error!("Pipeline failed: {}", e);
            return Err(anyhow!("Pipeline failed: {}", e));
        }
    };

    let report = RunReport::new(args.input.display().to_string(), summary);

    if let Some(path) = &args.report {
        let written = report.write_to_file(path)?;
        info!("Report written to: {}", written.display());
    }

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print_human_readable_summary(&report);
    }

    Ok(match report.summary.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Empty => ExitCode::from(EXIT_EMPTY),
    })
}

/// Merge the optional config file with the command line flags.
fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            PipelineConfig::from_json_file(path)?
        }
        None => PipelineConfig {
            output_path: default_output_path(&args.input),
            ..Default::default()
        },
    };

    if let Some(output) = &args.output {
        config.output_path = output.clone();
    }
    if let Some(size) = args.chunk_size {
        config.chunk_size = size;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(format) = &args.timestamp_format {
        config.timestamp_format = format.clone();
    }
    if args.no_normalize {
        config.normalize = false;
    }
    if let Some(path) = &args.export_artifact {
        config.artifact_path = Some(path.clone());
    }
    if let Some(path) = &args.checkpoint {
        config.checkpoint_path = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}

fn build_pipeline(args: &Args, config: PipelineConfig) -> Result<Pipeline> {
    let mut builder = Pipeline::builder().config(config);

    if let Some(path) = &args.artifact {
        info!("Applying feature artifact: {}", path.display());
        builder = builder.artifact(FeatureArtifact::load(path)?);
    }

    if !args.quiet && !args.json {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.display_name(),
                update.message
            );
        });
    }

    Ok(builder.build()?)
}

/// `./outputs/processed_<input stem>.csv`
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    PathBuf::from("outputs").join(format!("processed_{}.csv", stem))
}

/// Print a human-readable summary of the run.
///
/// This is the default output when `--json` is not specified.
fn print_human_readable_summary(report: &RunReport) {
    let summary = &report.summary;
    let counters = &summary.counters;

    println!();
    println!("{}", "=".repeat(80));
    match summary.status {
        RunStatus::Completed => println!("FEATURE PIPELINE COMPLETE"),
        RunStatus::Empty => println!("FEATURE PIPELINE FINISHED WITHOUT OUTPUT"),
    }
    println!("{}", "=".repeat(80));
    println!();

    println!("Input:  {}", report.input_file);
    match &report.output_file {
        Some(output) => println!(
            "Output: {} ({} rows x {} columns)",
            output,
            counters.records_written,
            summary.columns.len()
        ),
        None => println!("Output: none"),
    }
    if let Some(artifact) = &report.artifact_file {
        println!("Artifact: {}", artifact);
    }
    println!();

    println!("Processing Summary:");
    println!("  Mode: {:?} ({} pass(es))", summary.mode, summary.passes);
    if summary.resumed {
        println!("  Resumed from checkpoint");
    }
    println!("  Duration: {}ms", summary.duration_ms);
    println!(
        "  Records: {} read, {} written, {} dropped ({:.1}%)",
        counters.records_read,
        counters.records_written,
        counters.records_dropped,
        summary.dropped_percentage()
    );
    println!("  Chunks: {}", counters.chunks);
    println!("  Optional fallbacks: {}", counters.optional_fallbacks);
    if counters.unknown_categories > 0 {
        println!("  Unknown categories: {}", counters.unknown_categories);
    }
    println!();

    if !counters.dropped_by_reason.is_empty() {
        println!("Dropped Records:");
        for (reason, count) in &counters.dropped_by_reason {
            println!("  {:<24} {}", reason, count);
        }
        for (column, count) in &counters.dropped_by_column {
            println!("  column {:<17} {}", column, count);
        }
        println!();
    }

    if !summary.category_cardinality.is_empty() {
        println!("Categorical Columns:");
        for (column, cardinality) in &summary.category_cardinality {
            println!("  {:<28} {} codes", column, cardinality);
        }
        println!();
    }

    if !summary.column_stats.is_empty() {
        println!("Scaled Columns:");
        for stats in &summary.column_stats {
            println!(
                "  {:<28} mean {:.3}, std {:.3} (n = {})",
                stats.name, stats.mean, stats.std, stats.count
            );
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings:");
        for warning in &report.warnings {
            println!("  ! {}", warning);
        }
        println!();
    }

    println!("Use --json for machine-readable output");
    println!("Use --report <file> to save a JSON report");
    println!("{}", "=".repeat(80));
}
