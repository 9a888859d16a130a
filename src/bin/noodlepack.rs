//! Noodle Pack CLI - Command-line interface for Noodle Pack
//!
//! Commands:
//! - compress: Compress session JSON files into Parquet artifacts
//! - rehydrate: Restore JSON views from an artifact
//! - score: Evaluate the privacy risk of a session
//! - schema: Print the artifact column table

use clap::{Parser, Subcommand};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use noodle_pack::decoder::{DecodeOptions, OutputFormat};
use noodle_pack::pipeline::{compress_directory, rehydrate, CancellationFlag};
use noodle_pack::schema::{AliasTable, CanonicalField, ColumnType};
use noodle_pack::types::PrivacyAssessment;
use noodle_pack::{
    CodecError, CompressionCodec, PipelineConfig, PipelineContext, PrivacyEvaluator, SessionFilter,
    PACK_VERSION,
};

/// Noodle Pack - Columnar compression for session telemetry
#[derive(Parser)]
#[command(name = "noodlepack")]
#[command(version = PACK_VERSION)]
#[command(about = "Compress and rehydrate noodle sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress session JSON files into Parquet artifacts
    Compress {
        /// Session file or directory of session files
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Pipeline config file (JSON); flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Keep only synthetic_only, real_only or consented sessions
        #[arg(long)]
        filter: Option<String>,

        /// Decimal places kept on metric fields
        #[arg(long)]
        round: Option<u32>,

        /// Optional columns to omit (comma-separated)
        #[arg(long, value_delimiter = ',')]
        drop: Vec<String>,

        /// snappy, zstd, gzip or uncompressed
        #[arg(long)]
        compression: Option<String>,

        /// Write columns under their short aliases
        #[arg(long)]
        alias: bool,

        /// Run every step without writing files
        #[arg(long)]
        dry_run: bool,

        /// Score sessions and redact heart rate above the threshold
        #[arg(long)]
        privacy_check: bool,

        /// Privacy score above which heart rate is dropped
        #[arg(long)]
        privacy_threshold: Option<f64>,

        /// Write <session_id>.features.json companions
        #[arg(long)]
        features: bool,

        /// Heart rate jitter amplitude (bpm)
        #[arg(long)]
        heart_jitter: Option<f64>,

        /// Worker threads
        #[arg(long)]
        workers: Option<usize>,

        /// Append-only compression log
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Restore JSON views from an artifact
    Rehydrate {
        /// Parquet artifact
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory (defaults to the artifact's directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Views to write: noodle, ghost, timeline or all (comma-separated)
        #[arg(long, default_value = "noodle")]
        format: String,

        /// Track id attached to the noodle view
        #[arg(long)]
        inject_track: Option<String>,

        /// Mark the noodle view synthetic and attach a rebuilt privacy ledger
        #[arg(long)]
        rebuild_synthetic: bool,

        /// New session id for the noodle view
        #[arg(long)]
        remix: Option<String>,
    },

    /// Evaluate the privacy risk of a session
    Score {
        /// Session JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the artifact column table
    Schema,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), NoodleCliError> {
    match cli.command {
        Commands::Compress {
            input,
            output,
            config,
            filter,
            round,
            drop,
            compression,
            alias,
            dry_run,
            privacy_check,
            privacy_threshold,
            features,
            heart_jitter,
            workers,
            log_file,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::from_json_file(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(filter) = filter {
                config.filter = Some(filter.parse::<SessionFilter>()?);
            }
            if let Some(round) = round {
                config.round_precision = round;
            }
            if !drop.is_empty() {
                config.drop_fields = drop;
            }
            if let Some(compression) = compression {
                config.compression = compression.parse::<CompressionCodec>()?;
            }
            if let Some(threshold) = privacy_threshold {
                config.privacy_threshold = threshold;
            }
            if let Some(amplitude) = heart_jitter {
                config.heart_jitter_amplitude = amplitude;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            if log_file.is_some() {
                config.log_path = log_file;
            }
            config.use_alias |= alias;
            config.dry_run |= dry_run;
            config.privacy_check |= privacy_check;
            config.write_features |= features;

            cmd_compress(config, &input, &output)
        }

        Commands::Rehydrate {
            input,
            output,
            format,
            inject_track,
            rebuild_synthetic,
            remix,
        } => {
            let options = DecodeOptions {
                formats: OutputFormat::parse_list(&format)?,
                remix,
                inject_track,
                rebuild_synthetic,
            };
            cmd_rehydrate(&input, output.as_deref(), &options)
        }

        Commands::Score { input, json } => cmd_score(&input, json),

        Commands::Schema => {
            cmd_schema();
            Ok(())
        }
    }
}

fn cmd_compress(config: PipelineConfig, input: &Path, output: &Path) -> Result<(), NoodleCliError> {
    let dry_run = config.dry_run;
    let ctx = PipelineContext::new(config)?;
    let summary = compress_directory(&ctx, input, output, &CancellationFlag::new())?;

    println!("{}", if dry_run { "Compression Report (dry run)" } else { "Compression Report" });
    println!("==================");
    println!("Processed:  {}", summary.processed);
    println!("Compressed: {}", summary.compressed);
    println!("Skipped:    {}", summary.skipped);
    println!("Errors:     {}", summary.errors);

    if !summary.results.is_empty() {
        println!("\nExports:");
        for session in &summary.results {
            println!(
                "  - {} → {} (rows: {}, fields: {})",
                session.session_id,
                session.artifact_path.display(),
                session.sidecar.rows.unwrap_or_default(),
                session.sidecar.fields.len()
            );
            for overlay in &session.overlay_paths {
                println!("      overlay {}", overlay.display());
            }
            if let Some(features) = &session.features_path {
                println!("      features {}", features.display());
            }
        }
    }
    if let Some(log_path) = ctx.log.path() {
        println!("\nLog: {}", log_path.display());
    }

    if summary.errors > 0 {
        Err(NoodleCliError::BatchFailed(summary.errors))
    } else {
        Ok(())
    }
}

fn cmd_rehydrate(input: &Path, output: Option<&Path>, options: &DecodeOptions) -> Result<(), NoodleCliError> {
    let ctx = PipelineContext::new(PipelineConfig::default())?;
    let rehydration = rehydrate(&ctx, input, output, options)?;
    let metadata = &rehydration.session.metadata;

    println!("Rehydrated {} ({} rows)", rehydration.session.session_id, metadata.rows);
    for path in &rehydration.written {
        println!("  - {}", path.display());
    }

    let warnings = rehydration.session.warnings();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in warnings {
            println!("  - {warning}");
        }
    }
    Ok(())
}

fn cmd_score(input: &Path, json: bool) -> Result<(), NoodleCliError> {
    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(input)?)?;
    let assessment = PrivacyEvaluator::evaluate_value(&value)?;

    if json {
        println!("{}", render_json(&assessment)?);
    } else {
        let risk = &assessment.risk_vector;
        println!("Privacy Assessment");
        println!("==================");
        println!("Biometrics:         {:.2}", risk.biometrics);
        println!("Temporal precision: {:.2}", risk.temporal_precision);
        println!("Location trace:     {:.2}", risk.location_trace);
        println!("Score:              {:.2}", assessment.score);
        println!("Recommendation:     {}", assessment.recommendation);
    }
    Ok(())
}

fn cmd_schema() {
    let aliases = AliasTable::standard();

    println!("Session artifact: <session_id>.parquet");
    println!();
    println!("{:<16} {:<6} {:<8} {:<9}", "Field", "Alias", "Type", "Optional");
    for field in CanonicalField::ALL {
        println!(
            "{:<16} {:<6} {:<8} {:<9}",
            field.as_str(),
            aliases.alias(field),
            field.column_type().as_str(),
            if field.is_optional() { "yes" } else { "no" }
        );
    }
    println!();
    println!("t_ms holds the delta from the previous row; the first row holds the offset from session start.");
    println!();
    println!("Overlay artifact: <session_id>.<overlay_type>.parquet");
    println!("  - source_session_id, overlay_id, overlay_type: {}", ColumnType::Utf8.as_str());
    println!("  - start_ms, end_ms: {}", ColumnType::Int32.as_str());
    println!("  - intensity: {} (optional)", ColumnType::Float.as_str());
    println!();
    println!("Every artifact has a sidecar: <artifact>.meta.json");
}

// Helper functions

/// Pretty JSON for terminals, compact JSON for pipes
fn render_json(assessment: &PrivacyAssessment) -> Result<String, NoodleCliError> {
    if atty::is(atty::Stream::Stdout) {
        Ok(serde_json::to_string_pretty(assessment)?)
    } else {
        Ok(serde_json::to_string(assessment)?)
    }
}

// Error types

#[derive(Debug)]
enum NoodleCliError {
    Io(io::Error),
    Codec(CodecError),
    Json(serde_json::Error),
    BatchFailed(usize),
}

impl From<io::Error> for NoodleCliError {
    fn from(e: io::Error) -> Self {
        NoodleCliError::Io(e)
    }
}

impl From<CodecError> for NoodleCliError {
    fn from(e: CodecError) -> Self {
        NoodleCliError::Codec(e)
    }
}

impl From<serde_json::Error> for NoodleCliError {
    fn from(e: serde_json::Error) -> Self {
        NoodleCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NoodleCliError> for CliError {
    fn from(e: NoodleCliError) -> Self {
        match e {
            NoodleCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NoodleCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NoodleCliError::BatchFailed(count) => CliError {
                code: "BATCH_FAILED".to_string(),
                message: format!("{count} session file(s) failed to compress"),
                hint: Some("See the [ERROR] lines in the log for each file".to_string()),
            },
            NoodleCliError::Codec(e) => {
                let (code, hint) = match &e {
                    CodecError::Configuration(_) => ("CONFIG_ERROR", "Check flags and the config file"),
                    CodecError::UnsupportedFormat(_) => {
                        ("UNSUPPORTED_FORMAT", "Use noodle, ghost, timeline or all")
                    }
                    CodecError::InvalidSession(_) | CodecError::Json(_) => {
                        ("INVALID_SESSION", "Input must be a JSON object")
                    }
                    CodecError::Schema(_) | CodecError::Parquet(_) | CodecError::Arrow(_) => {
                        ("ARTIFACT_ERROR", "Input must be an artifact written by noodlepack")
                    }
                    CodecError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                    CodecError::EmptySession(_) | CodecError::Encoding(_) => {
                        ("ENCODING_ERROR", "Run 'noodlepack schema' for the artifact layout")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
        }
    }
}
