//! Command-line verifier: runs extraction and validation in-process, no queue.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use label_verifier::app_state::default_registry;
use label_verifier::config::AppConfig;
use label_verifier::error::ErrorRecord;
use label_verifier::models::backend::BackendKind;
use label_verifier::models::job::JobState;
use label_verifier::models::label::ReferenceFields;
use label_verifier::models::verification::{BatchItemView, BatchSummary, ComplianceStatus, ValidationResult};
use label_verifier::services::intake;
use label_verifier::services::ocr::BackendRegistry;
use label_verifier::services::worker::verify_image;

const EXIT_PASS: u8 = 0;
const EXIT_ISSUES: u8 = 1;
const EXIT_USAGE: u8 = 2;

/// Validate alcohol beverage labels against TTB labeling rules.
#[derive(Parser, Debug)]
#[command(name = "label-verify", version)]
struct Args {
    /// Path to a label image (PNG or JPEG)
    #[arg(required_unless_present = "batch", conflicts_with = "batch")]
    image: Option<PathBuf>,

    /// Process every image in a directory
    #[arg(long, value_name = "DIR")]
    batch: Option<PathBuf>,

    /// Reference JSON for the single image (enables the accuracy tier)
    #[arg(long, value_name = "FILE", conflicts_with = "batch")]
    ground_truth: Option<PathBuf>,

    /// Directory holding `<stem>.json` references for --batch (defaults to the batch directory)
    #[arg(long, value_name = "DIR")]
    ground_truth_dir: Option<PathBuf>,

    /// Extraction backend: tesseract (fast) or ollama (accurate, slow)
    #[arg(long, alias = "ocr-backend", value_name = "NAME")]
    backend: Option<BackendKind>,

    /// Write JSON output to a file instead of stdout
    #[arg(long, short, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Progress logging on stderr
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Intake(#[from] intake::IntakeError),

    #[error("configuration: {0}")]
    Config(#[from] label_verifier::config::ConfigError),

    #[error("no PNG or JPEG images in {0}")]
    EmptyBatch(PathBuf),
}

#[derive(Serialize)]
struct BatchReport {
    items: Vec<BatchItemView>,
    summary: BatchSummary,
}

fn read(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn load_reference(path: &Path) -> Result<Option<ReferenceFields>, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(intake::parse_reference(Some(&raw))?)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn verify_file(
    registry: &BackendRegistry,
    backend: BackendKind,
    path: &Path,
    reference: Option<ReferenceFields>,
    max_bytes: usize,
) -> Result<ValidationResult, ErrorRecord> {
    let name = display_name(path);
    let bytes = read(path).map_err(|e| ErrorRecord::invalid_input(e.to_string()))?;
    let format = intake::check_image(&name, &bytes, max_bytes).map_err(|e| e.to_record())?;
    verify_image(registry, backend, &bytes, format, reference)
        .await
        .map_err(|e| e.to_record(1))
}

fn is_pass(status: ComplianceStatus) -> bool {
    matches!(status, ComplianceStatus::Compliant | ComplianceStatus::PartialValidation)
}

fn write_output(args: &Args, json: &str) -> Result<(), CliError> {
    match &args.output {
        Some(path) => std::fs::write(path, format!("{json}\n")).map_err(|source| CliError::Io {
            path: path.clone(),
            source,
        }),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

async fn run_single(args: &Args, config: &AppConfig, registry: &BackendRegistry, backend: BackendKind) -> Result<u8, CliError> {
    let Some(image) = &args.image else {
        return Ok(EXIT_USAGE);
    };
    let reference = match &args.ground_truth {
        Some(path) => load_reference(path)?,
        None => None,
    };

    // input problems are usage errors, not verification outcomes
    let name = display_name(image);
    let bytes = read(image)?;
    intake::check_image(&name, &bytes, config.max_file_size_bytes())?;

    match verify_file(registry, backend, image, reference, config.max_file_size_bytes()).await {
        Ok(result) => {
            let json = serde_json::to_string(&result).unwrap_or_default();
            write_output(args, &json)?;
            Ok(if is_pass(result.status) { EXIT_PASS } else { EXIT_ISSUES })
        }
        Err(error) => {
            tracing::error!(image = %image.display(), kind = %error.kind, error = %error.message, "verification failed");
            let json = serde_json::json!({ "error": error }).to_string();
            write_output(args, &json)?;
            Ok(EXIT_ISSUES)
        }
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, CliError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CliError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut images: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        })
        .collect();
    images.sort();
    if images.is_empty() {
        return Err(CliError::EmptyBatch(dir.to_path_buf()));
    }
    Ok(images)
}

async fn run_batch(
    args: &Args,
    dir: &Path,
    config: &AppConfig,
    registry: &BackendRegistry,
    backend: BackendKind,
) -> Result<u8, CliError> {
    let images = list_images(dir)?;
    let reference_dir = args.ground_truth_dir.as_deref().unwrap_or(dir);
    let total = images.len();

    let mut items = Vec::with_capacity(total);
    for (index, path) in images.iter().enumerate() {
        let filename = display_name(path);
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let reference_path = reference_dir.join(format!("{stem}.json"));

        let outcome = if reference_path.exists() {
            match load_reference(&reference_path) {
                Ok(reference) => verify_file(registry, backend, path, reference, config.max_file_size_bytes()).await,
                Err(e) => Err(ErrorRecord::invalid_input(e.to_string())),
            }
        } else {
            verify_file(registry, backend, path, None, config.max_file_size_bytes()).await
        };

        let item = match outcome {
            Ok(result) => BatchItemView {
                filename,
                job_id: None,
                state: JobState::Completed,
                result: Some(result),
                error: None,
            },
            Err(error) => BatchItemView {
                filename,
                job_id: None,
                state: JobState::Failed,
                result: None,
                error: Some(error),
            },
        };
        if args.verbose {
            let status = item
                .result
                .as_ref()
                .map_or_else(|| "ERROR".to_string(), |r| r.status.to_string());
            tracing::info!(index = index + 1, total, filename = %item.filename, status = %status, "label processed");
        }
        items.push(item);
    }

    let summary = BatchSummary::tally(&items);
    if args.verbose {
        tracing::info!(
            total = summary.total,
            compliant = summary.compliant,
            non_compliant = summary.non_compliant,
            partial = summary.partial,
            errors = summary.errors,
            seconds = summary.total_processing_time_seconds,
            "batch finished"
        );
    }

    let passed = summary.errors == 0 && summary.non_compliant == 0;
    let report = BatchReport { items, summary };
    write_output(args, &serde_json::to_string(&report).unwrap_or_default())?;
    Ok(if passed { EXIT_PASS } else { EXIT_ISSUES })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let outcome = async {
        let config = AppConfig::from_env()?;
        let registry = default_registry(&config);
        let backend = args.backend.unwrap_or(config.default_backend);
        match &args.batch {
            Some(dir) => run_batch(&args, dir, &config, &registry, backend).await,
            None => run_single(&args, &config, &registry, backend).await,
        }
    }
    .await;

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("label-verify: {e}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}
