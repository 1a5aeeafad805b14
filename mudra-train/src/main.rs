#![warn(unused_extern_crates)]
use anyhow::{Context, Error, Result, bail};
use clap::Parser;
use mudra_core::classifier::{EpochMetrics, TrainConfig, Trainer, export_model};
use mudra_core::corpus::{ensure_dataset, extract};
use mudra_core::dataset::{Dataset, DatasetPaths};
use mudra_core::filter::filter_underrepresented;
use mudra_core::pipeline::HandPipeline;
use mudra_core::split::{DEFAULT_SEED, stratified_split};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Level, info, span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

const DATA_DIR: &str = "data/asl_alphabet_train";
const OUTPUT_DIR: &str = "public/models/sign_classifier";
const CACHE_DIR: &str = "cache";
const PALM_MODEL: &str = "models/palm_detection.onnx";
const HAND_MODEL: &str = "models/hand_landmark.onnx";
const KAGGLE_DATASET: &str = "grassknoted/asl-alphabet";
const BATCH: usize = 64;
const EPOCHS: usize = 25;
const VALIDATION: f64 = 0.15;
const MAX_SAMPLES_PER_CLASS: usize = 3000;
const MIN_DETECTION_CONFIDENCE: f32 = 0.5;
const HISTORY_FILE: &str = "history.json";

#[derive(Parser, Debug)]
#[command(version, about = "Train a sign classifier from a folder of labelled hand images", long_about = None)]
struct CmdArgs {
    /// Dataset root with one folder of images per sign
    #[arg(short, long, value_name = "DIR", default_value = DATA_DIR)]
    data_dir: PathBuf,

    /// Where the exported model is written
    #[arg(short, long, value_name = "DIR", default_value = OUTPUT_DIR)]
    output: PathBuf,

    /// Where extracted landmarks are cached between runs
    #[arg(long, value_name = "DIR", default_value = CACHE_DIR)]
    cache_dir: PathBuf,

    /// Ignore cached landmarks and re-run extraction
    #[arg(long)]
    refresh_cache: bool,

    /// Collected samples (landmarks.npy, labels.npy, label_map.json) to train on as well
    #[arg(long, value_name = "DIR")]
    custom_dir: Option<PathBuf>,

    /// Palm detection ONNX model
    #[arg(long, value_name = "FILE", default_value = PALM_MODEL)]
    palm_model: PathBuf,

    /// Hand landmark ONNX model
    #[arg(long, value_name = "FILE", default_value = HAND_MODEL)]
    hand_model: PathBuf,

    /// Minimum palm detection score
    #[arg(long, default_value_t = MIN_DETECTION_CONFIDENCE)]
    min_confidence: f32,

    /// Images read per class
    #[arg(long, default_value_t = MAX_SAMPLES_PER_CLASS)]
    max_per_class: usize,

    /// Kaggle dataset fetched when the dataset root is missing
    #[arg(long, default_value = KAGGLE_DATASET)]
    kaggle_dataset: String,

    #[arg(short, long, default_value_t = BATCH)]
    batch_size: usize,

    #[arg(short, long, default_value_t = EPOCHS)]
    epochs: usize,

    /// Share of each class held out for validation
    #[arg(long, default_value_t = VALIDATION)]
    validation: f64,

    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let args = CmdArgs::parse();
    let start = Instant::now();

    let mut dataset = load_landmarks(&args)?;
    if let Some(dir) = &args.custom_dir {
        merge_custom(&mut dataset, dir)?;
    }
    if dataset.is_empty() {
        bail!("No hands were found in {}", args.data_dir.display());
    }

    for (name, count) in dataset.label_map().names().iter().zip(dataset.class_counts()) {
        info!("  {name}: {count}");
    }

    let filtered = filter_underrepresented(&dataset, args.validation)?;
    let dataset = filtered.dataset;
    if dataset.num_classes() == 0 {
        bail!(
            "Every class has fewer than {} samples; nothing to train on",
            filtered.min_samples
        );
    }
    if !filtered.dropped.is_empty() {
        warn!(
            "Training without {} of {} classes",
            filtered.dropped.len(),
            filtered.dropped.len() + dataset.num_classes()
        );
    }

    let split = stratified_split(&dataset, args.validation, args.seed)?;
    info!(
        "Split into {} training and {} validation samples",
        split.train.len(),
        split.validation.len()
    );

    let trainer = Trainer::new(TrainConfig {
        epochs: args.epochs,
        batch_size: args.batch_size,
        seed: args.seed,
        ..TrainConfig::default()
    });
    let outcome = trainer.fit(&split.train, &split.validation)?;
    info!(
        "Validation loss {:.4}, accuracy {:.2}%",
        outcome.val_loss,
        outcome.val_accuracy * 100.
    );

    let labels = dataset.label_map().names().to_vec();
    let summary = export_model(&outcome.model, &labels, &args.output)?;
    write_history(&outcome.history, &args.output.join(HISTORY_FILE))?;

    info!(
        "Exported {} classes to {} ({} files, {:.1} KiB) in {:.1}s",
        labels.len(),
        args.output.display(),
        summary.files.len() + 1,
        summary.total_bytes as f64 / 1024.,
        start.elapsed().as_secs_f32()
    );
    Ok(())
}

/// Cached landmarks when present, otherwise a fresh pass over the image corpus.
fn load_landmarks(args: &CmdArgs) -> Result<Dataset> {
    let cache = DatasetPaths::in_dir(&args.cache_dir);
    if cache.exists() && !args.refresh_cache {
        let dataset = Dataset::load(&cache)?;
        info!(
            "Loaded {} cached samples from {}",
            dataset.len(),
            args.cache_dir.display()
        );
        return Ok(dataset);
    }

    ensure_dataset(&args.data_dir, &args.kaggle_dataset)?;
    if !args.data_dir.exists() {
        return Err(Error::msg(format!(
            "Dataset not found at {}. Download '{}' from Kaggle and extract it there",
            args.data_dir.display(),
            args.kaggle_dataset
        )));
    }

    let span = span!(Level::INFO, "extract_landmarks");
    let _guard = span.enter();

    let mut detector = HandPipeline::new(
        &args.palm_model,
        &args.hand_model,
        num_cpus::get(),
        args.min_confidence,
    )?;
    let (dataset, _) = extract(&args.data_dir, &mut detector, Some(args.max_per_class))?;
    dataset.save(&cache)?;
    Ok(dataset)
}

fn merge_custom(dataset: &mut Dataset, dir: &Path) -> Result<()> {
    let paths = DatasetPaths::in_dir(dir);
    if !paths.exists() {
        warn!("No collected samples in {}", dir.display());
        return Ok(());
    }

    let custom = Dataset::load(&paths)?;
    info!(
        "Adding {} collected samples across {} signs from {}",
        custom.len(),
        custom.num_classes(),
        dir.display()
    );
    dataset.extend_from(&custom);
    Ok(())
}

fn write_history(history: &[EpochMetrics], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(history)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
