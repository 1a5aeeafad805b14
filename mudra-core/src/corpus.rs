use crate::dataset::{BuildStats, Dataset, DatasetBuilder};
use crate::pipeline::HandDetector;
use anyhow::{Context, Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{Level, debug, info, span, warn};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One sub-directory per class, sorted by name.
pub fn class_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("reading {}", root.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn class_images(dir: &Path, max_per_class: Option<usize>) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            images.push(path);
        }
    }
    images.sort();

    if let Some(max) = max_per_class {
        images.truncate(max);
    }
    Ok(images)
}

fn class_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Runs every class image under `root` through `detector`. Every class
/// directory gets a label, even if none of its images yield a hand.
pub fn extract<D: HandDetector>(
    root: &Path,
    detector: &mut D,
    max_per_class: Option<usize>,
) -> Result<(Dataset, BuildStats)> {
    let classes = class_dirs(root)?;
    if classes.is_empty() {
        return Err(Error::msg(format!(
            "No class folders found in {}",
            root.display()
        )));
    }

    let names: Vec<String> = classes.iter().map(|c| class_name(c)).collect();
    info!("Found {} classes: {}", names.len(), names.join(", "));

    let mut builder = DatasetBuilder::new(detector, Dataset::new());
    for name in &names {
        builder.register_label(name);
    }

    for (idx, (dir, name)) in classes.iter().zip(names.iter()).enumerate() {
        let span = span!(Level::INFO, "class", name = name.as_str());
        let _guard = span.enter();

        let images = class_images(dir, max_per_class)?;
        let before = builder.stats();
        for path in &images {
            let img = match image::open(path) {
                Ok(img) => img.into_rgb8(),
                Err(e) => {
                    debug!("Skipping unreadable {}: {e}", path.display());
                    builder.skip();
                    continue;
                }
            };
            builder.ingest(&img, name)?;
        }

        let after = builder.stats();
        info!(
            "[{}/{}] {name}: {} of {} images had a hand",
            idx + 1,
            classes.len(),
            after.accepted - before.accepted,
            images.len()
        );
    }

    let (dataset, stats) = builder.finish();
    info!(
        "Extracted {} landmark samples ({} images skipped)",
        stats.accepted, stats.skipped
    );
    Ok((dataset, stats))
}

/// Fetches the corpus with the `kaggle` CLI when `root` does not exist yet.
/// Download problems are logged; callers check `root` afterwards.
pub fn ensure_dataset(root: &Path, slug: &str) -> Result<()> {
    if root.exists() {
        return Ok(());
    }

    let name = class_name(root);
    let download_dir = root.with_file_name(format!("{name}-download"));
    fs::create_dir_all(&download_dir)
        .with_context(|| format!("creating {}", download_dir.display()))?;

    info!("Dataset not found. Downloading '{slug}' via kaggle...");
    let status = Command::new("kaggle")
        .args(["datasets", "download", "-d", slug, "--unzip", "-p"])
        .arg(&download_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .status();

    match status {
        Ok(s) if s.success() => {}
        Ok(s) => {
            warn!("kaggle download exited with {s}");
            return Ok(());
        }
        Err(e) => {
            warn!("Could not run kaggle: {e}");
            return Ok(());
        }
    }

    let train_dir = locate_download(&download_dir, &name);
    info!("Moving {} to {}", train_dir.display(), root.display());
    fs::rename(&train_dir, root)
        .with_context(|| format!("moving {} to {}", train_dir.display(), root.display()))?;
    Ok(())
}

// archives nest the class folders zero, one or two levels deep
fn locate_download(download_dir: &Path, name: &str) -> PathBuf {
    let candidates = [
        download_dir.join(name).join(name),
        download_dir.join(name),
    ];
    candidates
        .into_iter()
        .find(|c| c.is_dir())
        .unwrap_or_else(|| download_dir.to_path_buf())
}
