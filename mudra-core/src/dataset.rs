use crate::labels::LabelMap;
use crate::landmarks::{FeatureVector, NUM_FEATURES};
use crate::pipeline::HandDetector;
use anyhow::{Context, Error, Result};
use image::RgbImage;
use ndarray::{Array1, Array2};
use ndarray_npy::{read_npy, write_npy};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FEATURES_FILE: &str = "landmarks.npy";
const LABELS_FILE: &str = "labels.npy";
const LABEL_MAP_FILE: &str = "label_map.json";

/// The three artifacts that together make up a stored dataset.
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    pub features: PathBuf,
    pub labels: PathBuf,
    pub label_map: PathBuf,
}

impl DatasetPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            features: dir.join(FEATURES_FILE),
            labels: dir.join(LABELS_FILE),
            label_map: dir.join(LABEL_MAP_FILE),
        }
    }

    pub fn exists(&self) -> bool {
        self.features.exists() && self.labels.exists() && self.label_map.exists()
    }
}

/// Parallel feature/label arrays plus the label map. Samples are only ever
/// appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    features: Vec<FeatureVector>,
    labels: Vec<u32>,
    label_map: LabelMap,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label_map(label_map: LabelMap) -> Self {
        Self {
            label_map,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[FeatureVector] {
        &self.features
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn label_map(&self) -> &LabelMap {
        &self.label_map
    }

    pub fn label_map_mut(&mut self) -> &mut LabelMap {
        &mut self.label_map
    }

    pub fn num_classes(&self) -> usize {
        self.label_map.len()
    }

    pub fn push(&mut self, features: FeatureVector, label: &str) -> u32 {
        let idx = self.label_map.get_or_insert(label);
        self.features.push(features);
        self.labels.push(idx);
        idx
    }

    pub fn push_indexed(&mut self, features: FeatureVector, label: u32) -> Result<()> {
        if label as usize >= self.label_map.len() {
            return Err(Error::msg(format!(
                "label index {label} outside 0..{}",
                self.label_map.len()
            )));
        }
        self.features.push(features);
        self.labels.push(label);
        Ok(())
    }

    /// Appends every sample of `other`, matching labels by name.
    pub fn extend_from(&mut self, other: &Dataset) {
        let remap: Vec<u32> = other
            .label_map
            .names()
            .iter()
            .map(|name| self.label_map.get_or_insert(name))
            .collect();

        for (f, l) in other.features.iter().zip(other.labels.iter()) {
            self.features.push(*f);
            self.labels.push(remap[*l as usize]);
        }
    }

    /// Samples at `indices`, keeping the label map as is.
    pub fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            features: indices.iter().map(|i| self.features[*i]).collect(),
            labels: indices.iter().map(|i| self.labels[*i]).collect(),
            label_map: self.label_map.clone(),
        }
    }

    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.label_map.len()];
        for l in &self.labels {
            counts[*l as usize] += 1;
        }
        counts
    }

    pub fn features_array(&self) -> Array2<f32> {
        let mut arr = Array2::zeros((self.features.len(), NUM_FEATURES));
        for (mut row, f) in arr.rows_mut().into_iter().zip(self.features.iter()) {
            row.assign(&ndarray::ArrayView1::from(&f[..]));
        }
        arr
    }

    pub fn labels_array(&self) -> Array1<i32> {
        self.labels.iter().map(|l| *l as i32).collect()
    }

    /// Rewrites all three artifacts. An empty dataset leaves disk untouched.
    pub fn save(&self, paths: &DatasetPaths) -> Result<()> {
        if self.is_empty() {
            debug!("No samples to save");
            return Ok(());
        }

        if let Some(dir) = paths.features.parent() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }

        let features_tmp = tmp_path(&paths.features);
        let labels_tmp = tmp_path(&paths.labels);
        let label_map_tmp = tmp_path(&paths.label_map);

        write_npy(&features_tmp, &self.features_array())
            .with_context(|| format!("writing {}", features_tmp.display()))?;
        write_npy(&labels_tmp, &self.labels_array())
            .with_context(|| format!("writing {}", labels_tmp.display()))?;
        self.label_map.save(&label_map_tmp)?;

        fs::rename(&features_tmp, &paths.features)?;
        fs::rename(&labels_tmp, &paths.labels)?;
        fs::rename(&label_map_tmp, &paths.label_map)?;

        info!(
            "Saved {} samples across {} signs to {}",
            self.len(),
            self.num_classes(),
            paths.features.display()
        );
        Ok(())
    }

    pub fn load(paths: &DatasetPaths) -> Result<Self> {
        let features: Array2<f32> = read_npy(&paths.features)
            .with_context(|| format!("reading {}", paths.features.display()))?;
        let labels: Array1<i32> = read_npy(&paths.labels)
            .with_context(|| format!("reading {}", paths.labels.display()))?;
        let label_map = LabelMap::load(&paths.label_map)?;

        if features.ncols() != NUM_FEATURES {
            return Err(Error::msg(format!(
                "{} has {} columns, expected {NUM_FEATURES}",
                paths.features.display(),
                features.ncols()
            )));
        }
        if features.nrows() != labels.len() {
            return Err(Error::msg(format!(
                "{} rows of features but {} labels",
                features.nrows(),
                labels.len()
            )));
        }

        let mut dataset = Dataset::with_label_map(label_map);
        for (row, label) in features.rows().into_iter().zip(labels.iter()) {
            let label = u32::try_from(*label)
                .map_err(|_| Error::msg(format!("negative label index {label}")))?;
            let mut f = [0f32; NUM_FEATURES];
            for (dst, src) in f.iter_mut().zip(row.iter()) {
                *dst = *src;
            }
            dataset.push_indexed(f, label)?;
        }

        Ok(dataset)
    }

    pub fn load_or_default(paths: &DatasetPaths) -> Result<Self> {
        if paths.features.exists() {
            Self::load(paths)
        } else {
            Ok(Self::new())
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub accepted: usize,
    pub skipped: usize,
}

/// Feeds images through a detector, keeping a sample for every image with a
/// hand in it.
pub struct DatasetBuilder<'a, D: HandDetector> {
    detector: &'a mut D,
    dataset: Dataset,
    stats: BuildStats,
}

impl<'a, D: HandDetector> DatasetBuilder<'a, D> {
    pub fn new(detector: &'a mut D, dataset: Dataset) -> Self {
        Self {
            detector,
            dataset,
            stats: BuildStats::default(),
        }
    }

    pub fn ingest(&mut self, img: &RgbImage, label: &str) -> Result<bool> {
        match self.detector.detect(img)? {
            Some(hand) => {
                self.dataset.push(hand.features(), label);
                self.stats.accepted += 1;
                Ok(true)
            }
            None => {
                self.stats.skipped += 1;
                Ok(false)
            }
        }
    }

    pub fn skip(&mut self) {
        self.stats.skipped += 1;
    }

    pub fn register_label(&mut self, label: &str) -> u32 {
        self.dataset.label_map_mut().get_or_insert(label)
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    pub fn finish(self) -> (Dataset, BuildStats) {
        (self.dataset, self.stats)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::landmarks::tests::sample_landmarks;
    use crate::landmarks::{Hand, normalize};

    pub(crate) fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mudra-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    struct EveryOther {
        calls: usize,
    }

    impl HandDetector for EveryOther {
        fn detect(&mut self, _img: &RgbImage) -> Result<Option<Hand>> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                Ok(None)
            } else {
                Ok(Some(Hand::new(sample_landmarks(self.calls as f32), 0.9)))
            }
        }
    }

    #[test]
    fn test_push_registers_labels() {
        let mut ds = Dataset::new();
        assert_eq!(ds.push(normalize(&sample_landmarks(0.)), "A"), 0);
        assert_eq!(ds.push(normalize(&sample_landmarks(1.)), "B"), 1);
        assert_eq!(ds.push(normalize(&sample_landmarks(2.)), "A"), 0);

        assert_eq!(ds.len(), 3);
        assert_eq!(ds.labels(), &[0, 1, 0]);
        assert_eq!(ds.class_counts(), vec![2, 1]);
        assert!(ds.push_indexed([0.; NUM_FEATURES], 5).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = temp_dir("save-load");
        let paths = DatasetPaths::in_dir(&dir);

        let mut ds = Dataset::new();
        ds.push(normalize(&sample_landmarks(0.)), "hello");
        ds.push(normalize(&sample_landmarks(1.)), "bye");
        ds.save(&paths).unwrap();

        assert!(paths.exists());
        let loaded = Dataset::load(&paths).unwrap();
        assert_eq!(loaded, ds);
        assert_eq!(loaded.features_array().shape(), &[2, NUM_FEATURES]);
    }

    #[test]
    fn test_append_only_saves() {
        let dir = temp_dir("append-only");
        let paths = DatasetPaths::in_dir(&dir);

        let mut ds = Dataset::new();
        for i in 0..4 {
            ds.push(normalize(&sample_landmarks(i as f32)), "A");
        }
        ds.save(&paths).unwrap();
        let first = Dataset::load(&paths).unwrap();

        let mut ds = first.clone();
        ds.push(normalize(&sample_landmarks(9.)), "B");
        ds.save(&paths).unwrap();
        let second = Dataset::load(&paths).unwrap();

        assert_eq!(second.len(), first.len() + 1);
        assert_eq!(&second.features()[..first.len()], first.features());
        assert_eq!(&second.labels()[..first.len()], first.labels());
    }

    #[test]
    fn test_empty_dataset_is_not_written() {
        let dir = temp_dir("empty");
        let paths = DatasetPaths::in_dir(&dir);
        Dataset::new().save(&paths).unwrap();
        assert!(!paths.features.exists());
        assert_eq!(Dataset::load_or_default(&paths).unwrap(), Dataset::new());
    }

    #[test]
    fn test_load_rejects_mismatched_lengths() {
        let dir = temp_dir("mismatch");
        let paths = DatasetPaths::in_dir(&dir);

        let mut ds = Dataset::new();
        ds.push(normalize(&sample_landmarks(0.)), "A");
        ds.push(normalize(&sample_landmarks(1.)), "A");
        ds.save(&paths).unwrap();

        write_npy(&paths.labels, &Array1::<i32>::from(vec![0])).unwrap();
        assert!(Dataset::load(&paths).is_err());

        write_npy(&paths.labels, &Array1::<i32>::from(vec![0, 3])).unwrap();
        assert!(Dataset::load(&paths).is_err());
    }

    #[test]
    fn test_extend_from_remaps_by_name() {
        let mut a = Dataset::new();
        a.push(normalize(&sample_landmarks(0.)), "x");
        a.push(normalize(&sample_landmarks(1.)), "y");

        let mut b = Dataset::new();
        b.push(normalize(&sample_landmarks(2.)), "y");
        b.push(normalize(&sample_landmarks(3.)), "z");

        a.extend_from(&b);
        assert_eq!(a.labels(), &[0, 1, 1, 2]);
        assert_eq!(a.label_map().names(), &["x", "y", "z"]);
    }

    #[test]
    fn test_builder_counts_skips() {
        let mut detector = EveryOther { calls: 0 };
        let mut builder = DatasetBuilder::new(&mut detector, Dataset::new());
        let img = RgbImage::new(4, 4);

        for _ in 0..5 {
            builder.ingest(&img, "A").unwrap();
        }
        builder.skip();

        let (ds, stats) = builder.finish();
        assert_eq!(stats, BuildStats { accepted: 3, skipped: 3 });
        assert_eq!(ds.len(), 3);
    }
}
