use crate::dataset::Dataset;
use crate::labels::LabelMap;
use anyhow::{Error, Result};
use tracing::{info, warn};

const MIN_SAMPLES_FLOOR: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedClass {
    pub index: u32,
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub dataset: Dataset,
    pub dropped: Vec<DroppedClass>,
    pub min_samples: usize,
}

/// Fewest samples a class needs to survive a stratified split at
/// `validation_fraction`: `ceil(1 / fraction) + 1`, never below 5.
pub fn min_samples_for_split(validation_fraction: f64) -> Result<usize> {
    if !(validation_fraction > 0. && validation_fraction < 1.) {
        return Err(Error::msg(format!(
            "validation fraction must be in (0, 1), got {validation_fraction}"
        )));
    }

    // the cast saturates for tiny fractions
    let min_for_split = ((1. / validation_fraction).ceil() as usize).saturating_add(1);
    Ok(min_for_split.max(MIN_SAMPLES_FLOOR))
}

/// Drops every class with fewer than [`min_samples_for_split`] samples and
/// renumbers the rest to `0..remaining`, keeping their relative order.
pub fn filter_underrepresented(dataset: &Dataset, validation_fraction: f64) -> Result<FilterOutcome> {
    let min_samples = min_samples_for_split(validation_fraction)?;
    let counts = dataset.class_counts();
    let names = dataset.label_map().names();

    let mut remap: Vec<Option<u32>> = vec![None; counts.len()];
    let mut kept = LabelMap::new();
    let mut dropped = Vec::new();

    for (idx, count) in counts.iter().enumerate() {
        if *count >= min_samples {
            remap[idx] = Some(kept.get_or_insert(&names[idx]));
        } else {
            dropped.push(DroppedClass {
                index: idx as u32,
                name: names[idx].clone(),
                count: *count,
            });
        }
    }

    if !dropped.is_empty() {
        warn!(
            "Removing {} class(es) with < {min_samples} samples:",
            dropped.len()
        );
        for d in &dropped {
            warn!("  - '{}' -> {} sample(s)", d.name, d.count);
        }
    }

    let mut out = Dataset::with_label_map(kept);
    for (features, label) in dataset.features().iter().zip(dataset.labels().iter()) {
        if let Some(new_label) = remap[*label as usize] {
            out.push_indexed(*features, new_label)?;
        }
    }

    if !dropped.is_empty() {
        info!(
            "Remaining: {} classes, {} samples",
            out.num_classes(),
            out.len()
        );
    }

    Ok(FilterOutcome {
        dataset: out,
        dropped,
        min_samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::NUM_FEATURES;

    fn dataset_with_counts(counts: &[(&str, usize)]) -> Dataset {
        let mut ds = Dataset::new();
        for (name, count) in counts {
            ds.label_map_mut().get_or_insert(name);
            for i in 0..*count {
                ds.push([i as f32; NUM_FEATURES], name);
            }
        }
        ds
    }

    #[test]
    fn test_min_samples() {
        assert_eq!(min_samples_for_split(0.15).unwrap(), 8);
        assert_eq!(min_samples_for_split(0.5).unwrap(), 5);
        assert_eq!(min_samples_for_split(0.1).unwrap(), 11);
        assert!(min_samples_for_split(0.).is_err());
        assert!(min_samples_for_split(1.).is_err());
    }

    #[test]
    fn test_tiny_fraction_saturates() {
        assert_eq!(min_samples_for_split(1e-20).unwrap(), usize::MAX);

        let ds = dataset_with_counts(&[("a", 10), ("b", 3)]);
        let outcome = filter_underrepresented(&ds, 1e-20).unwrap();
        assert_eq!(outcome.dropped.len(), 2);
        assert!(outcome.dataset.is_empty());
        assert_eq!(outcome.dataset.num_classes(), 0);
    }

    #[test]
    fn test_threshold_boundary() {
        let ds = dataset_with_counts(&[("short", 7), ("exact", 8)]);
        let outcome = filter_underrepresented(&ds, 0.15).unwrap();

        assert_eq!(outcome.min_samples, 8);
        assert_eq!(
            outcome.dropped,
            vec![DroppedClass {
                index: 0,
                name: "short".into(),
                count: 7
            }]
        );
        assert_eq!(outcome.dataset.label_map().names(), &["exact"]);
        assert_eq!(outcome.dataset.len(), 8);
    }

    #[test]
    fn test_remapped_labels_are_contiguous() {
        let ds = dataset_with_counts(&[("a", 10), ("b", 2), ("c", 9), ("d", 0), ("e", 12)]);
        let outcome = filter_underrepresented(&ds, 0.15).unwrap();
        let out = &outcome.dataset;

        assert_eq!(out.label_map().names(), &["a", "c", "e"]);
        assert_eq!(out.class_counts(), vec![10, 9, 12]);

        let mut seen: Vec<u32> = out.labels().to_vec();
        seen.sort();
        seen.dedup();
        assert_eq!(seen, vec![0, 1, 2]);

        let dropped: Vec<&str> = outcome.dropped.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(dropped, vec!["b", "d"]);
    }

    #[test]
    fn test_nothing_dropped_keeps_labels() {
        let ds = dataset_with_counts(&[("a", 8), ("b", 9)]);
        let outcome = filter_underrepresented(&ds, 0.15).unwrap();
        assert!(outcome.dropped.is_empty());
        assert_eq!(outcome.dataset, ds);
    }
}
