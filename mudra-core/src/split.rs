use crate::dataset::Dataset;
use anyhow::{Error, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone)]
pub struct Split {
    pub train: Dataset,
    pub validation: Dataset,
}

/// Partitions `dataset` so each class contributes about `fraction` of its
/// samples to validation. Every class with at least two samples lands on both
/// sides.
pub fn stratified_split(dataset: &Dataset, fraction: f64, seed: u64) -> Result<Split> {
    if !(fraction > 0. && fraction < 1.) {
        return Err(Error::msg(format!(
            "validation fraction must be in (0, 1), got {fraction}"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); dataset.num_classes()];
    for (i, label) in dataset.labels().iter().enumerate() {
        by_class[*label as usize].push(i);
    }

    let mut train = Vec::new();
    let mut validation = Vec::new();
    for mut indices in by_class {
        let n = indices.len();
        if n == 0 {
            continue;
        }
        indices.shuffle(&mut rng);

        let n_val = if n < 2 {
            0
        } else {
            ((n as f64 * fraction).round() as usize).clamp(1, n - 1)
        };
        validation.extend_from_slice(&indices[..n_val]);
        train.extend_from_slice(&indices[n_val..]);
    }

    train.shuffle(&mut rng);
    validation.shuffle(&mut rng);

    Ok(Split {
        train: dataset.subset(&train),
        validation: dataset.subset(&validation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::NUM_FEATURES;

    fn dataset(counts: &[usize]) -> Dataset {
        let mut ds = Dataset::new();
        for (c, count) in counts.iter().enumerate() {
            for i in 0..*count {
                ds.push([(c * 1000 + i) as f32; NUM_FEATURES], &format!("class{c}"));
            }
        }
        ds
    }

    #[test]
    fn test_proportions_per_class() {
        let ds = dataset(&[100, 20, 8]);
        let split = stratified_split(&ds, 0.15, DEFAULT_SEED).unwrap();

        assert_eq!(split.validation.class_counts(), vec![15, 3, 1]);
        assert_eq!(split.train.class_counts(), vec![85, 17, 7]);
        assert_eq!(split.train.len() + split.validation.len(), ds.len());
    }

    #[test]
    fn test_no_sample_in_both_halves() {
        let ds = dataset(&[30, 30]);
        let split = stratified_split(&ds, 0.2, 7).unwrap();

        let train_keys: Vec<f32> = split.train.features().iter().map(|f| f[0]).collect();
        for f in split.validation.features() {
            assert!(!train_keys.contains(&f[0]));
        }
    }

    #[test]
    fn test_deterministic_for_seed() {
        let ds = dataset(&[40, 25]);
        let a = stratified_split(&ds, 0.15, 3).unwrap();
        let b = stratified_split(&ds, 0.15, 3).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.validation, b.validation);
    }

    #[test]
    fn test_single_sample_class_goes_to_train() {
        let ds = dataset(&[10, 1]);
        let split = stratified_split(&ds, 0.15, DEFAULT_SEED).unwrap();
        assert_eq!(split.validation.class_counts()[1], 0);
        assert_eq!(split.train.class_counts()[1], 1);
    }
}
