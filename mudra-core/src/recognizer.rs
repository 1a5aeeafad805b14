use crate::classifier::{Mlp, load_model};
use crate::landmarks::{Hand, NUM_FEATURES, normalize};
use crate::smoothing::LandmarkSmoother;
use anyhow::{Error, Result};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::trace;

pub const CONFIDENCE_THRESHOLD: f32 = 0.35;
pub const COOLDOWN: Duration = Duration::from_millis(1200);

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedSign {
    pub label: String,
    pub confidence: f32,
    pub at: Instant,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recognition {
    pub hand_detected: bool,
    pub best: Option<(String, f32)>,
    pub sign: Option<DetectedSign>,
}

/// Live sign recognition: smooths incoming hands, normalizes them the same
/// way training data was, and reports a sign once it clears the confidence
/// threshold and is not a repeat inside the cooldown window.
pub struct Recognizer {
    smoother: LandmarkSmoother,
    model: Mlp,
    labels: Vec<String>,
    threshold: f32,
    cooldown: Duration,
    last: Option<(usize, Instant)>,
}

impl Recognizer {
    pub fn new(model: Mlp, labels: Vec<String>) -> Result<Self> {
        if model.input_dim() != NUM_FEATURES {
            return Err(Error::msg(format!(
                "model expects {} features, landmarks give {NUM_FEATURES}",
                model.input_dim()
            )));
        }
        if labels.len() != model.num_classes() {
            return Err(Error::msg(format!(
                "{} labels for {} classes",
                labels.len(),
                model.num_classes()
            )));
        }

        Ok(Self {
            smoother: LandmarkSmoother::default(),
            model,
            labels,
            threshold: CONFIDENCE_THRESHOLD,
            cooldown: COOLDOWN,
            last: None,
        })
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let (model, labels) = load_model(dir)?;
        Self::new(model, labels)
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn recognize(&mut self, hand: Option<&Hand>, now: Instant) -> Result<Recognition> {
        let hand = match hand {
            Some(h) => h,
            None => return Ok(Recognition::default()),
        };

        let smoothed = self.smoother.smooth(&hand.landmarks);
        let (idx, confidence) = self.model.classify(&normalize(&smoothed))?;
        let label = self.labels[idx].clone();
        trace!("Best candidate {label} ({confidence:.2})");

        let mut result = Recognition {
            hand_detected: true,
            best: Some((label.clone(), confidence)),
            sign: None,
        };

        if confidence < self.threshold {
            return Ok(result);
        }
        if let Some((last_idx, last_at)) = self.last {
            if last_idx == idx && now.saturating_duration_since(last_at) < self.cooldown {
                return Ok(result);
            }
        }

        self.last = Some((idx, now));
        result.sign = Some(DetectedSign {
            label,
            confidence,
            at: now,
        });
        Ok(result)
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Activation, Dense, Layer};
    use crate::landmarks::tests::sample_landmarks;
    use ndarray::{Array1, Array2};

    // single softmax layer with zero weights: output follows the bias alone
    fn biased_model(bias: Vec<f32>) -> Mlp {
        let units = bias.len();
        Mlp::from_layers(vec![Layer::Dense(Dense {
            weights: Array2::zeros((NUM_FEATURES, units)),
            bias: Array1::from(bias),
            activation: Activation::Softmax,
        })])
        .unwrap()
    }

    fn hand() -> Hand {
        Hand::new(sample_landmarks(0.), 0.9)
    }

    #[test]
    fn test_no_hand() {
        let mut r = Recognizer::new(biased_model(vec![5., 0.]), vec!["a".into(), "b".into()]).unwrap();
        let out = r.recognize(None, Instant::now()).unwrap();
        assert!(!out.hand_detected);
        assert!(out.sign.is_none());
    }

    #[test]
    fn test_below_threshold_reports_candidate_only() {
        // four equal classes: 0.25 each
        let mut r = Recognizer::new(
            biased_model(vec![0.; 4]),
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
        )
        .unwrap();
        let out = r.recognize(Some(&hand()), Instant::now()).unwrap();
        assert!(out.hand_detected);
        assert!(out.sign.is_none());
        let (_, conf) = out.best.unwrap();
        assert!((conf - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_cooldown_suppresses_repeats() {
        let mut r = Recognizer::new(biased_model(vec![5., 0.]), vec!["a".into(), "b".into()]).unwrap();
        let t0 = Instant::now();

        let first = r.recognize(Some(&hand()), t0).unwrap();
        assert_eq!(first.sign.unwrap().label, "a");

        let repeat = r
            .recognize(Some(&hand()), t0 + Duration::from_millis(500))
            .unwrap();
        assert!(repeat.sign.is_none());
        assert_eq!(repeat.best.unwrap().0, "a");

        let later = r
            .recognize(Some(&hand()), t0 + Duration::from_millis(1300))
            .unwrap();
        assert!(later.sign.is_some());
    }

    #[test]
    fn test_rejects_mismatched_labels() {
        assert!(Recognizer::new(biased_model(vec![0.; 3]), vec!["a".into()]).is_err());
    }
}
