use super::mlp::{Activation, DEFAULT_HIDDEN, HiddenLayer, Layer, Mlp, argmax};
use crate::dataset::Dataset;
use anyhow::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{Level, debug, info, span};

const EPSILON: f32 = 1e-7;
const BETA_1: f32 = 0.9;
const BETA_2: f32 = 0.999;
const LR_MIN_DELTA: f32 = 1e-4;

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub hidden: Vec<HiddenLayer>,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub early_stopping_patience: usize,
    pub lr_patience: usize,
    pub lr_factor: f32,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            hidden: DEFAULT_HIDDEN.to_vec(),
            epochs: 25,
            batch_size: 64,
            learning_rate: 0.001,
            early_stopping_patience: 5,
            lr_patience: 3,
            lr_factor: 0.5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
    pub learning_rate: f32,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub model: Mlp,
    pub history: Vec<EpochMetrics>,
    pub val_loss: f32,
    pub val_accuracy: f32,
}

struct Moments {
    m_w: Array2<f32>,
    v_w: Array2<f32>,
    m_b: Array1<f32>,
    v_b: Array1<f32>,
}

struct Adam {
    lr: f32,
    step: i32,
    moments: Vec<Option<Moments>>,
}

impl Adam {
    fn new(mlp: &Mlp, lr: f32) -> Self {
        let moments = mlp
            .layers
            .iter()
            .map(|l| match l {
                Layer::Dense(d) => Some(Moments {
                    m_w: Array2::zeros(d.weights.raw_dim()),
                    v_w: Array2::zeros(d.weights.raw_dim()),
                    m_b: Array1::zeros(d.bias.raw_dim()),
                    v_b: Array1::zeros(d.bias.raw_dim()),
                }),
                Layer::Dropout(_) => None,
            })
            .collect();

        Self {
            lr,
            step: 0,
            moments,
        }
    }

    fn apply(&mut self, mlp: &mut Mlp, grads: &[Option<(Array2<f32>, Array1<f32>)>]) {
        self.step += 1;
        let lr_t = self.lr * (1. - BETA_2.powi(self.step)).sqrt() / (1. - BETA_1.powi(self.step));

        for ((layer, moments), grad) in mlp
            .layers
            .iter_mut()
            .zip(self.moments.iter_mut())
            .zip(grads.iter())
        {
            if let (Layer::Dense(d), Some(m), Some((g_w, g_b))) = (layer, moments, grad) {
                Zip::from(&mut d.weights)
                    .and(&mut m.m_w)
                    .and(&mut m.v_w)
                    .and(g_w)
                    .for_each(|w, m, v, g| adam_update(w, m, v, *g, lr_t));
                Zip::from(&mut d.bias)
                    .and(&mut m.m_b)
                    .and(&mut m.v_b)
                    .and(g_b)
                    .for_each(|w, m, v, g| adam_update(w, m, v, *g, lr_t));
            }
        }
    }
}

fn adam_update(w: &mut f32, m: &mut f32, v: &mut f32, g: f32, lr_t: f32) {
    *m = BETA_1 * *m + (1. - BETA_1) * g;
    *v = BETA_2 * *v + (1. - BETA_2) * g * g;
    *w -= lr_t * *m / (v.sqrt() + EPSILON);
}

pub fn one_hot(labels: &[u32], classes: usize) -> Array2<f32> {
    let mut out = Array2::zeros((labels.len(), classes));
    for (i, l) in labels.iter().enumerate() {
        out[[i, *l as usize]] = 1.;
    }
    out
}

/// Mean categorical cross-entropy and accuracy of `probs` against one-hot
/// `targets`.
pub fn evaluate_probs(probs: ArrayView2<f32>, targets: ArrayView2<f32>) -> (f32, f32) {
    let n = probs.nrows();
    if n == 0 {
        return (0., 0.);
    }

    let mut loss = 0f32;
    let mut correct = 0usize;
    for (p, t) in probs.rows().into_iter().zip(targets.rows()) {
        loss -= Zip::from(&p)
            .and(&t)
            .fold(0f32, |acc, p, t| acc + t * p.max(EPSILON).ln());
        if argmax(p).map(|(i, _)| i) == argmax(t).map(|(i, _)| i) {
            correct += 1;
        }
    }

    (loss / n as f32, correct as f32 / n as f32)
}

/// One forward/backward pass over a mini-batch. Returns the batch loss and
/// the per-layer weight and bias gradients.
fn backprop<R: Rng>(
    mlp: &Mlp,
    x: ArrayView2<f32>,
    y: ArrayView2<f32>,
    rng: &mut R,
) -> (f32, Vec<Option<(Array2<f32>, Array1<f32>)>>) {
    let batch = x.nrows() as f32;
    let mut outputs: Vec<Array2<f32>> = Vec::with_capacity(mlp.layers.len());
    let mut masks: Vec<Option<Array2<f32>>> = Vec::with_capacity(mlp.layers.len());

    for layer in &mlp.layers {
        let input = outputs.last().map(|a| a.view()).unwrap_or(x.view());
        let (output, mask) = match layer {
            Layer::Dense(d) => (d.forward(input), None),
            Layer::Dropout(rate) => {
                let keep = 1. - rate;
                let mask = Array2::from_shape_fn(input.raw_dim(), |_| {
                    if rng.gen_range(0f32..1.) < keep {
                        1. / keep
                    } else {
                        0.
                    }
                });
                (&input * &mask, Some(mask))
            }
        };
        outputs.push(output);
        masks.push(mask);
    }

    let probs = outputs.last().map(|a| a.view()).unwrap_or(x.view());
    let (loss, _) = evaluate_probs(probs, y);

    // softmax + cross-entropy: gradient w.r.t. the logits
    let mut grad = (&probs - &y) / batch;
    let mut grads = vec![None; mlp.layers.len()];

    for (i, layer) in mlp.layers.iter().enumerate().rev() {
        let input = if i == 0 { x.view() } else { outputs[i - 1].view() };
        match layer {
            Layer::Dense(d) => {
                let dz = match d.activation {
                    Activation::Relu => {
                        let active = outputs[i].mapv(|v| if v > 0. { 1. } else { 0. });
                        grad * active
                    }
                    Activation::Softmax | Activation::Linear => grad,
                };
                grads[i] = Some((input.t().dot(&dz), dz.sum_axis(Axis(0))));
                grad = dz.dot(&d.weights.t());
            }
            Layer::Dropout(_) => {
                if let Some(mask) = &masks[i] {
                    grad = grad * mask;
                }
            }
        }
    }

    (loss, grads)
}

pub struct Trainer {
    config: TrainConfig,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn fit(&self, train: &Dataset, validation: &Dataset) -> Result<TrainOutcome> {
        let span = span!(Level::INFO, "fit");
        let _guard = span.enter();

        let cfg = &self.config;
        let classes = train.num_classes();
        if train.is_empty() || classes == 0 {
            return Err(Error::msg("no training samples"));
        }
        if cfg.batch_size == 0 {
            return Err(Error::msg("batch size must be positive"));
        }

        let x_train = train.features_array();
        let y_train = one_hot(train.labels(), classes);
        let x_val = validation.features_array();
        let y_val = one_hot(validation.labels(), classes);

        info!(
            "Training on {} samples ({} validation), {} features, {} classes",
            x_train.nrows(),
            x_val.nrows(),
            x_train.ncols(),
            classes
        );

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut model = Mlp::new(x_train.ncols(), &cfg.hidden, classes, &mut rng);
        let mut adam = Adam::new(&model, cfg.learning_rate);

        let mut history = Vec::new();
        let mut best: Option<(f32, Mlp)> = None;
        let mut stop_wait = 0;
        let mut lr_best = f32::INFINITY;
        let mut lr_wait = 0;
        let mut order: Vec<usize> = (0..x_train.nrows()).collect();

        for epoch in 1..=cfg.epochs {
            order.shuffle(&mut rng);

            let mut loss_sum = 0f32;
            for chunk in order.chunks(cfg.batch_size) {
                let xb = x_train.select(Axis(0), chunk);
                let yb = y_train.select(Axis(0), chunk);
                let (loss, grads) = backprop(&model, xb.view(), yb.view(), &mut rng);
                adam.apply(&mut model, &grads);
                loss_sum += loss * chunk.len() as f32;
            }

            let (_, accuracy) = evaluate_probs(model.predict(x_train.view()).view(), y_train.view());
            let (val_loss, val_accuracy) = if x_val.nrows() > 0 {
                evaluate_probs(model.predict(x_val.view()).view(), y_val.view())
            } else {
                (loss_sum / x_train.nrows() as f32, accuracy)
            };

            let metrics = EpochMetrics {
                epoch,
                loss: loss_sum / x_train.nrows() as f32,
                accuracy,
                val_loss,
                val_accuracy,
                learning_rate: adam.lr,
            };
            info!(
                "Epoch {epoch}/{}: loss {:.4} acc {:.4} val_loss {:.4} val_acc {:.4}",
                cfg.epochs, metrics.loss, metrics.accuracy, val_loss, val_accuracy
            );
            history.push(metrics);

            let improved = best.as_ref().is_none_or(|(best_loss, _)| val_loss < *best_loss);
            if improved {
                best = Some((val_loss, model.clone()));
                stop_wait = 0;
            } else {
                stop_wait += 1;
            }
            if stop_wait >= cfg.early_stopping_patience {
                info!("Early stopping after epoch {epoch}");
                break;
            }

            if val_loss < lr_best - LR_MIN_DELTA {
                lr_best = val_loss;
                lr_wait = 0;
            } else {
                lr_wait += 1;
                if lr_wait >= cfg.lr_patience {
                    adam.lr *= cfg.lr_factor;
                    lr_wait = 0;
                    debug!("Reducing learning rate to {}", adam.lr);
                }
            }
        }

        if let Some((_, best_model)) = best {
            model = best_model;
        }

        let (val_loss, val_accuracy) = if x_val.nrows() > 0 {
            evaluate_probs(model.predict(x_val.view()).view(), y_val.view())
        } else {
            (f32::NAN, f32::NAN)
        };
        info!("Validation accuracy: {val_accuracy:.4}");
        info!("Validation loss: {val_loss:.4}");

        Ok(TrainOutcome {
            model,
            history,
            val_loss,
            val_accuracy,
        })
    }
}
