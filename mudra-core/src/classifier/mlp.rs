use anyhow::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Softmax,
    Linear,
}

impl Activation {
    pub fn apply(&self, mut z: Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Relu => z.mapv_inplace(|v| v.max(0.)),
            Activation::Softmax => {
                for mut row in z.rows_mut() {
                    let max = row.fold(f32::NEG_INFINITY, |m, v| m.max(*v));
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|v| v / sum);
                }
            }
            Activation::Linear => {}
        }
        z
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    pub weights: Array2<f32>, // inputs x units
    pub bias: Array1<f32>,
    pub activation: Activation,
}

impl Dense {
    /// Glorot-uniform weights, zero bias.
    pub fn glorot<R: Rng>(inputs: usize, units: usize, activation: Activation, rng: &mut R) -> Dense {
        let limit = (6. / (inputs + units) as f32).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit);
        Dense {
            weights: Array2::from_shape_fn((inputs, units), |_| dist.sample(rng)),
            bias: Array1::zeros(units),
            activation,
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn units(&self) -> usize {
        self.weights.ncols()
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let z = x.dot(&self.weights) + &self.bias;
        self.activation.apply(z)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Dense(Dense),
    Dropout(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HiddenLayer {
    pub units: usize,
    pub dropout: f32,
}

/// Hidden stack used for sign classification.
pub const DEFAULT_HIDDEN: [HiddenLayer; 3] = [
    HiddenLayer {
        units: 256,
        dropout: 0.3,
    },
    HiddenLayer {
        units: 128,
        dropout: 0.3,
    },
    HiddenLayer {
        units: 64,
        dropout: 0.2,
    },
];

/// Feed-forward classifier: ReLU dense layers with optional dropout, closed
/// by a softmax layer with one unit per class.
#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    pub layers: Vec<Layer>,
}

impl Mlp {
    pub fn new<R: Rng>(inputs: usize, hidden: &[HiddenLayer], classes: usize, rng: &mut R) -> Mlp {
        let mut layers = Vec::new();
        let mut width = inputs;
        for h in hidden {
            layers.push(Layer::Dense(Dense::glorot(width, h.units, Activation::Relu, rng)));
            if h.dropout > 0. {
                layers.push(Layer::Dropout(h.dropout));
            }
            width = h.units;
        }
        layers.push(Layer::Dense(Dense::glorot(
            width,
            classes,
            Activation::Softmax,
            rng,
        )));

        Mlp { layers }
    }

    pub fn from_layers(layers: Vec<Layer>) -> Result<Mlp> {
        let mut width: Option<usize> = None;
        for layer in &layers {
            if let Layer::Dense(d) = layer {
                if d.bias.len() != d.units() {
                    return Err(Error::msg(format!(
                        "bias has {} values for {} units",
                        d.bias.len(),
                        d.units()
                    )));
                }
                if let Some(w) = width {
                    if w != d.inputs() {
                        return Err(Error::msg(format!(
                            "dense layer expects {} inputs after a layer of {w} units",
                            d.inputs()
                        )));
                    }
                }
                width = Some(d.units());
            }
        }

        if width.is_none() {
            return Err(Error::msg("model has no dense layers"));
        }
        Ok(Mlp { layers })
    }

    pub fn dense_layers(&self) -> impl Iterator<Item = &Dense> {
        self.layers.iter().filter_map(|l| match l {
            Layer::Dense(d) => Some(d),
            Layer::Dropout(_) => None,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.dense_layers().next().map(Dense::inputs).unwrap_or(0)
    }

    pub fn num_classes(&self) -> usize {
        self.dense_layers().last().map(Dense::units).unwrap_or(0)
    }

    /// Inference pass, dropout disabled. One row of outputs per input row.
    pub fn predict(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut a = x.to_owned();
        for layer in &self.layers {
            if let Layer::Dense(d) = layer {
                a = d.forward(a.view());
            }
        }
        a
    }

    /// Most likely class and its probability for a single feature vector.
    pub fn classify(&self, features: &[f32]) -> Result<(usize, f32)> {
        if features.len() != self.input_dim() {
            return Err(Error::msg(format!(
                "classifier expects {} features, got {}",
                self.input_dim(),
                features.len()
            )));
        }

        let x = ArrayView1::from(features).insert_axis(Axis(0));
        let probs = self.predict(x);
        argmax(probs.row(0)).ok_or_else(|| Error::msg("classifier produced no outputs"))
    }
}

pub fn argmax(row: ArrayView1<f32>) -> Option<(usize, f32)> {
    row.iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let out = Activation::Softmax.apply(array![[1., 2., 3.], [1000., 1000., 1000.]]);
        for row in out.rows() {
            assert!((row.sum() - 1.).abs() < 1e-6);
        }
        assert!(out[[0, 2]] > out[[0, 1]]);
        assert!((out[[1, 0]] - 1. / 3.).abs() < 1e-6);
    }

    #[test]
    fn test_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mlp = Mlp::new(63, &DEFAULT_HIDDEN, 5, &mut rng);

        assert_eq!(mlp.input_dim(), 63);
        assert_eq!(mlp.num_classes(), 5);
        assert_eq!(mlp.layers.len(), 7);

        let probs = mlp.predict(Array2::zeros((4, 63)).view());
        assert_eq!(probs.shape(), &[4, 5]);

        assert!(mlp.classify(&[0.; 10]).is_err());
        let (idx, p) = mlp.classify(&[0.1; 63]).unwrap();
        assert!(idx < 5 && p > 0. && p <= 1.);
    }

    #[test]
    fn test_from_layers_checks_widths() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = Dense::glorot(4, 3, Activation::Relu, &mut rng);
        let b = Dense::glorot(2, 2, Activation::Softmax, &mut rng);
        assert!(Mlp::from_layers(vec![Layer::Dense(a), Layer::Dense(b)]).is_err());
        assert!(Mlp::from_layers(vec![Layer::Dropout(0.1)]).is_err());
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(array![0.1, 0.7, 0.2].view()), Some((1, 0.7)));
        assert_eq!(argmax(Array1::<f32>::zeros(0).view()), None);
    }
}
