use super::mlp::{Activation, Dense, Layer, Mlp};
use anyhow::{Context, Error, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MODEL_FILE: &str = "model.json";
pub const LABELS_FILE: &str = "labels.json";
const MAX_SHARD_BYTES: usize = 4 * 1024 * 1024;
const FLOAT32: &str = "float32";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelJson {
    format: String,
    generated_by: String,
    converted_by: Option<String>,
    model_topology: Topology,
    weights_manifest: Vec<WeightGroup>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Topology {
    class_name: String,
    config: SequentialConfig,
    keras_version: String,
    backend: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SequentialConfig {
    name: String,
    layers: Vec<LayerSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "class_name", content = "config")]
enum LayerSpec {
    InputLayer {
        batch_input_shape: Vec<Option<usize>>,
        dtype: String,
        name: String,
    },
    Dense {
        name: String,
        units: usize,
        activation: Activation,
        use_bias: bool,
    },
    Dropout {
        name: String,
        rate: f64,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct WeightGroup {
    paths: Vec<String>,
    weights: Vec<WeightSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WeightSpec {
    name: String,
    shape: Vec<usize>,
    dtype: String,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub files: Vec<PathBuf>,
    pub total_bytes: u64,
}

/// Writes `model` as a browser-loadable layers model: `model.json`, one or
/// more `group1-shard{i}of{n}.bin` files and `labels.json`.
pub fn export_model(model: &Mlp, labels: &[String], dir: &Path) -> Result<ExportSummary> {
    if labels.len() != model.num_classes() {
        return Err(Error::msg(format!(
            "{} labels for a model with {} classes",
            labels.len(),
            model.num_classes()
        )));
    }
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut layers = vec![LayerSpec::InputLayer {
        batch_input_shape: vec![None, Some(model.input_dim())],
        dtype: FLOAT32.to_string(),
        name: "input".to_string(),
    }];
    let mut specs = Vec::new();
    let mut weights: Vec<f32> = Vec::new();
    let (mut n_dense, mut n_dropout) = (0, 0);

    for layer in &model.layers {
        match layer {
            Layer::Dense(d) => {
                let name = keras_name("dense", n_dense);
                n_dense += 1;

                specs.push(WeightSpec {
                    name: format!("{name}/kernel"),
                    shape: vec![d.inputs(), d.units()],
                    dtype: FLOAT32.to_string(),
                });
                specs.push(WeightSpec {
                    name: format!("{name}/bias"),
                    shape: vec![d.units()],
                    dtype: FLOAT32.to_string(),
                });
                weights.extend(d.weights.iter());
                weights.extend(d.bias.iter());

                layers.push(LayerSpec::Dense {
                    name,
                    units: d.units(),
                    activation: d.activation,
                    use_bias: true,
                });
            }
            Layer::Dropout(rate) => {
                layers.push(LayerSpec::Dropout {
                    name: keras_name("dropout", n_dropout),
                    rate: decimal_rate(*rate),
                });
                n_dropout += 1;
            }
        }
    }

    // tfjs shards are little-endian float32
    let bytes: &[u8] = bytemuck::cast_slice(&weights[..]);
    let chunks: Vec<&[u8]> = bytes.chunks(MAX_SHARD_BYTES).collect();
    let n_shards = chunks.len().max(1);

    let mut files = Vec::new();
    let mut paths = Vec::new();
    let mut total_bytes = 0u64;
    for (i, chunk) in chunks.iter().enumerate() {
        let shard = format!("group1-shard{}of{n_shards}.bin", i + 1);
        let path = dir.join(&shard);
        fs::write(&path, chunk).with_context(|| format!("writing {}", path.display()))?;
        total_bytes += chunk.len() as u64;
        paths.push(shard);
        files.push(path);
    }

    let model_json = ModelJson {
        format: "layers-model".to_string(),
        generated_by: format!("mudra {}", env!("CARGO_PKG_VERSION")),
        converted_by: None,
        model_topology: Topology {
            class_name: "Sequential".to_string(),
            config: SequentialConfig {
                name: "sign_classifier".to_string(),
                layers,
            },
            keras_version: "tfjs-layers".to_string(),
            backend: "tensor_flow.js".to_string(),
        },
        weights_manifest: vec![WeightGroup {
            paths,
            weights: specs,
        }],
    };

    let model_path = dir.join(MODEL_FILE);
    total_bytes += write_json(&model_path, &model_json)?;
    files.push(model_path);

    let labels_path = dir.join(LABELS_FILE);
    total_bytes += write_json(&labels_path, &labels)?;
    files.push(labels_path);

    info!(
        "Exported model to {} ({:.1} KB)",
        dir.display(),
        total_bytes as f64 / 1024.
    );

    Ok(ExportSummary { files, total_bytes })
}

/// Reads a model written by [`export_model`] together with its labels.
pub fn load_model(dir: &Path) -> Result<(Mlp, Vec<String>)> {
    let model_path = dir.join(MODEL_FILE);
    let model_json: ModelJson = read_json(&model_path)?;

    let mut offsets: HashMap<String, (Vec<usize>, usize)> = HashMap::new();
    let mut data: Vec<u8> = Vec::new();
    let mut weights_seen = 0usize;
    for group in &model_json.weights_manifest {
        for shard in &group.paths {
            let path = dir.join(shard);
            data.extend(fs::read(&path).with_context(|| format!("reading {}", path.display()))?);
        }
        for spec in &group.weights {
            if spec.dtype != FLOAT32 {
                return Err(Error::msg(format!(
                    "weight {} has unsupported dtype {}",
                    spec.name, spec.dtype
                )));
            }
            offsets.insert(spec.name.clone(), (spec.shape.clone(), weights_seen));
            weights_seen += spec.shape.iter().product::<usize>();
        }
    }

    if data.len() != weights_seen * 4 {
        return Err(Error::msg(format!(
            "weight shards hold {} bytes, manifest describes {}",
            data.len(),
            weights_seen * 4
        )));
    }
    let values: Vec<f32> = bytemuck::pod_collect_to_vec(&data[..]);

    let mut layers = Vec::new();
    for spec in &model_json.model_topology.config.layers {
        match spec {
            LayerSpec::InputLayer { .. } => {}
            LayerSpec::Dropout { rate, .. } => layers.push(Layer::Dropout(*rate as f32)),
            LayerSpec::Dense {
                name,
                units,
                activation,
                ..
            } => {
                let (k_shape, kernel) = take(&offsets, &values, &format!("{name}/kernel"))?;
                let (_, bias) = take(&offsets, &values, &format!("{name}/bias"))?;
                if k_shape.len() != 2 || k_shape[1] != *units || bias.len() != *units {
                    return Err(Error::msg(format!(
                        "layer {name}: kernel {k_shape:?} and {} biases for {units} units",
                        bias.len()
                    )));
                }

                layers.push(Layer::Dense(Dense {
                    weights: Array2::from_shape_vec((k_shape[0], k_shape[1]), kernel.to_vec())?,
                    bias: Array1::from(bias.to_vec()),
                    activation: *activation,
                }));
            }
        }
    }

    let model = Mlp::from_layers(layers)?;
    let labels: Vec<String> = read_json(&dir.join(LABELS_FILE))?;
    if labels.len() != model.num_classes() {
        return Err(Error::msg(format!(
            "{} labels for a model with {} classes",
            labels.len(),
            model.num_classes()
        )));
    }

    debug!("Loaded model from {} with {} classes", dir.display(), labels.len());
    Ok((model, labels))
}

fn take<'a>(
    offsets: &'a HashMap<String, (Vec<usize>, usize)>,
    values: &'a [f32],
    name: &str,
) -> Result<(&'a [usize], &'a [f32])> {
    let (shape, offset) = offsets
        .get(name)
        .ok_or_else(|| Error::msg(format!("weight {name} missing from manifest")))?;
    let len = shape.iter().product::<usize>();
    Ok((shape.as_slice(), &values[*offset..*offset + len]))
}

// 0.3f32 widened directly would print as 0.30000001192092896
fn decimal_rate(rate: f32) -> f64 {
    rate.to_string().parse().unwrap_or(rate as f64)
}

fn keras_name(base: &str, n: usize) -> String {
    if n == 0 {
        base.to_string()
    } else {
        format!("{base}_{n}")
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<u64> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(fs::metadata(path)?.len())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::mlp::DEFAULT_HIDDEN;
    use crate::dataset::tests::temp_dir;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("sign{i}")).collect()
    }

    #[test]
    fn test_export_then_load_predicts_identically() {
        let dir = temp_dir("export");
        let mut rng = StdRng::seed_from_u64(3);
        let model = Mlp::new(63, &DEFAULT_HIDDEN, 4, &mut rng);

        let summary = export_model(&model, &labels(4), &dir).unwrap();
        assert!(dir.join("group1-shard1of1.bin").exists());
        assert!(summary.total_bytes > 0);

        let (loaded, names) = load_model(&dir).unwrap();
        assert_eq!(names, labels(4));
        assert_eq!(loaded, model);

        let x = ndarray::Array2::from_shape_fn((3, 63), |(i, j)| ((i * 63 + j) as f32).sin());
        assert_eq!(loaded.predict(x.view()), model.predict(x.view()));
    }

    #[test]
    fn test_model_json_layout() {
        let dir = temp_dir("export-layout");
        let mut rng = StdRng::seed_from_u64(3);
        let model = Mlp::new(63, &DEFAULT_HIDDEN, 2, &mut rng);
        export_model(&model, &labels(2), &dir).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(MODEL_FILE)).unwrap()).unwrap();
        assert_eq!(json["format"], "layers-model");

        let layers = json["modelTopology"]["config"]["layers"].as_array().unwrap();
        assert_eq!(layers[0]["class_name"], "InputLayer");
        assert_eq!(layers[1]["class_name"], "Dense");
        assert_eq!(layers[1]["config"]["name"], "dense");
        assert_eq!(layers[1]["config"]["activation"], "relu");
        assert_eq!(layers[2]["class_name"], "Dropout");
        assert_eq!(layers[2]["config"]["rate"], serde_json::json!(0.3));
        assert_eq!(layers[6]["config"]["rate"], serde_json::json!(0.2));
        assert_eq!(layers.last().unwrap()["config"]["activation"], "softmax");

        let weights = json["weightsManifest"][0]["weights"].as_array().unwrap();
        assert_eq!(weights[0]["name"], "dense/kernel");
        assert_eq!(weights[0]["shape"], serde_json::json!([63, 256]));
        assert_eq!(weights.last().unwrap()["name"], "dense_3/bias");
    }

    #[test]
    fn test_label_count_must_match() {
        let dir = temp_dir("export-labels");
        let mut rng = StdRng::seed_from_u64(3);
        let model = Mlp::new(63, &DEFAULT_HIDDEN, 3, &mut rng);
        assert!(export_model(&model, &labels(2), &dir).is_err());
    }

    #[test]
    fn test_truncated_shard_is_rejected() {
        let dir = temp_dir("export-truncated");
        let mut rng = StdRng::seed_from_u64(3);
        let model = Mlp::new(63, &DEFAULT_HIDDEN, 3, &mut rng);
        export_model(&model, &labels(3), &dir).unwrap();

        let shard = dir.join("group1-shard1of1.bin");
        let bytes = fs::read(&shard).unwrap();
        fs::write(&shard, &bytes[..bytes.len() - 4]).unwrap();
        assert!(load_model(&dir).is_err());
    }
}
