use super::model::{Session, initialize_model};
use anchors::{Anchor, NUM_ANCHORS, gen_anchors};
use anyhow::{Error, Result};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array;
use ort::value::Tensor;
use std::path::Path;
use tracing::{Level, span, trace};

mod anchors;

const SIZE: u32 = 192;
const NUM_COORDS: usize = 18;
const NUM_KEYPOINTS: usize = 7;
const MIN_SUPPRESSION_IOU: f32 = 0.3;
const SCORE_CLIP: f32 = 100.;

pub const WRIST_KEYPOINT: usize = 0;
pub const MIDDLE_MCP_KEYPOINT: usize = 2;

/// Axis-aligned box given by its centre and size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl Bounds {
    fn area(&self) -> f32 {
        self.w.max(0.) * self.h.max(0.)
    }

    pub fn iou(&self, other: &Bounds) -> f32 {
        let left = (self.cx - self.w / 2.).max(other.cx - other.w / 2.);
        let right = (self.cx + self.w / 2.).min(other.cx + other.w / 2.);
        let top = (self.cy - self.h / 2.).max(other.cy - other.h / 2.);
        let bottom = (self.cy + self.h / 2.).min(other.cy + other.h / 2.);

        let inter = (right - left).max(0.) * (bottom - top).max(0.);
        let union = self.area() + other.area() - inter;
        if union <= 0. { 0. } else { inter / union }
    }
}

/// A palm detection. Coordinates are frame pixels once returned by
/// [`PalmDetector::detect`].
#[derive(Debug, Clone, PartialEq)]
pub struct Palm {
    pub bounds: Bounds,
    pub keypoints: [(f32, f32); NUM_KEYPOINTS],
    pub score: f32,
}

/// Aspect-preserving fit of a frame into the square model input, padded
/// evenly on the short side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub size: u32,
    pub width: u32,
    pub height: u32,
    pub pad_x: u32,
    pub pad_y: u32,
    scale: f32,
}

impl Letterbox {
    pub fn new(frame_width: u32, frame_height: u32, size: u32) -> Letterbox {
        let scale = size as f32 / frame_width.max(frame_height).max(1) as f32;
        let width = ((frame_width as f32 * scale).round() as u32).clamp(1, size);
        let height = ((frame_height as f32 * scale).round() as u32).clamp(1, size);

        Letterbox {
            size,
            width,
            height,
            pad_x: (size - width) / 2,
            pad_y: (size - height) / 2,
            scale,
        }
    }

    /// Unit model-input coordinates to frame pixels.
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        let size = self.size as f32;
        (
            (x * size - self.pad_x as f32) / self.scale,
            (y * size - self.pad_y as f32) / self.scale,
        )
    }

    pub fn palm_to_frame(&self, palm: &Palm) -> Palm {
        let (cx, cy) = self.to_frame(palm.bounds.cx, palm.bounds.cy);
        let size = self.size as f32 / self.scale;

        let mut keypoints = palm.keypoints;
        for kp in keypoints.iter_mut() {
            *kp = self.to_frame(kp.0, kp.1);
        }

        Palm {
            bounds: Bounds {
                cx,
                cy,
                w: palm.bounds.w * size,
                h: palm.bounds.h * size,
            },
            keypoints,
            score: palm.score,
        }
    }
}

/// BlazePalm wrapper: runs the palm detection network with ort, then decodes
/// the raw outputs against the SSD anchors.
///
/// Model input: 192x192 NHWC f32 RGB in [0, 1].
/// Model outputs:
/// - 2016 x 18 regressors: box centre offset, box size, then 7 keypoint
///   offsets, all in input pixels relative to the anchor centre
/// - 2016 scores as logits
pub struct PalmDetector {
    model: Session,
    input_name: String,
    output_names: [String; 2],
    anchors: Vec<Anchor>,
    min_score: f32,
}

impl PalmDetector {
    pub fn new(model_path: &Path, threads: usize, min_score: f32) -> Result<PalmDetector> {
        let model = initialize_model(model_path, threads)?;

        let input_name = match model.inputs.first() {
            Some(i) => i.name.clone(),
            None => return Err(Error::msg("Palm detection model has no inputs")),
        };
        if model.outputs.len() < 2 {
            return Err(Error::msg(format!(
                "Palm detection model has {} outputs, expected regressors and scores",
                model.outputs.len()
            )));
        }
        let output_names = [model.outputs[0].name.clone(), model.outputs[1].name.clone()];

        Ok(PalmDetector {
            model,
            input_name,
            output_names,
            anchors: gen_anchors(),
            min_score,
        })
    }

    /// Palms in `img`, best first.
    pub fn detect(&mut self, img: &RgbImage) -> Result<Vec<Palm>> {
        let span = span!(Level::DEBUG, "palm_detector");
        let _guard = span.enter();

        let letterbox = Letterbox::new(img.width(), img.height(), SIZE);
        let resized = imageops::resize(img, letterbox.width, letterbox.height, FilterType::Triangle);

        let input_arr =
            Array::from_shape_fn((1, SIZE as usize, SIZE as usize, 3), |(_, y, x, c)| {
                let x = x as u32;
                let y = y as u32;
                if x < letterbox.pad_x
                    || y < letterbox.pad_y
                    || x - letterbox.pad_x >= letterbox.width
                    || y - letterbox.pad_y >= letterbox.height
                {
                    0.
                } else {
                    resized.get_pixel(x - letterbox.pad_x, y - letterbox.pad_y)[c] as f32 / 255.
                }
            });
        let input = Tensor::from_array(input_arr)?;

        let outputs = self
            .model
            .run(ort::inputs![self.input_name.as_str() => input]?)?;

        let first: Vec<f32> = outputs[self.output_names[0].as_str()]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();
        let second: Vec<f32> = outputs[self.output_names[1].as_str()]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();

        // output order differs between conversions; tell them apart by size
        let (regressors, scores) = if first.len() == NUM_ANCHORS * NUM_COORDS {
            (first, second)
        } else {
            (second, first)
        };

        let palms: Vec<Palm> = decode(&regressors, &scores, &self.anchors, self.min_score)?
            .iter()
            .map(|p| letterbox.palm_to_frame(p))
            .collect();
        trace!("Detected {} palms", palms.len());

        Ok(palms)
    }
}

/// Turns raw network outputs into palms in unit input coordinates, dropping
/// low scores and overlapping boxes. Best first.
pub fn decode(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[Anchor],
    min_score: f32,
) -> Result<Vec<Palm>> {
    if regressors.len() != anchors.len() * NUM_COORDS || scores.len() != anchors.len() {
        return Err(Error::msg(format!(
            "Palm outputs have {} regressor and {} score values for {} anchors",
            regressors.len(),
            scores.len(),
            anchors.len()
        )));
    }

    let size = SIZE as f32;
    let mut candidates = Vec::new();
    for (i, anchor) in anchors.iter().enumerate() {
        let score = sigmoid_stable(scores[i].clamp(-SCORE_CLIP, SCORE_CLIP));
        if score < min_score {
            continue;
        }

        let r = &regressors[i * NUM_COORDS..(i + 1) * NUM_COORDS];
        let mut keypoints = [(0., 0.); NUM_KEYPOINTS];
        for (k, kp) in keypoints.iter_mut().enumerate() {
            *kp = (
                r[4 + 2 * k] / size + anchor.x,
                r[5 + 2 * k] / size + anchor.y,
            );
        }

        candidates.push(Palm {
            bounds: Bounds {
                cx: r[0] / size + anchor.x,
                cy: r[1] / size + anchor.y,
                w: r[2] / size,
                h: r[3] / size,
            },
            keypoints,
            score,
        });
    }

    Ok(non_max_suppression(candidates))
}

fn non_max_suppression(mut candidates: Vec<Palm>) -> Vec<Palm> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Palm> = Vec::new();
    for c in candidates {
        if kept
            .iter()
            .all(|k| k.bounds.iou(&c.bounds) <= MIN_SUPPRESSION_IOU)
        {
            kept.push(c);
        }
    }
    kept
}

fn sigmoid_stable(x: f32) -> f32 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        x.exp() / (1. + x.exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> (Vec<f32>, Vec<f32>) {
        (vec![0.; NUM_ANCHORS * NUM_COORDS], vec![-10.; NUM_ANCHORS])
    }

    fn set_regressor(regressors: &mut [f32], idx: usize, values: &[f32]) {
        regressors[idx * NUM_COORDS..idx * NUM_COORDS + values.len()].copy_from_slice(values);
    }

    #[test]
    fn test_decode_offsets_from_anchor() {
        let anchors = gen_anchors();
        let (mut regressors, mut scores) = outputs();

        // first stride-16 anchor sits at (1/24, 1/24)
        scores[1152] = 5.;
        set_regressor(
            &mut regressors,
            1152,
            &[19.2, -9.6, 38.4, 57.6, 0., 19.2, 0., 0., 0., -19.2],
        );

        let palms = decode(&regressors, &scores, &anchors, 0.5).unwrap();
        assert_eq!(palms.len(), 1);

        let p = &palms[0];
        let a = 1. / 24.;
        assert!((p.bounds.cx - (0.1 + a)).abs() < 1e-6);
        assert!((p.bounds.cy - (a - 0.05)).abs() < 1e-6);
        assert!((p.bounds.w - 0.2).abs() < 1e-6);
        assert!((p.bounds.h - 0.3).abs() < 1e-6);
        assert!((p.keypoints[WRIST_KEYPOINT].1 - (a + 0.1)).abs() < 1e-6);
        assert!((p.keypoints[MIDDLE_MCP_KEYPOINT].1 - (a - 0.1)).abs() < 1e-6);
        assert!((p.score - sigmoid_stable(5.)).abs() < 1e-6);
    }

    #[test]
    fn test_overlapping_detections_are_suppressed() {
        let anchors = gen_anchors();
        let (mut regressors, mut scores) = outputs();
        let size = [0., 0., 38.4, 38.4];

        scores[1152] = 2.;
        set_regressor(&mut regressors, 1152, &size);
        scores[1153] = 4.;
        set_regressor(&mut regressors, 1153, &size);
        scores[NUM_ANCHORS - 1] = 1.;
        set_regressor(&mut regressors, NUM_ANCHORS - 1, &size);

        let palms = decode(&regressors, &scores, &anchors, 0.5).unwrap();
        assert_eq!(palms.len(), 2);
        assert!((palms[0].score - sigmoid_stable(4.)).abs() < 1e-6);
        assert!(palms[1].bounds.cx > 0.9);
    }

    #[test]
    fn test_decode_rejects_wrong_sizes() {
        let anchors = gen_anchors();
        assert!(decode(&[0.; 10], &[0.; NUM_ANCHORS], &anchors, 0.5).is_err());
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let lb = Letterbox::new(640, 480, SIZE);
        assert_eq!((lb.width, lb.height, lb.pad_x, lb.pad_y), (192, 144, 0, 24));

        let (x, y) = lb.to_frame(0.5, 0.5);
        assert!((x - 320.).abs() < 1e-3 && (y - 240.).abs() < 1e-3);

        let palm = Palm {
            bounds: Bounds {
                cx: 0.5,
                cy: 0.5,
                w: 0.1,
                h: 0.2,
            },
            keypoints: [(0.5, 0.125); NUM_KEYPOINTS],
            score: 0.9,
        };
        let framed = lb.palm_to_frame(&palm);
        assert!((framed.bounds.w - 64.).abs() < 1e-3);
        assert!((framed.bounds.h - 128.).abs() < 1e-3);
        assert!(framed.keypoints[0].1.abs() < 1e-3);
    }

    #[test]
    fn test_iou() {
        let a = Bounds {
            cx: 0.,
            cy: 0.,
            w: 2.,
            h: 2.,
        };
        let b = Bounds { cx: 1., ..a };
        assert!((a.iou(&a) - 1.).abs() < 1e-6);
        assert!((a.iou(&b) - 2. / 6.).abs() < 1e-6);
        assert_eq!(a.iou(&Bounds { cx: 5., ..a }), 0.);
    }
}
