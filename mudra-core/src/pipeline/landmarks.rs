use super::model::{Session, initialize_model};
use super::roi::HandRoi;
use crate::landmarks::{Hand, NUM_FEATURES};
use anyhow::{Error, Result};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, warp_into};
use ndarray::Array;
use ort::value::Tensor;
use std::path::Path;
use tracing::{Level, span, trace};

const HEIGHT: u32 = 224;
const WIDTH: u32 = 224;

pub const PRESENCE_THRESHOLD: f32 = 0.5;

/// MediaPipe-layout hand landmark network: NHWC float input, first output is
/// 21 x/y/z triples in crop pixels, second is the hand presence score.
pub struct HandLandmarker {
    model: Session,
    input_name: String,
    landmarks_output: String,
    presence_output: String,
    min_presence: f32,
}

impl HandLandmarker {
    pub fn new(model_path: &Path, threads: usize, min_presence: f32) -> Result<HandLandmarker> {
        let model = initialize_model(model_path, threads)?;

        let input_name = match model.inputs.first() {
            Some(i) => i.name.clone(),
            None => return Err(Error::msg("Hand landmark model has no inputs")),
        };
        if model.outputs.len() < 2 {
            return Err(Error::msg(format!(
                "Hand landmark model has {} outputs, expected landmarks and presence",
                model.outputs.len()
            )));
        }
        let landmarks_output = model.outputs[0].name.clone();
        let presence_output = model.outputs[1].name.clone();

        Ok(HandLandmarker {
            model,
            input_name,
            landmarks_output,
            presence_output,
            min_presence,
        })
    }

    /// Landmarks for the hand inside `roi`, in unit coordinates of the whole
    /// frame.
    pub fn run(&mut self, img: &RgbImage, roi: &HandRoi) -> Result<Option<Hand>> {
        let span = span!(Level::DEBUG, "hand_landmarker");
        let _guard = span.enter();

        let projection = roi
            .projection(WIDTH)
            .ok_or_else(|| Error::msg("Empty hand region"))?;
        let mut crop = RgbImage::new(WIDTH, HEIGHT);
        warp_into(img, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut crop);

        let input_arr =
            Array::from_shape_fn((1, HEIGHT as usize, WIDTH as usize, 3), |(_, y, x, c)| {
                crop.get_pixel(x as u32, y as u32)[c] as f32 / 255. // 0. - 1. range
            });
        let input = Tensor::from_array(input_arr)?;

        let outputs = self
            .model
            .run(ort::inputs![self.input_name.as_str() => input]?)?;

        let presence = outputs[self.presence_output.as_str()].try_extract_tensor::<f32>()?;
        let score = match presence.iter().next() {
            Some(s) => *s,
            None => return Err(Error::msg("Empty hand presence output")),
        };
        trace!("Hand presence {score}");
        if score < self.min_presence {
            return Ok(None);
        }

        let raw = outputs[self.landmarks_output.as_str()].try_extract_tensor::<f32>()?;
        let raw: Vec<f32> = raw.iter().copied().collect();
        if raw.len() < NUM_FEATURES {
            return Err(Error::msg(format!(
                "Landmark output has {} values, expected {NUM_FEATURES}",
                raw.len()
            )));
        }

        Ok(Some(project_hand(
            &raw[..NUM_FEATURES],
            roi,
            img.width(),
            img.height(),
            score,
        )?))
    }
}

// crop pixels back to frame-relative units; z follows the x scale
fn project_hand(
    raw: &[f32],
    roi: &HandRoi,
    frame_width: u32,
    frame_height: u32,
    score: f32,
) -> Result<Hand> {
    let (fw, fh) = (frame_width as f32, frame_height as f32);
    let mut values = Vec::with_capacity(raw.len());
    for point in raw.chunks_exact(3) {
        let (x, y) = roi.to_image(point[0] / WIDTH as f32, point[1] / HEIGHT as f32);
        values.push(x / fw);
        values.push(y / fh);
        values.push(point[2] / WIDTH as f32 * roi.size / fw);
    }
    Hand::from_flat(&values, score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::Landmark;
    use std::f32::consts::PI;

    fn close(a: &Landmark, b: &Landmark) -> bool {
        (a.x - b.x).abs() < 1e-5 && (a.y - b.y).abs() < 1e-5 && (a.z - b.z).abs() < 1e-5
    }

    #[test]
    fn test_project_hand_to_frame() {
        let roi = HandRoi {
            cx: 320.,
            cy: 240.,
            size: 100.,
            rotation: 0.,
        };
        let mut raw = vec![112.; NUM_FEATURES];
        raw[2] = 22.4;
        raw[3] = 0.;
        raw[4] = 0.;
        raw[5] = 0.;

        let hand = project_hand(&raw, &roi, 640, 480, 0.8).unwrap();
        assert!(close(&hand.landmarks[0], &Landmark::new(0.5, 0.5, 0.015625)));
        assert!(close(
            &hand.landmarks[1],
            &Landmark::new(270. / 640., 190. / 480., 0.)
        ));
        assert_eq!(hand.confidence, 0.8);
    }

    #[test]
    fn test_project_hand_undoes_rotation() {
        let roi = HandRoi {
            cx: 320.,
            cy: 240.,
            size: 100.,
            rotation: PI / 2.,
        };
        // straight up in the crop is to the right in the frame
        let mut raw = vec![112.; NUM_FEATURES];
        raw[1] = 0.;

        let hand = project_hand(&raw, &roi, 640, 480, 0.8).unwrap();
        assert!(close(
            &hand.landmarks[0],
            &Landmark::new(370. / 640., 240. / 480., 112. / 224. * 100. / 640.)
        ));
    }
}
