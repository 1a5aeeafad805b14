use crate::landmarks::Hand;
use anyhow::Result;
use image::RgbImage;
use std::path::Path;
use tracing::{Level, span, trace};

pub use landmarks::{HandLandmarker, PRESENCE_THRESHOLD};
pub use model::initialize_model;
pub use palm::{Bounds, Letterbox, Palm, PalmDetector};
pub use roi::HandRoi;

mod landmarks;
mod model;
mod palm;
mod roi;

/// Anything that can find zero or one hand in a frame.
pub trait HandDetector {
    fn detect(&mut self, img: &RgbImage) -> Result<Option<Hand>>;
}

impl<D: HandDetector + ?Sized> HandDetector for Box<D> {
    fn detect(&mut self, img: &RgbImage) -> Result<Option<Hand>> {
        (**self).detect(img)
    }
}

/// Two-stage hand tracking: find the palm on the full frame, then run the
/// landmark network on a rotated crop around it.
pub struct HandPipeline {
    palm_detector: PalmDetector,
    landmarker: HandLandmarker,
}

impl HandPipeline {
    pub fn new(
        palm_model: &Path,
        landmark_model: &Path,
        threads: usize,
        min_confidence: f32,
    ) -> Result<HandPipeline> {
        Ok(HandPipeline {
            palm_detector: PalmDetector::new(palm_model, threads, min_confidence)?,
            landmarker: HandLandmarker::new(landmark_model, threads, PRESENCE_THRESHOLD)?,
        })
    }
}

impl HandDetector for HandPipeline {
    fn detect(&mut self, img: &RgbImage) -> Result<Option<Hand>> {
        let span = span!(Level::DEBUG, "hand_pipeline");
        let _guard = span.enter();

        let palms = self.palm_detector.detect(img)?;
        let palm = match palms.first() {
            Some(p) => p,
            None => {
                trace!("No palm found");
                return Ok(None);
            }
        };

        let roi = HandRoi::from_palm(palm);
        self.landmarker.run(img, &roi)
    }
}
