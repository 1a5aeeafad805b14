use crate::landmarks::{FINGER_MCPS, FINGER_TIPS, INDEX_MCP, Landmark, MIDDLE_MCP, NUM_LANDMARKS, WRIST};

pub const SMOOTHING_FACTOR: f32 = 0.7;
const EXTENSION_RATIO: f32 = 1.1;

/// Exponential moving average over successive hands. The first hand seen
/// after construction or `reset` passes through untouched.
#[derive(Debug, Clone)]
pub struct LandmarkSmoother {
    factor: f32,
    previous: Option<[Landmark; NUM_LANDMARKS]>,
}

impl Default for LandmarkSmoother {
    fn default() -> Self {
        Self::new(SMOOTHING_FACTOR)
    }
}

impl LandmarkSmoother {
    pub fn new(factor: f32) -> Self {
        Self {
            factor: factor.clamp(0., 1.),
            previous: None,
        }
    }

    pub fn smooth(&mut self, current: &[Landmark; NUM_LANDMARKS]) -> [Landmark; NUM_LANDMARKS] {
        let smoothed = match self.previous {
            None => *current,
            Some(prev) => {
                let f = self.factor;
                let mut out = *current;
                for (o, (p, c)) in out.iter_mut().zip(prev.iter().zip(current.iter())) {
                    *o = Landmark::new(
                        p.x * f + c.x * (1. - f),
                        p.y * f + c.y * (1. - f),
                        p.z * f + c.z * (1. - f),
                    );
                }
                out
            }
        };

        self.previous = Some(smoothed);
        smoothed
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PalmFacing {
    Forward,
    Backward,
}

pub fn finger_extended(landmarks: &[Landmark; NUM_LANDMARKS], tip: usize, mcp: usize) -> bool {
    let wrist = &landmarks[WRIST];
    landmarks[tip].distance(wrist) > landmarks[mcp].distance(wrist) * EXTENSION_RATIO
}

/// Thumb through pinky.
pub fn extended_fingers(landmarks: &[Landmark; NUM_LANDMARKS]) -> [bool; 5] {
    let mut out = [false; 5];
    for (i, (tip, mcp)) in FINGER_TIPS.iter().zip(FINGER_MCPS.iter()).enumerate() {
        out[i] = finger_extended(landmarks, *tip, *mcp);
    }
    out
}

pub fn palm_facing(landmarks: &[Landmark; NUM_LANDMARKS]) -> PalmFacing {
    let palm_z = (landmarks[WRIST].z + landmarks[MIDDLE_MCP].z + landmarks[INDEX_MCP].z) / 3.;
    if palm_z < 0. {
        PalmFacing::Forward
    } else {
        PalmFacing::Backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::tests::sample_landmarks;

    #[test]
    fn test_first_frame_passes_through() {
        let mut smoother = LandmarkSmoother::default();
        let lms = sample_landmarks(0.);
        assert_eq!(smoother.smooth(&lms), lms);
    }

    #[test]
    fn test_exponential_average() {
        let mut smoother = LandmarkSmoother::default();
        let a = [Landmark::new(1., 0., 0.); NUM_LANDMARKS];
        let b = [Landmark::new(0., 1., 1.); NUM_LANDMARKS];

        smoother.smooth(&a);
        let out = smoother.smooth(&b);
        assert!((out[0].x - 0.7).abs() < 1e-6);
        assert!((out[0].y - 0.3).abs() < 1e-6);

        // history is the smoothed value, not the raw input
        let out = smoother.smooth(&b);
        assert!((out[0].x - 0.49).abs() < 1e-6);

        smoother.reset();
        assert_eq!(smoother.smooth(&b), b);
    }

    #[test]
    fn test_finger_extension() {
        let mut lms = [Landmark::default(); NUM_LANDMARKS];
        for (tip, mcp) in FINGER_TIPS.iter().zip(FINGER_MCPS.iter()) {
            lms[*mcp] = Landmark::new(0., 1., 0.);
            lms[*tip] = Landmark::new(0., 1.05, 0.);
        }
        lms[crate::landmarks::INDEX_TIP] = Landmark::new(0., 2., 0.);

        assert_eq!(extended_fingers(&lms), [false, true, false, false, false]);
    }

    #[test]
    fn test_palm_facing() {
        let mut lms = [Landmark::default(); NUM_LANDMARKS];
        lms[WRIST].z = -0.3;
        assert_eq!(palm_facing(&lms), PalmFacing::Forward);
        lms[WRIST].z = 0.3;
        assert_eq!(palm_facing(&lms), PalmFacing::Backward);
    }
}
