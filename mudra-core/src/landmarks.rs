use anyhow::{Error, Result};

pub const NUM_LANDMARKS: usize = 21;
pub const NUM_FEATURES: usize = NUM_LANDMARKS * 3;

pub type FeatureVector = [f32; NUM_FEATURES];

pub const WRIST: usize = 0;
pub const THUMB_MCP: usize = 2;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_TIP: usize = 20;

pub const FINGER_TIPS: [usize; 5] = [THUMB_TIP, INDEX_TIP, MIDDLE_TIP, RING_TIP, PINKY_TIP];
pub const FINGER_MCPS: [usize; 5] = [THUMB_MCP, INDEX_MCP, MIDDLE_MCP, RING_MCP, PINKY_MCP];

// Skeleton edges as drawn by the reference hand tracker
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (5, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (9, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (13, 17),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Landmark) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }
}

/// One detected hand: 21 keypoints in detector image units plus the
/// detector's hand-presence score.
#[derive(Debug, Clone, PartialEq)]
pub struct Hand {
    pub landmarks: [Landmark; NUM_LANDMARKS],
    pub confidence: f32,
}

impl Hand {
    pub fn new(landmarks: [Landmark; NUM_LANDMARKS], confidence: f32) -> Self {
        Self {
            landmarks,
            confidence,
        }
    }

    /// Builds a hand from `x, y, z` triples laid out landmark-major.
    pub fn from_flat(values: &[f32], confidence: f32) -> Result<Self> {
        if values.len() != NUM_FEATURES {
            return Err(Error::msg(format!(
                "expected {NUM_FEATURES} landmark values, got {}",
                values.len()
            )));
        }

        let mut landmarks = [Landmark::default(); NUM_LANDMARKS];
        for (lm, xyz) in landmarks.iter_mut().zip(values.chunks_exact(3)) {
            *lm = Landmark::new(xyz[0], xyz[1], xyz[2]);
        }

        Ok(Self::new(landmarks, confidence))
    }

    pub fn features(&self) -> FeatureVector {
        normalize(&self.landmarks)
    }
}

/// Wrist-centred, scale-invariant feature vector.
///
/// Every point is translated so the wrist sits at the origin, then divided by
/// the largest wrist distance. When all points coincide with the wrist the
/// translated coordinates are returned unscaled. Output is landmark-major,
/// `x, y, z` within each landmark.
///
/// Arithmetic runs in f64 and is narrowed on output; any other environment
/// turning landmarks into classifier input must do exactly the same.
pub fn normalize(landmarks: &[Landmark; NUM_LANDMARKS]) -> FeatureVector {
    let wrist = landmarks[WRIST];
    let (wx, wy, wz) = (wrist.x as f64, wrist.y as f64, wrist.z as f64);

    let mut centred = [[0f64; 3]; NUM_LANDMARKS];
    for (c, lm) in centred.iter_mut().zip(landmarks.iter()) {
        *c = [lm.x as f64 - wx, lm.y as f64 - wy, lm.z as f64 - wz];
    }

    let max_dist = centred
        .iter()
        .map(|[x, y, z]| (x * x + y * y + z * z).sqrt())
        .fold(0f64, f64::max);

    let mut out = [0f32; NUM_FEATURES];
    for (i, c) in centred.iter().enumerate() {
        for (axis, v) in c.iter().enumerate() {
            let v = if max_dist > 0. { v / max_dist } else { *v };
            out[i * 3 + axis] = v as f32;
        }
    }

    out
}

/// Inverse of [`normalize`] given the wrist position and scale that were
/// removed.
pub fn denormalize(
    features: &FeatureVector,
    wrist: Landmark,
    scale: f32,
) -> [Landmark; NUM_LANDMARKS] {
    let mut out = [Landmark::default(); NUM_LANDMARKS];
    for (lm, xyz) in out.iter_mut().zip(features.chunks_exact(3)) {
        *lm = Landmark::new(
            xyz[0] * scale + wrist.x,
            xyz[1] * scale + wrist.y,
            xyz[2] * scale + wrist.z,
        );
    }
    out
}

/// Largest wrist distance, the scale [`normalize`] divides by.
pub fn wrist_scale(landmarks: &[Landmark; NUM_LANDMARKS]) -> f32 {
    let wrist = landmarks[WRIST];
    landmarks
        .iter()
        .map(|lm| lm.distance(&wrist))
        .fold(0f32, f32::max)
}
