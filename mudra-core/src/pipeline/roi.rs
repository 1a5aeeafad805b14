use super::palm::{MIDDLE_MCP_KEYPOINT, Palm, WRIST_KEYPOINT};
use imageproc::geometric_transformations::Projection;
use std::f32::consts::PI;

const ROI_SCALE: f32 = 2.6;
const ROI_SHIFT_Y: f32 = -0.5;
const TARGET_ROTATION: f32 = PI / 2.;

/// Square, rotated region of the frame the landmark network looks at. All
/// values are frame pixels except `rotation`, which is radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandRoi {
    pub cx: f32,
    pub cy: f32,
    pub size: f32,
    pub rotation: f32,
}

impl HandRoi {
    /// Rotates the palm box so the wrist-to-middle-finger axis points up,
    /// shifts it toward the fingers and grows it to cover the whole hand.
    pub fn from_palm(palm: &Palm) -> HandRoi {
        let (x0, y0) = palm.keypoints[WRIST_KEYPOINT];
        let (x1, y1) = palm.keypoints[MIDDLE_MCP_KEYPOINT];
        let rotation = normalize_radians(TARGET_ROTATION - (-(y1 - y0)).atan2(x1 - x0));

        let b = palm.bounds;
        let (sin, cos) = rotation.sin_cos();
        let cx = b.cx - b.h * ROI_SHIFT_Y * sin;
        let cy = b.cy + b.h * ROI_SHIFT_Y * cos;

        HandRoi {
            cx,
            cy,
            size: b.w.max(b.h) * ROI_SCALE,
            rotation,
        }
    }

    /// Unit crop coordinates to frame pixels.
    pub fn to_image(&self, x: f32, y: f32) -> (f32, f32) {
        let (x, y) = (x - 0.5, y - 0.5);
        let (sin, cos) = self.rotation.sin_cos();
        (
            self.cx + (cos * x - sin * y) * self.size,
            self.cy + (sin * x + cos * y) * self.size,
        )
    }

    /// Maps frame pixels into a `crop_size` square crop. `None` for an empty
    /// region.
    pub fn projection(&self, crop_size: u32) -> Option<Projection> {
        if !(self.size > 0.) {
            return None;
        }

        let k = crop_size as f32 / self.size;
        let half = crop_size as f32 / 2.;
        let (sin, cos) = self.rotation.sin_cos();
        Projection::from_matrix([
            k * cos,
            k * sin,
            half - k * (cos * self.cx + sin * self.cy),
            -k * sin,
            k * cos,
            half + k * (sin * self.cx - cos * self.cy),
            0.,
            0.,
            1.,
        ])
    }
}

fn normalize_radians(angle: f32) -> f32 {
    angle - 2. * PI * ((angle + PI) / (2. * PI)).floor()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::palm::Bounds;
    use image::{Rgb, RgbImage};
    use imageproc::geometric_transformations::{Interpolation, warp_into};

    fn palm(wrist: (f32, f32), middle: (f32, f32)) -> Palm {
        let mut keypoints = [(100., 100.); 7];
        keypoints[WRIST_KEYPOINT] = wrist;
        keypoints[MIDDLE_MCP_KEYPOINT] = middle;
        Palm {
            bounds: Bounds {
                cx: 100.,
                cy: 100.,
                w: 40.,
                h: 40.,
            },
            keypoints,
            score: 0.9,
        }
    }

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-3 && (a.1 - b.1).abs() < 1e-3
    }

    #[test]
    fn test_upright_palm() {
        let roi = HandRoi::from_palm(&palm((100., 120.), (100., 80.)));
        assert!(roi.rotation.abs() < 1e-6);
        assert!(close((roi.cx, roi.cy), (100., 80.)));
        assert!((roi.size - 104.).abs() < 1e-4);
    }

    #[test]
    fn test_sideways_palm_shifts_toward_fingers() {
        let roi = HandRoi::from_palm(&palm((80., 100.), (120., 100.)));
        assert!((roi.rotation - PI / 2.).abs() < 1e-6);
        assert!(close((roi.cx, roi.cy), (120., 100.)));

        // the top of the crop is where the fingers point
        assert!(close(roi.to_image(0.5, 0.5), (120., 100.)));
        assert!(close(roi.to_image(0.5, 0.), (172., 100.)));
    }

    #[test]
    fn test_projection_inverts_to_image() {
        let roi = HandRoi {
            cx: 150.,
            cy: 90.,
            size: 80.,
            rotation: 0.7,
        };
        let projection = roi.projection(224).unwrap();

        let mut frame = RgbImage::new(300, 200);
        let (fx, fy) = roi.to_image(0.25, 0.75);
        for y in fy as u32 - 2..fy as u32 + 3 {
            for x in fx as u32 - 2..fx as u32 + 3 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        let mut crop = RgbImage::new(224, 224);
        warp_into(&frame, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut crop);

        assert!(crop.get_pixel(56, 168)[0] > 200);
        assert_eq!(crop.get_pixel(168, 56)[0], 0);
    }

    #[test]
    fn test_empty_region_has_no_projection() {
        let roi = HandRoi {
            cx: 0.,
            cy: 0.,
            size: 0.,
            rotation: 0.,
        };
        assert!(roi.projection(224).is_none());
    }
}
