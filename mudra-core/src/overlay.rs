use crate::landmarks::{HAND_CONNECTIONS, Hand};
use image::{Rgb, RgbImage};
use imageproc::drawing;

const BONE: Rgb<u8> = Rgb([0u8, 255u8, 0u8]);
const JOINT: Rgb<u8> = Rgb([255u8, 0u8, 0u8]);
const RECORDING: Rgb<u8> = Rgb([255u8, 0u8, 0u8]);

fn to_pixels(img: &RgbImage, x: f32, y: f32) -> (f32, f32) {
    (x * img.width() as f32, y * img.height() as f32)
}

/// Draws the hand skeleton over `img`. Landmarks are in unit image
/// coordinates.
pub fn draw_hand(img: &mut RgbImage, hand: &Hand) {
    for (a, b) in HAND_CONNECTIONS {
        let start = to_pixels(img, hand.landmarks[a].x, hand.landmarks[a].y);
        let end = to_pixels(img, hand.landmarks[b].x, hand.landmarks[b].y);
        drawing::draw_line_segment_mut(img, start, end, BONE);
    }

    for lm in hand.landmarks.iter() {
        let (x, y) = to_pixels(img, lm.x, lm.y);
        drawing::draw_filled_circle_mut(img, (x.round() as i32, y.round() as i32), 3, JOINT);
    }
}

pub fn draw_recording_dot(img: &mut RgbImage) {
    let x = img.width() as i32 - 30;
    drawing::draw_filled_circle_mut(img, (x, 30), 12, RECORDING);
}
