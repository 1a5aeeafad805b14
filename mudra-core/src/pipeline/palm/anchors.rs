const SIZE: u32 = 192;
const STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHOR_OFFSET: f32 = 0.5;
// aspect ratio 1.0 plus the interpolated scale
const ANCHORS_PER_LAYER: usize = 2;

pub const NUM_ANCHORS: usize = 2016;

/// Anchor centre in unit input coordinates. Palm anchors are fixed size, so
/// the regressor offsets are never scaled by an anchor width or height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub x: f32,
    pub y: f32,
}

// SSD anchor generation for the 192x192 palm model. Layers sharing a stride
// are merged into one grid with their anchors interleaved per cell.
pub fn gen_anchors() -> Vec<Anchor> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    let mut layer = 0;
    while layer < STRIDES.len() {
        let stride = STRIDES[layer];
        let mut last_same_stride = layer;
        while last_same_stride < STRIDES.len() && STRIDES[last_same_stride] == stride {
            last_same_stride += 1;
        }
        let per_cell = (last_same_stride - layer) * ANCHORS_PER_LAYER;

        let grid = SIZE.div_ceil(stride);
        for y in 0..grid {
            for x in 0..grid {
                let anchor = Anchor {
                    x: (x as f32 + ANCHOR_OFFSET) / grid as f32,
                    y: (y as f32 + ANCHOR_OFFSET) / grid as f32,
                };
                anchors.extend(std::iter::repeat_n(anchor, per_cell));
            }
        }

        layer = last_same_stride;
    }

    anchors
}
