//! Camera frames in, labelled detections out.

pub mod detector;
pub mod frame;
pub mod labels;
pub mod normalize;
pub mod overlay;

/// Minimum time (milliseconds) between two processed camera frames.
pub const FRAME_INTERVAL: u64 = 250;

/// Side length of the square image the detector expects.
pub const MODEL_INPUT_SIZE: u32 = 320;

/// Detections scoring below this are dropped.
pub const MIN_CONFIDENCE: f32 = 0.55;

/// Number of detection slots in the model output.
pub const MAX_DETECTIONS: usize = 25;

/// Normalized `[0, 1]` box in model output order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub y_min: f32,
    pub x_min: f32,
    pub y_max: f32,
    pub x_max: f32,
}

impl BoundingBox {
    pub fn from_model(values: [f32; 4]) -> Self {
        BoundingBox {
            y_min: values[0],
            x_min: values[1],
            y_max: values[2],
            x_max: values[3],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}
