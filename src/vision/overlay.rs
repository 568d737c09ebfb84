use log::debug;

use crate::config::types::OverlayConfig;
use crate::vision::{BoundingBox, Detection};

/// Receives the detections of every processed frame, with the model input size they refer to.
pub trait OverlaySink: Send {
    fn present(&mut self, detections: &[Detection], model_width: u32, model_height: u32);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// Maps normalized model boxes onto a view, keeping the model frame's aspect ratio and centering
/// it: `view = box * model_dimension * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayTransform {
    model_width: f32,
    model_height: f32,
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl OverlayTransform {
    pub fn new(view_width: u32, view_height: u32, model_width: u32, model_height: u32) -> Self {
        let (view_width, view_height) = (view_width as f32, view_height as f32);
        let (model_width, model_height) = (model_width.max(1) as f32, model_height.max(1) as f32);

        let scale = (view_width / model_width).min(view_height / model_height);

        OverlayTransform {
            model_width,
            model_height,
            scale,
            offset_x: (view_width - model_width * scale) / 2.0,
            offset_y: (view_height - model_height * scale) / 2.0,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn map(&self, bounding_box: &BoundingBox) -> Rect {
        let x = |value: f32| value * self.model_width * self.scale + self.offset_x;
        let y = |value: f32| value * self.model_height * self.scale + self.offset_y;

        Rect {
            left: x(bounding_box.x_min),
            top: y(bounding_box.y_min),
            right: x(bounding_box.x_max),
            bottom: y(bounding_box.y_max),
        }
    }
}

/// Caption drawn next to a box, e.g. `pessoa 81%`.
pub fn caption(detection: &Detection) -> String {
    format!("{} {}%", detection.label, (detection.confidence * 100.0) as i32)
}

/// Logs where each box would be drawn on a view of the configured size.
pub struct LoggingOverlay {
    view: OverlayConfig,
}

impl LoggingOverlay {
    pub fn new(view: OverlayConfig) -> Self {
        LoggingOverlay { view }
    }
}

impl OverlaySink for LoggingOverlay {
    fn present(&mut self, detections: &[Detection], model_width: u32, model_height: u32) {
        let transform = OverlayTransform::new(self.view.view_width, self.view.view_height, model_width, model_height);

        for detection in detections {
            let rect = transform.map(&detection.bounding_box);
            debug!(
                "{} at ({:.0}, {:.0})-({:.0}, {:.0})",
                caption(detection), rect.left, rect.top, rect.right, rect.bottom,
            );
        }
    }
}
