use image::RgbImage;
use log::{info, warn};

use crate::error::DetectError;
use crate::vision::labels::LabelMap;
use crate::vision::{BoundingBox, Detection};

/// Image in, detections out.
pub trait Detector: Send {
    /// Runs detection on a normalized image. `None` means the detector is not ready, which is
    /// not an error: the frame is just skipped.
    fn detect(&mut self, image: &RgbImage) -> Option<Vec<Detection>>;
}

/// Raw SSD-style model outputs: one box, class index and score per slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutputs {
    pub boxes: Vec<[f32; 4]>,
    pub classes: Vec<f32>,
    pub scores: Vec<f32>,
}

/// The inference runtime behind a [`ModelDetector`].
pub trait InferenceEngine: Send {
    /// Engine identifier, for logs.
    fn name(&self) -> &'static str;

    fn run(&mut self, input: &RgbImage) -> Result<RawOutputs, DetectError>;
}

/// Keeps slots scoring at least `min_confidence`, in slot order, looking at no more than
/// `max_detections` slots.
pub fn decode_outputs(
    outputs: &RawOutputs,
    labels: &LabelMap,
    min_confidence: f32,
    max_detections: usize,
) -> Result<Vec<Detection>, DetectError> {
    let slots = outputs.scores.len();
    if outputs.classes.len() != slots || outputs.boxes.len() != slots {
        return Err(DetectError::OutputShape(format!(
            "{} boxes, {} classes, {} scores",
            outputs.boxes.len(),
            outputs.classes.len(),
            slots,
        )));
    }

    let detections = (0..slots.min(max_detections))
        .filter(|&i| outputs.scores[i] >= min_confidence)
        .map(|i| Detection {
            label: labels.label(outputs.classes[i]).to_string(),
            confidence: outputs.scores[i],
            bounding_box: BoundingBox::from_model(outputs.boxes[i]),
        })
        .collect();

    Ok(detections)
}

/// [`Detector`] over an inference engine that may have failed to start.
pub struct ModelDetector<E: InferenceEngine> {
    engine: Option<E>,
    labels: LabelMap,
    min_confidence: f32,
    max_detections: usize,
}

impl<E: InferenceEngine> ModelDetector<E> {
    pub fn new(engine: Result<E, DetectError>, labels: LabelMap, min_confidence: f32, max_detections: usize) -> Self {
        let engine = match engine {
            Ok(engine) => {
                info!("Inference engine {} started", engine.name());
                Some(engine)
            },
            Err(err) => {
                warn!("Failed to start inference engine: {}", err);
                None
            },
        };

        ModelDetector {
            engine,
            labels,
            min_confidence,
            max_detections,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }
}

impl<E: InferenceEngine> Detector for ModelDetector<E> {
    fn detect(&mut self, image: &RgbImage) -> Option<Vec<Detection>> {
        let engine = self.engine.as_mut()?;

        let result = engine.run(image).and_then(|outputs| {
            decode_outputs(&outputs, &self.labels, self.min_confidence, self.max_detections)
        });

        match result {
            Ok(detections) => Some(detections),
            Err(err) => {
                warn!("Detection failed: {}", err);
                None
            },
        }
    }
}

/// Reports the same detection on every frame. Stands in for a model when exercising the
/// peripheral.
#[derive(Debug, Clone)]
pub struct StubEngine {
    class: f32,
    score: f32,
}

impl StubEngine {
    pub fn new(class: usize, score: f32) -> Self {
        StubEngine { class: class as f32, score }
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn run(&mut self, _input: &RgbImage) -> Result<RawOutputs, DetectError> {
        Ok(RawOutputs {
            boxes: vec![[0.25, 0.25, 0.75, 0.75]],
            classes: vec![self.class],
            scores: vec![self.score],
        })
    }
}
