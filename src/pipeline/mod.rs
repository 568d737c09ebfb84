//! Camera frames to peripheral notifications.

use std::time::{Duration, Instant};
use log::debug;

use crate::config::types::Config;
use crate::device::connection::PeripheralLink;
use crate::device::transport::Transport;
use crate::vision::detector::Detector;
use crate::vision::frame::Frame;
use crate::vision::normalize::normalize;
use crate::vision::overlay::OverlaySink;
use crate::vision::Detection;

pub mod worker;

/// Where notification text goes. `send` must not block and reports whether delivery started.
pub trait Notifier: Send {
    fn send(&self, text: &str) -> bool;
}

impl<T: Transport> Notifier for PeripheralLink<T> {
    fn send(&self, text: &str) -> bool {
        PeripheralLink::send(self, text)
    }
}

/// The line written to the peripheral for one detection.
pub fn format_message(detection: &Detection) -> String {
    format!("Objeto {} detectado com {}\n", detection.label, detection.confidence)
}

/// Accepts at most one frame per interval, measured from the last accepted frame.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Throttle { interval, last_accepted: None }
    }

    pub fn try_accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }

        self.last_accepted = Some(now);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub frame_interval: Duration,
    pub model_width: u32,
    pub model_height: u32,
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        PipelineConfig {
            frame_interval: config.frame_interval(),
            model_width: config.model_width,
            model_height: config.model_height,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig::from(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Arrived within the throttle interval; released without running detection.
    Throttled,
    /// The detector is not ready; nothing was sent.
    DetectorUnavailable,
    Processed {
        detections: Vec<Detection>,
        /// How many `send` calls started a write.
        delivered: usize,
    },
}

pub struct NotificationPipeline<D: Detector, N: Notifier, O: OverlaySink> {
    config: PipelineConfig,
    throttle: Throttle,
    detector: D,
    notifier: N,
    overlay: O,
}

impl<D: Detector, N: Notifier, O: OverlaySink> NotificationPipeline<D, N, O> {
    pub fn new(config: PipelineConfig, detector: D, notifier: N, overlay: O) -> Self {
        NotificationPipeline {
            config,
            throttle: Throttle::new(config.frame_interval),
            detector,
            notifier,
            overlay,
        }
    }

    /// Handles one frame that arrived at `now`. The frame is released before this returns.
    pub fn process(&mut self, frame: Frame, now: Instant) -> FrameOutcome {
        if !self.throttle.try_accept(now) {
            frame.release();
            return FrameOutcome::Throttled;
        }

        let image = normalize(&frame, self.config.model_width, self.config.model_height);
        frame.release();

        let Some(detections) = self.detector.detect(&image) else {
            debug!("Detector not ready; skipping frame");
            return FrameOutcome::DetectorUnavailable;
        };

        self.overlay.present(&detections, self.config.model_width, self.config.model_height);

        let delivered = detections
            .iter()
            .filter(|detection| self.notifier.send(&format_message(detection)))
            .count();

        if !detections.is_empty() {
            debug!("{} detections, {} notifications started", detections.len(), delivered);
        }

        FrameOutcome::Processed { detections, delivered }
    }
}
