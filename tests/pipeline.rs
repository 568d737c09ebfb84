mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use image::{Rgb, RgbImage};

use assistive_link::device::constants::ASSISTIVE_DEVICE_KEY;
use assistive_link::device::types::LinkState;
use assistive_link::error::FrameError;
use assistive_link::pipeline::worker::{frame_channel, spawn_frame_worker};
use assistive_link::pipeline::{FrameOutcome, NotificationPipeline, Notifier, PipelineConfig};
use assistive_link::store::PairedDeviceStore;
use assistive_link::vision::detector::{Detector, ModelDetector, StubEngine};
use assistive_link::vision::frame::Frame;
use assistive_link::vision::labels::LabelMap;
use assistive_link::vision::overlay::OverlaySink;
use assistive_link::vision::{BoundingBox, Detection};

use common::{start, TARGET};

fn detection(label: &str, confidence: f32) -> Detection {
    Detection {
        label: label.to_string(),
        confidence,
        bounding_box: BoundingBox { y_min: 0.1, x_min: 0.1, y_max: 0.9, x_max: 0.9 },
    }
}

/// Returns the same answer for every frame and remembers the image sizes it was given.
struct ScriptedDetector {
    answer: Option<Vec<Detection>>,
    inputs: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, image: &RgbImage) -> Option<Vec<Detection>> {
        self.inputs.lock().unwrap().push(image.dimensions());
        self.answer.clone()
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    connected: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl Notifier for RecordingNotifier {
    fn send(&self, text: &str) -> bool {
        self.sent.lock().unwrap().push(text.to_string());
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
struct RecordingOverlay {
    presented: Arc<Mutex<Vec<(Vec<Detection>, u32, u32)>>>,
}

impl OverlaySink for RecordingOverlay {
    fn present(&mut self, detections: &[Detection], model_width: u32, model_height: u32) {
        self.presented.lock().unwrap().push((detections.to_vec(), model_width, model_height));
    }
}

struct Fixture {
    pipeline: NotificationPipeline<ScriptedDetector, RecordingNotifier, RecordingOverlay>,
    inputs: Arc<Mutex<Vec<(u32, u32)>>>,
    notifier: RecordingNotifier,
    overlay: RecordingOverlay,
}

fn fixture(answer: Option<Vec<Detection>>, connected: bool) -> Fixture {
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let notifier = RecordingNotifier::default();
    notifier.connected.store(connected, Ordering::SeqCst);
    let overlay = RecordingOverlay::default();

    let pipeline = NotificationPipeline::new(
        PipelineConfig::default(),
        ScriptedDetector { answer, inputs: inputs.clone() },
        notifier.clone(),
        overlay.clone(),
    );

    Fixture { pipeline, inputs, notifier, overlay }
}

fn camera_frame(released: &Arc<AtomicUsize>) -> Frame {
    let released = released.clone();
    let pixels = RgbImage::from_pixel(640, 480, Rgb([40, 80, 120])).into_raw();
    Frame::from_rgb(pixels, 640, 480, 90)
        .unwrap()
        .with_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
}

#[test]
fn short_camera_buffer_is_rejected() {
    let pixels = vec![0u8; 640 * 480 * 3 - 1];
    assert!(matches!(
        Frame::from_rgb(pixels, 640, 480, 0),
        Err(FrameError::LengthMismatch { expected: 921_600, actual: 921_599 }),
    ));
}

#[test]
fn oversized_camera_dimensions_are_rejected() {
    assert!(matches!(
        Frame::from_rgb(Vec::new(), 65_536, 65_536, 0),
        Err(FrameError::DimensionOverflow { width: 65_536, height: 65_536 }),
    ));
}

#[test]
fn frame_within_interval_is_released_without_detection() {
    let mut fixture = fixture(Some(vec![detection("pessoa", 0.81)]), true);
    let released = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    fixture.pipeline.process(camera_frame(&released), start);
    let outcome = fixture.pipeline.process(camera_frame(&released), start + Duration::from_millis(100));

    assert_eq!(outcome, FrameOutcome::Throttled);
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(fixture.inputs.lock().unwrap().len(), 1);
    assert_eq!(fixture.notifier.sent.lock().unwrap().len(), 1);
}

#[test]
fn detection_is_sent_while_connected() {
    let mut fixture = fixture(Some(vec![detection("pessoa", 0.81)]), true);
    let released = Arc::new(AtomicUsize::new(0));

    let outcome = fixture.pipeline.process(camera_frame(&released), Instant::now());

    assert_eq!(outcome, FrameOutcome::Processed {
        detections: vec![detection("pessoa", 0.81)],
        delivered: 1,
    });
    assert_eq!(*fixture.notifier.sent.lock().unwrap(), vec!["Objeto pessoa detectado com 0.81\n".to_string()]);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn detection_is_offered_but_not_delivered_while_disconnected() {
    let mut fixture = fixture(Some(vec![detection("pessoa", 0.81)]), false);
    let released = Arc::new(AtomicUsize::new(0));

    let outcome = fixture.pipeline.process(camera_frame(&released), Instant::now());

    assert!(matches!(outcome, FrameOutcome::Processed { delivered: 0, .. }));
    assert_eq!(fixture.notifier.sent.lock().unwrap().len(), 1);
}

#[test]
fn unavailable_detector_sends_nothing() {
    let mut fixture = fixture(None, true);
    let released = Arc::new(AtomicUsize::new(0));

    let outcome = fixture.pipeline.process(camera_frame(&released), Instant::now());

    assert_eq!(outcome, FrameOutcome::DetectorUnavailable);
    assert!(fixture.notifier.sent.lock().unwrap().is_empty());
    assert!(fixture.overlay.presented.lock().unwrap().is_empty());
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn detections_are_sent_in_detector_order() {
    let detections = vec![detection("cadeira", 0.9), detection("pessoa", 0.7), detection("copo", 0.6)];
    let mut fixture = fixture(Some(detections.clone()), true);
    let released = Arc::new(AtomicUsize::new(0));

    fixture.pipeline.process(camera_frame(&released), Instant::now());

    assert_eq!(*fixture.notifier.sent.lock().unwrap(), vec![
        "Objeto cadeira detectado com 0.9\n".to_string(),
        "Objeto pessoa detectado com 0.7\n".to_string(),
        "Objeto copo detectado com 0.6\n".to_string(),
    ]);
    assert_eq!(*fixture.overlay.presented.lock().unwrap(), vec![(detections, 320, 320)]);
}

#[test]
fn detector_sees_model_sized_input() {
    let mut fixture = fixture(Some(Vec::new()), true);
    let released = Arc::new(AtomicUsize::new(0));

    let outcome = fixture.pipeline.process(camera_frame(&released), Instant::now());

    assert_eq!(outcome, FrameOutcome::Processed { detections: Vec::new(), delivered: 0 });
    assert_eq!(*fixture.inputs.lock().unwrap(), vec![(320, 320)]);
    assert_eq!(*fixture.overlay.presented.lock().unwrap(), vec![(Vec::new(), 320, 320)]);
}

#[test]
fn worker_drains_frames_until_closed() {
    let fixture = fixture(Some(vec![detection("pessoa", 0.81)]), true);
    let sent = fixture.notifier.sent.clone();
    let released = Arc::new(AtomicUsize::new(0));

    let (sender, receiver) = frame_channel();
    let worker = spawn_frame_worker(fixture.pipeline, receiver).unwrap();

    assert!(sender.offer(camera_frame(&released)));
    while released.load(Ordering::SeqCst) == 0 {
        std::thread::sleep(Duration::from_millis(1));
    }
    sender.close();

    let stats = worker.join().unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.notifications, 1);
    assert_eq!(sent.lock().unwrap().len(), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn pipeline_writes_to_connected_peripheral() {
    let harness = start();
    harness.store.set(ASSISTIVE_DEVICE_KEY, TARGET);

    let mut pipeline = NotificationPipeline::new(
        PipelineConfig::default(),
        ModelDetector::new(Ok(StubEngine::new(0, 0.81)), LabelMap::coco_pt(), 0.55, 25),
        harness.link.clone(),
        RecordingOverlay::default(),
    );
    let released = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let outcome = pipeline.process(camera_frame(&released), start);
    assert!(matches!(outcome, FrameOutcome::Processed { delivered: 0, .. }));
    assert!(harness.radio.writes().is_empty());

    harness.link.connect(None);
    harness.wait_for(LinkState::Connected).await;

    let outcome = pipeline.process(camera_frame(&released), start + Duration::from_millis(250));
    assert!(matches!(outcome, FrameOutcome::Processed { delivered: 1, .. }));
    assert_eq!(harness.radio.writes(), vec!["Objeto pessoa detectado com 0.81\n".to_string()]);
    assert_eq!(released.load(Ordering::SeqCst), 2);
}
