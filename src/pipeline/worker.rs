use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use log::info;

use crate::pipeline::{FrameOutcome, NotificationPipeline, Notifier};
use crate::vision::detector::Detector;
use crate::vision::frame::Frame;
use crate::vision::overlay::OverlaySink;

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    closed: bool,
}

#[derive(Default)]
struct SlotShared {
    slot: Mutex<Slot>,
    ready: Condvar,
    replaced: AtomicU64,
}

/// Producer side of a single-slot, keep-latest frame hand-off.
pub struct FrameSender {
    shared: Arc<SlotShared>,
}

/// Consumer side of the frame hand-off; owned by the worker thread.
pub struct FrameReceiver {
    shared: Arc<SlotShared>,
}

pub fn frame_channel() -> (FrameSender, FrameReceiver) {
    let shared = Arc::new(SlotShared::default());
    (FrameSender { shared: shared.clone() }, FrameReceiver { shared })
}

impl FrameSender {
    /// Hands over a frame without blocking. A frame the worker has not picked up yet is released
    /// and replaced. Returns false (releasing `frame`) once the channel is closed.
    pub fn offer(&self, frame: Frame) -> bool {
        let stale = {
            let mut slot = self.shared.slot.lock().expect("Failed to lock frame slot");
            if slot.closed {
                drop(slot);
                frame.release();
                return false;
            }
            slot.frame.replace(frame)
        };

        self.shared.ready.notify_one();

        if let Some(stale) = stale {
            self.shared.replaced.fetch_add(1, Ordering::Relaxed);
            stale.release();
        }
        true
    }

    /// Frames released because a newer one arrived first.
    pub fn replaced(&self) -> u64 {
        self.shared.replaced.load(Ordering::Relaxed)
    }

    /// Stops the worker after its current frame. A waiting frame is released.
    pub fn close(&self) {
        let pending = {
            let mut slot = self.shared.slot.lock().expect("Failed to lock frame slot");
            slot.closed = true;
            slot.frame.take()
        };

        self.shared.ready.notify_all();
        drop(pending);
    }
}

impl Drop for FrameSender {
    fn drop(&mut self) {
        self.close();
    }
}

impl FrameReceiver {
    /// Blocks until a frame is available, or returns `None` once the channel is closed.
    pub fn recv(&self) -> Option<Frame> {
        let mut slot = self.shared.slot.lock().expect("Failed to lock frame slot");

        loop {
            if slot.closed {
                return None;
            }
            if let Some(frame) = slot.frame.take() {
                return Some(frame);
            }
            slot = self.shared.ready.wait(slot).expect("Failed to wait for frame slot");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub throttled: u64,
    pub unavailable: u64,
    pub detections: u64,
    pub notifications: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &FrameOutcome) {
        match outcome {
            FrameOutcome::Throttled => self.throttled += 1,
            FrameOutcome::DetectorUnavailable => self.unavailable += 1,
            FrameOutcome::Processed { detections, delivered } => {
                self.processed += 1;
                self.detections += detections.len() as u64;
                self.notifications += *delivered as u64;
            },
        }
    }
}

/// Runs the pipeline on its own thread, one frame at a time, until the sender is closed.
pub fn spawn_frame_worker<D, N, O>(
    mut pipeline: NotificationPipeline<D, N, O>,
    receiver: FrameReceiver,
) -> io::Result<JoinHandle<WorkerStats>>
where
    D: Detector + 'static,
    N: Notifier + 'static,
    O: OverlaySink + 'static,
{
    thread::Builder::new()
        .name("frame-worker".to_string())
        .spawn(move || {
            let mut stats = WorkerStats::default();

            while let Some(frame) = receiver.recv() {
                let outcome = pipeline.process(frame, Instant::now());
                stats.record(&outcome);
            }

            info!("Frame worker stopped: {:?}", stats);
            stats
        })
}
