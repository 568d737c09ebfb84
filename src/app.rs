use std::path::{Path, PathBuf};
use std::sync::Arc;
use futures::channel::mpsc::{channel, Receiver};
use futures::StreamExt;
use log::{error, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Command};
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::btle::BtleTransport;
use crate::device::connection::{spawn_link, LinkConfig, PeripheralLink};
use crate::device::constants::ASSISTIVE_DEVICE_KEY;
use crate::device::permission::AlwaysGranted;
use crate::device::types::{LinkEvent, LinkState};
use crate::error::{readable_thread_panic_error, AppRunError};
use crate::pipeline::worker::{frame_channel, spawn_frame_worker};
use crate::pipeline::{NotificationPipeline, PipelineConfig};
use crate::store::{JsonFileStore, PairedDeviceStore};
use crate::vision::detector::{ModelDetector, StubEngine};
use crate::vision::frame::Frame;
use crate::vision::labels::LabelMap;
use crate::vision::overlay::LoggingOverlay;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn log_events_task(cancel: CancellationToken, mut events: Receiver<LinkEvent>) -> JoinHandle<()> {
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = events.next() => match event {
                    Some(LinkEvent::StateChange(state)) => info!("Peripheral: {}", state),
                    Some(LinkEvent::PeripheralMatched(address)) => info!("Found peripheral {}", address),
                    None => break 'mainloop,
                },
            }
        }
    })
}

fn interrupt_task(cancel: CancellationToken) {
    spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
            return;
        }
        info!("Interrupted");
        cancel.cancel();
    });
}

fn image_paths(dir: &Path) -> Result<Vec<PathBuf>, AppRunError> {
    let mut paths = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| IMAGE_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()))
            .unwrap_or(false);

        if is_image {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

// Decodes an image file into the packed RGB24 buffer a camera would deliver.
fn load_frame(path: &Path, rotation: u32) -> Result<Frame, AppRunError> {
    let image = image::open(path)?.to_rgb8();
    let (width, height) = image.dimensions();
    Ok(Frame::from_rgb(image.into_raw(), width, height, rotation)?)
}

async fn send_once(
    link: &PeripheralLink<BtleTransport>,
    config: &Config,
    text: String,
    address: Option<String>,
    wait: u64,
) -> Result<(), AppRunError> {
    link.connect(address.as_deref());

    let mut state = link.subscribe_state();
    let connected = timeout(
        Duration::from_secs(wait),
        state.wait_for(|state| *state == LinkState::Connected),
    ).await;

    if !matches!(connected, Ok(Ok(_))) {
        return Err(AppRunError::ConnectTimeout);
    }

    let mut line = text;
    if !line.ends_with('\n') {
        line.push('\n');
    }

    if link.send(&line) {
        info!("Sent {:?}", line);
        // the write runs in the background; give it time to reach the peripheral
        sleep(config.write_deadline()).await;
    }
    else {
        warn!("Could not send {:?}", line);
    }

    Ok(())
}

async fn watch_frames(
    link: &PeripheralLink<BtleTransport>,
    config: &Config,
    cancel: &CancellationToken,
    dir: &Path,
    rotation: u32,
    fps: u32,
    detector: ModelDetector<StubEngine>,
) -> Result<(), AppRunError> {
    let paths = image_paths(dir)?;
    info!("Feeding {} images from {}", paths.len(), dir.to_string_lossy());

    link.connect(None);

    let pipeline = NotificationPipeline::new(
        PipelineConfig::from(config),
        detector,
        link.clone(),
        LoggingOverlay::new(config.overlay),
    );
    let (sender, receiver) = frame_channel();
    let worker = spawn_frame_worker(pipeline, receiver)?;
    let frame_delay = Duration::from_millis(1000 / u64::from(fps.max(1)));

    'frames: for path in paths {
        sender.offer(load_frame(&path, rotation)?);

        tokio::select! {
            _ = cancel.cancelled() => break 'frames,
            _ = sleep(frame_delay) => {},
        }
    }

    sender.close();
    info!("{} frames replaced before the worker picked them up", sender.replaced());

    match tokio::task::spawn_blocking(move || worker.join()).await {
        Ok(Ok(stats)) => info!("Processed {} frames, started {} notifications", stats.processed, stats.notifications),
        Ok(Err(panic)) => error!("Frame worker failed: {}", readable_thread_panic_error(&panic)),
        Err(err) => error!("Failed to join frame worker: {}", err),
    }

    Ok(())
}

pub async fn run_application(cli: Cli) -> Result<(), AppRunError> {
    let mut config_io = match &cli.config {
        Some(path) => ConfigIO::with_path(path)?,
        None => ConfigIO::new_sync()?,
    };

    // one instance at a time drives the peripheral
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let config = match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            warn!("Failed to read {}: {}; using defaults", config_io.path().to_string_lossy(), err);
            Config::default()
        },
    };

    let store: Arc<dyn PairedDeviceStore> = Arc::new(match &cli.store {
        Some(path) => JsonFileStore::open(path)?,
        None => JsonFileStore::open_default()?,
    });

    if cli.command == Command::Forget {
        let address = store.get(ASSISTIVE_DEVICE_KEY);
        store.set(ASSISTIVE_DEVICE_KEY, "");
        info!("Forgot peripheral {:?}", address);
        return Ok(());
    }

    let transport = BtleTransport::new(&config).await?;
    let cancel = CancellationToken::new();
    interrupt_task(cancel.clone());

    let (event_sender, event_receiver) = channel::<LinkEvent>(64);
    let events_handle = log_events_task(cancel.clone(), event_receiver);

    let (link, link_handle) = spawn_link(
        transport,
        store,
        Arc::new(AlwaysGranted),
        LinkConfig::from(&config),
        cancel.child_token(),
        vec![event_sender],
    );

    let result = match cli.command {
        Command::Scan => {
            link.start_discovery_loop();
            cancel.cancelled().await;
            Ok(())
        },
        Command::Send { text, address, wait } => send_once(&link, &config, text, address, wait).await,
        Command::Watch { dir, rotation, fps, class, score } => {
            let detector = ModelDetector::new(
                Ok(StubEngine::new(class, score)),
                LabelMap::coco_pt(),
                config.min_confidence,
                config.max_detections,
            );
            watch_frames(&link, &config, &cancel, &dir, rotation, fps, detector).await
        },
        Command::Forget => Ok(()),
    };

    link.shutdown();
    if let Err(err) = link_handle.await {
        warn!("Connection task failed: {}", err);
    }

    cancel.cancel();
    if let Err(err) = events_handle.await {
        warn!("Event task failed: {}", err);
    }

    result
}
