use std::any::Any;
use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// How a link failure is handled by the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Abort the operation; only the next explicit trigger tries again.
    PermissionDenied,
    /// No radio. Every later operation is a no-op.
    TransportUnavailable,
    /// Retry discovery after the backoff.
    Transient,
    /// Forget the target and fall through to discovery.
    MalformedTarget,
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Error communicating with peripheral (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("Permission to use bluetooth was not granted")]
    PermissionDenied,

    #[error("No bluetooth adapter is available")]
    TransportUnavailable,

    #[error("Invalid peripheral address: {0:?}")]
    MalformedAddress(String),

    #[error("Peripheral {0} is not known to the adapter")]
    PeripheralNotFound(String),

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Bluetooth operation took too long")]
    Timeout,

    #[error("Too many writes are waiting for the peripheral")]
    WriteQueueFull,

    #[error("The peripheral writer has stopped")]
    WriterClosed,
}

impl LinkError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LinkError::PermissionDenied => FailureKind::PermissionDenied,
            LinkError::Btle { source: btleplug::Error::PermissionDenied } => FailureKind::PermissionDenied,
            LinkError::TransportUnavailable => FailureKind::TransportUnavailable,
            LinkError::MalformedAddress(_) => FailureKind::MalformedTarget,
            _ => FailureKind::Transient,
        }
    }
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Inference engine failed: {0}")]
    Engine(String),

    #[error("Inference output has an unexpected shape: {0}")]
    OutputShape(String),
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Frame dimensions overflow: {width}x{height}")]
    DimensionOverflow { width: u32, height: u32 },

    #[error("Unsupported frame rotation: {0} degrees")]
    UnsupportedRotation(u32),
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    LinkError { #[from] source: LinkError },

    #[error("Failed to read frames: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to decode frame image: {source}")]
    ImageError { #[from] source: image::ImageError },

    #[error("Invalid frame: {source}")]
    FrameError { #[from] source: FrameError },

    #[error("Peripheral did not connect in time")]
    ConnectTimeout,
}

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }
    let type_id = error.type_id();

    format!("panic from thread: [{:?}]: [{}]", type_id, stringified)
}
