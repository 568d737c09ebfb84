//! Persistence for the address of the last connected peripheral.
//!
//! Values are plain strings; a missing key reads as an empty string. There is no concurrent-write
//! contract, the last writer wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use log::{info, warn};

use crate::error::ConfigError;

pub trait PairedDeviceStore: Send + Sync {
    /// Returns the stored value, or an empty string when absent.
    fn get(&self, key: &str) -> String;

    fn set(&self, key: &str, value: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PairedDeviceStore for MemoryStore {
    fn get(&self, key: &str) -> String {
        let values = self.values.lock().expect("Failed to lock MemoryStore");
        values.get(key).cloned().unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock().expect("Failed to lock MemoryStore");
        values.insert(key.to_string(), value.to_string());
    }
}

/// A flat json object on disk, rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let values = match std::fs::read(path) {
            Ok(content) if content.is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(std::str::from_utf8(&content)?)?,
            Err(err) => {
                let err = ConfigError::from(err);
                if !err.is_file_not_found_error() {
                    return Err(err);
                }
                BTreeMap::new()
            },
        };

        info!("Using paired device store {}", path.to_string_lossy());
        Ok(JsonFileStore { path: path.to_path_buf(), values: Mutex::new(values) })
    }

    /// Opens `paired-device.json` in the os dependent data directory.
    pub fn open_default() -> Result<Self, ConfigError> {
        let dirs = crate::config::io::project_dirs().ok_or(ConfigError::NoConfigPath)?;
        Self::open(&dirs.data_dir().join("paired-device.json"))
    }

    fn write(&self, values: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        if let Some(directory) = self.path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let content = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl PairedDeviceStore for JsonFileStore {
    fn get(&self, key: &str) -> String {
        let values = self.values.lock().expect("Failed to lock JsonFileStore");
        values.get(key).cloned().unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock().expect("Failed to lock JsonFileStore");
        values.insert(key.to_string(), value.to_string());

        if let Err(err) = self.write(&values) {
            warn!("Failed to persist {}: {}", key, err);
        }
    }
}
