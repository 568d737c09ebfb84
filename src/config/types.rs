use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{
    RETRY_BACKOFF, SCAN_TIMEOUT, TARGET_NAME, UART_CHARACTERISTIC, UART_SERVICE, WRITE_DEADLINE,
};
use crate::vision::{FRAME_INTERVAL, MAX_DETECTIONS, MIN_CONFIDENCE, MODEL_INPUT_SIZE};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayConfig {
    pub view_width: u32,
    pub view_height: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig {
            view_width: 1080,
            view_height: 1920,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub target_name: String,
    pub scan_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub write_deadline_ms: u64,
    pub frame_interval_ms: u64,
    pub model_width: u32,
    pub model_height: u32,
    pub min_confidence: f32,
    pub max_detections: usize,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    pub greeting: Option<String>,
    pub overlay: OverlayConfig,
}

impl Config {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target_name: TARGET_NAME.to_string(),
            scan_timeout_ms: SCAN_TIMEOUT,
            retry_backoff_ms: RETRY_BACKOFF,
            write_deadline_ms: WRITE_DEADLINE,
            frame_interval_ms: FRAME_INTERVAL,
            model_width: MODEL_INPUT_SIZE,
            model_height: MODEL_INPUT_SIZE,
            min_confidence: MIN_CONFIDENCE,
            max_detections: MAX_DETECTIONS,
            service_uuid: UART_SERVICE.to_string(),
            characteristic_uuid: UART_CHARACTERISTIC.to_string(),
            greeting: None,
            overlay: OverlayConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"targetName":"HM10","scanTimeoutMs":3000}"#).unwrap();
        assert_eq!(config.target_name, "HM10");
        assert_eq!(config.scan_timeout(), Duration::from_secs(3));
        assert_eq!(config.frame_interval(), Duration::from_millis(250));
        assert_eq!(config.retry_backoff(), Duration::from_millis(500));
        assert_eq!(config.model_width, 320);
        assert_eq!(config.greeting, None);
    }

    #[test]
    fn serializes_in_camel_case() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("\"characteristicUuid\":\"0000ffe1-0000-1000-8000-00805f9b34fb\""));
        assert!(json.contains("\"viewWidth\":1080"));
    }
}
