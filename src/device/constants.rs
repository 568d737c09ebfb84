use uuid::Uuid;

/**
 * Advertised local name of the assistive peripheral (HM-10 clone).
 */
pub const TARGET_NAME: &str = "BT05";

/**
 * How long (milliseconds) a single scan cycle may run before it is stopped.
 */
pub const SCAN_TIMEOUT: u64 = 5000;

/**
 * How long (milliseconds) to wait before scanning again after a failed cycle.
 */
pub const RETRY_BACKOFF: u64 = 500;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How many writes may wait for the peripheral before `send` starts refusing them.
 */
pub const WRITE_QUEUE: usize = 32;

/**
 * How long (milliseconds) connecting or resolving services may take.
 */
pub const CONNECT_DEADLINE: u64 = 10000;

/**
 * Store key holding the address of the last connected peripheral.
 */
pub const ASSISTIVE_DEVICE_KEY: &str = "assistive_device_mac";

/**
 * The UUID of the HM-10 style UART service
 */
pub const UART_SERVICE: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";

/**
 * The UUID of the writable UART characteristic that receives the notification text.
 */
pub const UART_CHARACTERISTIC: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

pub fn make_uart_service_uuid() -> Uuid {
    Uuid::parse_str(UART_SERVICE).unwrap()
}

pub fn make_uart_characteristic_uuid() -> Uuid {
    Uuid::parse_str(UART_CHARACTERISTIC).unwrap()
}

// falls back to the UART uuids when the configured value does not parse
pub fn parse_uuid_or(value: &str, fallback: fn() -> Uuid) -> Uuid {
    match Uuid::parse_str(value) {
        Ok(uuid) => uuid,
        Err(err) => {
            log::warn!("Invalid uuid {:?} in config ({}); using default", value, err);
            fallback()
        },
    }
}
