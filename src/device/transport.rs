use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::device::types::PeripheralAddress;
use crate::error::LinkError;

/// Adapter notifications, delivered as they happen rather than polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Discovered {
        address: PeripheralAddress,
        name: Option<String>,
    },
    Disconnected {
        address: PeripheralAddress,
    },
}

/// The radio underneath a [`PeripheralLink`](crate::device::connection::PeripheralLink).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Writable endpoint of a connected peripheral, resolved during service discovery.
    type Channel: Clone + Send + Sync + 'static;

    /// Subscribes to adapter notifications. Called once, before any other operation.
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, LinkError>;

    async fn start_scan(&self) -> Result<(), LinkError>;

    async fn stop_scan(&self) -> Result<(), LinkError>;

    async fn connect(&self, address: &PeripheralAddress) -> Result<(), LinkError>;

    /// Resolves the service and the writable characteristic of a connected peripheral.
    async fn discover_channel(&self, address: &PeripheralAddress) -> Result<Self::Channel, LinkError>;

    /// Starts a single write and returns without waiting for the peripheral.
    fn begin_write(&self, channel: &Self::Channel, payload: Vec<u8>) -> Result<(), LinkError>;

    async fn disconnect(&self, address: &PeripheralAddress) -> Result<(), LinkError>;
}
