use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use crate::config::types::Config;
use crate::device::constants::{
    make_uart_characteristic_uuid, make_uart_service_uuid, parse_uuid_or, CONNECT_DEADLINE, WRITE_QUEUE,
};
use crate::device::transport::{Transport, TransportEvent};
use crate::device::types::PeripheralAddress;
use crate::device::writer::SerialWriter;
use crate::error::LinkError;

#[derive(Debug, Clone)]
pub struct BtleChannel {
    writer: SerialWriter,
}

type KnownPeripherals = Arc<Mutex<HashMap<PeripheralAddress, PeripheralId>>>;

/// [`Transport`] over the first bluetooth adapter reported by the OS.
pub struct BtleTransport {
    adapter: Adapter,
    known: KnownPeripherals,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    write_deadline: Duration,
}

// CoreBluetooth hides hardware addresses and reports all zeroes; such peripherals are told apart by
// their platform id instead.
fn address_of(address: BDAddr, id: &PeripheralId) -> PeripheralAddress {
    if address != BDAddr::default() {
        if let Ok(address) = PeripheralAddress::parse(&address.to_string()) {
            return address;
        }
    }

    PeripheralAddress::from_platform_id(&format!("{:?}", id))
}

fn remember(known: &KnownPeripherals, address: &PeripheralAddress, id: &PeripheralId) {
    if let Ok(mut known) = known.lock() {
        known.insert(address.clone(), id.clone());
    }
}

impl BtleTransport {
    pub async fn new(config: &Config) -> Result<Self, LinkError> {
        let manager = match Manager::new().await {
            Ok(manager) => manager,
            Err(err) => {
                warn!("Failed to open the bluetooth stack: {:?}", err);
                return Err(LinkError::TransportUnavailable);
            },
        };

        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(LinkError::TransportUnavailable)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        Ok(BtleTransport {
            adapter,
            known: Arc::new(Mutex::new(HashMap::new())),
            service_uuid: parse_uuid_or(&config.service_uuid, make_uart_service_uuid),
            characteristic_uuid: parse_uuid_or(&config.characteristic_uuid, make_uart_characteristic_uuid),
            write_deadline: config.write_deadline(),
        })
    }

    async fn find_peripheral(&self, address: &PeripheralAddress) -> Result<Peripheral, LinkError> {
        let id = match self.known.lock() {
            Ok(known) => known.get(address).cloned(),
            Err(_) => None,
        };

        if let Some(id) = id {
            return Ok(self.adapter.peripheral(&id).await?);
        }

        // not advertised since start, but the adapter may still know it from an earlier session
        for peripheral in self.adapter.peripherals().await? {
            let id = peripheral.id();
            if address_of(peripheral.address(), &id) == *address {
                remember(&self.known, address, &id);
                return Ok(peripheral);
            }
        }

        Err(LinkError::PeripheralNotFound(address.to_string()))
    }
}

#[async_trait]
impl Transport for BtleTransport {
    type Channel = BtleChannel;

    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, LinkError> {
        let adapter = self.adapter.clone();
        let known = self.known.clone();
        let events = self.adapter.events().await?;

        let events = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let known = known.clone();

            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let peripheral = adapter.peripheral(&id).await.ok()?;
                        let properties = match peripheral.properties().await {
                            Ok(Some(properties)) => properties,
                            Ok(None) => return None,
                            Err(err) => {
                                debug!("Could not query peripheral for properties: {:?}", err);
                                return None;
                            },
                        };

                        let address = address_of(properties.address, &id);
                        remember(&known, &address, &id);

                        Some(TransportEvent::Discovered {
                            address,
                            name: properties.local_name,
                        })
                    },
                    CentralEvent::DeviceDisconnected(id) => {
                        let peripheral = adapter.peripheral(&id).await.ok()?;
                        Some(TransportEvent::Disconnected {
                            address: address_of(peripheral.address(), &id),
                        })
                    },
                    _ => None,
                }
            }
        });

        Ok(events.boxed())
    }

    async fn start_scan(&self) -> Result<(), LinkError> {
        // the target is matched by name, which a service filter would hide on some platforms
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), LinkError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, address: &PeripheralAddress) -> Result<(), LinkError> {
        let peripheral = self.find_peripheral(address).await?;

        if peripheral.is_connected().await? {
            return Ok(());
        }

        match timeout(Duration::from_millis(CONNECT_DEADLINE), peripheral.connect()).await {
            Err(_) => Err(LinkError::Timeout),
            Ok(result) => Ok(result?),
        }
    }

    async fn discover_channel(&self, address: &PeripheralAddress) -> Result<BtleChannel, LinkError> {
        let peripheral = self.find_peripheral(address).await?;

        info!("Connected; Discovering services...");
        match timeout(Duration::from_millis(CONNECT_DEADLINE), peripheral.discover_services()).await {
            Err(_) => return Err(LinkError::Timeout),
            Ok(result) => result?,
        }

        for service in peripheral.services() {
            if !service.uuid.eq(&self.service_uuid) {
                continue;
            }

            for characteristic in &service.characteristics {
                if !characteristic.uuid.eq(&self.characteristic_uuid) {
                    continue;
                }

                let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
                    WriteType::WithResponse
                }
                else if characteristic.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
                    WriteType::WithoutResponse
                }
                else {
                    warn!("Characteristic {:?} is not writable", characteristic.uuid);
                    return Err(LinkError::MissingCharacteristic);
                };

                info!("Writing to characteristic {:?} {:?} ({:?})", service.uuid, characteristic.uuid, write_type);

                let peripheral = peripheral.clone();
                let characteristic = characteristic.clone();
                let writer = SerialWriter::spawn(WRITE_QUEUE, self.write_deadline, move |payload: Vec<u8>| {
                    let peripheral = peripheral.clone();
                    let characteristic = characteristic.clone();
                    async move { peripheral.write(&characteristic, &payload, write_type).await }
                });

                return Ok(BtleChannel { writer });
            }
        }

        Err(LinkError::MissingCharacteristic)
    }

    fn begin_write(&self, channel: &BtleChannel, payload: Vec<u8>) -> Result<(), LinkError> {
        channel.writer.try_write(payload)
    }

    async fn disconnect(&self, address: &PeripheralAddress) -> Result<(), LinkError> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral.disconnect().await?;
        Ok(())
    }
}
