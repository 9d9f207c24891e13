//! btleplug-backed discovery and device links.
//!
//! Production implementations of the [`Discovery`] and [`DeviceLink`] seams.
//! Only catastrophic adapter bring-up failure is fatal; everything after
//! construction surfaces as per-call errors the scan loop and sessions
//! absorb.

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace};
use uuid::Uuid;

use crate::ble::transport::{DeviceLink, DiscoveredDevice, Discovery, Notification};
use crate::error::{Error, Result};
use crate::filter::AdvertisementRecord;

/// Discovery provider backed by the first available Bluetooth adapter.
pub struct BleRadio {
    adapter: Adapter,
    scan_filter: ScanFilter,
}

impl BleRadio {
    /// Create a radio on the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self {
            adapter,
            scan_filter: ScanFilter::default(),
        })
    }

    /// Create a radio with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_filter: ScanFilter::default(),
        }
    }

    /// Restrict the platform-level scan to one service UUID.
    ///
    /// More efficient where the platform honors it; the security filter
    /// still re-checks every record.
    pub fn with_service_filter(mut self, service: Uuid) -> Self {
        self.scan_filter = ScanFilter {
            services: vec![service],
        };
        self
    }
}

#[async_trait]
impl Discovery for BleRadio {
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        self.adapter
            .start_scan(self.scan_filter.clone())
            .await
            .map_err(Error::Bluetooth)?;

        tokio::time::sleep(timeout).await;

        let peripherals = self.adapter.peripherals().await.map_err(Error::Bluetooth)?;

        if let Err(e) = self.adapter.stop_scan().await {
            trace!("Failed to stop scan: {}", e);
        }

        let mut found = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(p)) => p,
                _ => continue,
            };

            let record = AdvertisementRecord {
                id: properties.address.to_string(),
                local_name: properties.local_name,
                services: properties.services,
                service_data: properties.service_data,
                manufacturer_data: properties.manufacturer_data,
                rssi: properties.rssi,
            };

            found.push(DiscoveredDevice {
                record,
                link: Arc::new(BleLink { peripheral }),
            });
        }

        Ok(found)
    }
}

/// Transport link to one btleplug peripheral.
pub struct BleLink {
    peripheral: Peripheral,
}

impl BleLink {
    /// Wrap a peripheral handle.
    pub fn new(peripheral: Peripheral) -> Self {
        Self { peripheral }
    }

    fn characteristic(&self, uuid: &Uuid) -> Result<btleplug::api::Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == *uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

#[async_trait]
impl DeviceLink for BleLink {
    async fn connect(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.peripheral.connect()).await {
            Ok(Ok(())) => {
                self.peripheral
                    .discover_services()
                    .await
                    .map_err(Error::Bluetooth)?;
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Bluetooth(e)),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn service_uuids(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .peripheral
            .services()
            .iter()
            .map(|service| service.uuid)
            .collect())
    }

    async fn read(&self, characteristic: &Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .read(&characteristic)
            .await
            .map_err(Error::Bluetooth)
    }

    async fn write(&self, characteristic: &Uuid, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await
            .map_err(Error::Bluetooth)
    }

    async fn subscribe(&self, characteristic: &Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        let stream = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;

        Ok(stream
            .map(|notification| Notification {
                characteristic: notification.uuid,
                data: notification.value,
            })
            .boxed())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await.map_err(Error::Bluetooth)
    }
}
