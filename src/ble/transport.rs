//! Radio seams consumed by the core.
//!
//! The scan loop and connection sessions talk to the platform radio stack
//! only through these traits, keeping the state machines testable without
//! Bluetooth hardware. [`crate::ble::radio`] provides the btleplug-backed
//! production implementations.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::filter::AdvertisementRecord;

/// A single inbound notification from a peripheral.
#[derive(Debug, Clone)]
pub struct Notification {
    /// UUID of the characteristic that produced the value.
    pub characteristic: Uuid,
    /// The notification payload.
    pub data: Vec<u8>,
}

/// One peripheral found during a discovery pass.
#[derive(Clone)]
pub struct DiscoveredDevice {
    /// Advertisement snapshot used by the security filter.
    pub record: AdvertisementRecord,
    /// Transport handle for a subsequent connection attempt.
    pub link: Arc<dyn DeviceLink>,
}

/// Provider of discovery passes over nearby advertisements.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Collect a snapshot of currently-advertising peripherals.
    ///
    /// `timeout` bounds the scan window. Errors are transient: the scan loop
    /// logs them and retries on its normal cadence.
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>>;
}

/// Transport-level link to one peripheral.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Open the connection, bounded by `timeout`.
    async fn connect(&self, timeout: Duration) -> Result<()>;

    /// Enumerate the service UUIDs exposed by the connected peripheral.
    async fn service_uuids(&self) -> Result<Vec<Uuid>>;

    /// Read a characteristic value.
    async fn read(&self, characteristic: &Uuid) -> Result<Vec<u8>>;

    /// Write a characteristic value.
    async fn write(&self, characteristic: &Uuid, data: &[u8]) -> Result<()>;

    /// Enable notifications for a characteristic.
    async fn subscribe(&self, characteristic: &Uuid) -> Result<()>;

    /// Stream of notifications from all subscribed characteristics.
    ///
    /// The stream ends when the link disconnects.
    async fn notifications(&self) -> Result<BoxStream<'static, Notification>>;

    /// Whether the link is currently connected.
    async fn is_connected(&self) -> bool;

    /// Close the link.
    async fn disconnect(&self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory fakes for the radio seams.

    use super::*;
    use crate::error::Error;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// In-memory [`DeviceLink`] driven by the test.
    pub(crate) struct FakeLink {
        services: Vec<Uuid>,
        reads: Mutex<HashMap<Uuid, Vec<u8>>>,
        pub(crate) fail_connect: AtomicBool,
        pub(crate) fail_subscribe: AtomicBool,
        connected: AtomicBool,
        pub(crate) connect_count: AtomicUsize,
        pub(crate) written: Mutex<Vec<(Uuid, Vec<u8>)>>,
        notify_tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
        notify_rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    }

    impl FakeLink {
        pub(crate) fn new(services: Vec<Uuid>) -> Arc<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                services,
                reads: Mutex::new(HashMap::new()),
                fail_connect: AtomicBool::new(false),
                fail_subscribe: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                connect_count: AtomicUsize::new(0),
                written: Mutex::new(Vec::new()),
                notify_tx: Mutex::new(Some(tx)),
                notify_rx: Mutex::new(Some(rx)),
            })
        }

        /// Set the value returned by `read` for a characteristic.
        pub(crate) fn set_read(&self, characteristic: Uuid, data: Vec<u8>) {
            self.reads.lock().insert(characteristic, data);
        }

        /// Push an inbound notification.
        pub(crate) fn notify(&self, characteristic: Uuid, data: Vec<u8>) {
            if let Some(tx) = self.notify_tx.lock().as_ref() {
                let _ = tx.send(Notification {
                    characteristic,
                    data,
                });
            }
        }

        /// Drop the link as if the peripheral went away.
        pub(crate) fn simulate_disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
            self.notify_tx.lock().take();
        }
    }

    #[async_trait]
    impl DeviceLink for FakeLink {
        async fn connect(&self, _timeout: Duration) -> Result<()> {
            self.connect_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(Error::ConnectionFailed {
                    reason: "scripted failure".to_string(),
                });
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn service_uuids(&self) -> Result<Vec<Uuid>> {
            Ok(self.services.clone())
        }

        async fn read(&self, characteristic: &Uuid) -> Result<Vec<u8>> {
            self.reads.lock().get(characteristic).cloned().ok_or_else(|| {
                Error::CharacteristicNotFound {
                    uuid: characteristic.to_string(),
                }
            })
        }

        async fn write(&self, characteristic: &Uuid, data: &[u8]) -> Result<()> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(Error::NotConnected);
            }
            self.written.lock().push((*characteristic, data.to_vec()));
            Ok(())
        }

        async fn subscribe(&self, _characteristic: &Uuid) -> Result<()> {
            if self.fail_subscribe.load(Ordering::SeqCst) {
                return Err(Error::Internal("scripted subscribe failure".to_string()));
            }
            Ok(())
        }

        async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
            let rx = self
                .notify_rx
                .lock()
                .take()
                .ok_or_else(|| Error::Internal("notifications already taken".to_string()))?;
            Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|notification| (notification, rx))
            })
            .boxed())
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn disconnect(&self) -> Result<()> {
            self.simulate_disconnect();
            Ok(())
        }
    }

    /// In-memory [`Discovery`] returning a scripted device list.
    pub(crate) struct FakeDiscovery {
        pub(crate) devices: Mutex<Vec<DiscoveredDevice>>,
        pub(crate) fail: AtomicBool,
        pub(crate) calls: Mutex<Vec<tokio::time::Instant>>,
    }

    impl FakeDiscovery {
        pub(crate) fn new(devices: Vec<DiscoveredDevice>) -> Arc<Self> {
            Arc::new(Self {
                devices: Mutex::new(devices),
                fail: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn failing() -> Arc<Self> {
            let discovery = Self::new(Vec::new());
            discovery.fail.store(true, Ordering::SeqCst);
            discovery
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl Discovery for FakeDiscovery {
        async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
            self.calls.lock().push(tokio::time::Instant::now());
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Internal("scripted scan failure".to_string()));
            }
            Ok(self.devices.lock().clone())
        }
    }
}
