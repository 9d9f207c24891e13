//! Scoreboard hub: scan loop and public surface.
//!
//! Owns the registry, event bus, and discovery provider, and drives the
//! discover -> filter -> session pipeline. Everything is explicitly
//! constructed and injected; hosts embed a hub rather than sharing globals.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::ble::radio::BleRadio;
use crate::ble::transport::Discovery;
use crate::config::HubConfig;
use crate::device::DeviceState;
use crate::error::Result;
use crate::events::{EventBus, Subscription};
use crate::registry::DeviceRegistry;
use crate::session::ConnectionSession;

/// Central hub discovering and tracking scoreboard peripherals.
pub struct ScoreboardHub {
    config: Arc<HubConfig>,
    registry: Arc<DeviceRegistry>,
    bus: EventBus,
    discovery: Arc<dyn Discovery>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    scan_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ScoreboardHub {
    /// Create a hub on the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available. This is the only
    /// fatal failure; everything later is absorbed per cycle or per device.
    pub async fn new(config: HubConfig) -> Result<Self> {
        let mut radio = BleRadio::new().await?;
        if config.strict_filter {
            radio = radio.with_service_filter(config.service_uuid);
        }
        Ok(Self::with_discovery(config, Arc::new(radio)))
    }

    /// Create a hub with an injected discovery provider.
    pub fn with_discovery(config: HubConfig, discovery: Arc<dyn Discovery>) -> Self {
        let bus = EventBus::new(config.event_queue_capacity);
        let registry = Arc::new(DeviceRegistry::new(bus.clone(), config.max_devices));

        Self {
            config: Arc::new(config),
            registry,
            bus,
            discovery,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            scan_handle: Mutex::new(None),
        }
    }

    /// Start the scan loop. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("hub already running");
            return;
        }

        info!(
            "starting scan loop for service {} (strict filtering: {})",
            self.config.service_uuid, self.config.strict_filter
        );

        let discovery = self.discovery.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();
        let running = self.running.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            Self::scan_loop(discovery, registry, config, running, shutdown).await;
        });

        *self.scan_handle.lock() = Some(handle);
    }

    /// Stop the scan loop and gracefully close every active link.
    ///
    /// Sessions observe their links dropping and publish their own
    /// `DeviceRemoved` events. Idempotent; never hangs (disconnects are
    /// bounded by the configured timeout).
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("stopping scoreboard hub");
        self.shutdown.notify_one();

        // Take the handle out of the lock before awaiting it; the guard must
        // not live across the await.
        let handle = self.scan_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        for link in self.registry.links() {
            match timeout(self.config.disconnect_timeout, link.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("disconnect failed during shutdown: {}", e),
                Err(_) => debug!("disconnect timed out during shutdown"),
            }
        }
    }

    /// Check if the scan loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of all tracked devices.
    pub fn devices(&self) -> Vec<DeviceState> {
        self.registry.snapshot()
    }

    /// Number of tracked devices.
    pub fn device_count(&self) -> usize {
        self.registry.device_count()
    }

    /// Subscribe to device state change events.
    ///
    /// New subscribers should pair this with [`Self::devices`] to frame an
    /// initial snapshot before live events.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// JSON-encode `payload` and write it to the device's outbound
    /// characteristic.
    ///
    /// Returns `false` for unknown devices and write failures rather than
    /// erroring; this is routinely called from the external API layer.
    pub async fn send_command(&self, id: &str, payload: &serde_json::Value) -> bool {
        let Some(link) = self.registry.link(id) else {
            debug!("cannot send command: device {} not tracked", id);
            return false;
        };

        let data = match serde_json::to_vec(payload) {
            Ok(data) => data,
            Err(e) => {
                warn!("cannot encode command for {}: {}", id, e);
                return false;
            }
        };

        match link.write(&self.config.outbound_char, &data).await {
            Ok(()) => {
                debug!("sent {} byte command to {}", data.len(), id);
                true
            }
            Err(e) => {
                warn!("failed to send command to {}: {}", id, e);
                false
            }
        }
    }

    /// One long-lived task: discover, filter, and spawn sessions until told
    /// to stop.
    async fn scan_loop(
        discovery: Arc<dyn Discovery>,
        registry: Arc<DeviceRegistry>,
        config: Arc<HubConfig>,
        running: Arc<AtomicBool>,
        shutdown: Arc<Notify>,
    ) {
        let policy = config.filter_policy();
        let mut consecutive_errors = 0u32;

        while running.load(Ordering::SeqCst) {
            let result = tokio::select! {
                _ = shutdown.notified() => break,
                result = discovery.discover(config.scan_timeout) => result,
            };

            match result {
                Ok(found) => {
                    consecutive_errors = 0;
                    debug!("discovery pass found {} peripherals", found.len());

                    for device in found {
                        if !policy.matches(&device.record) {
                            continue;
                        }
                        if !registry.try_reserve(&device.record.id) {
                            continue;
                        }

                        // Sessions are independent tasks: one device's
                        // failure never aborts the cycle or its peers.
                        let session = ConnectionSession::new(
                            device,
                            registry.clone(),
                            config.clone(),
                        );
                        tokio::spawn(session.run());
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        "discovery failed ({}/{}): {}",
                        consecutive_errors, config.max_consecutive_scan_errors, e
                    );

                    // Raw radio scans are flaky, but a persistent failure
                    // (e.g. radio off) should not spin the loop.
                    if consecutive_errors >= config.max_consecutive_scan_errors {
                        warn!("too many consecutive discovery failures, backing off");
                        tokio::select! {
                            _ = shutdown.notified() => break,
                            _ = sleep(config.scan_interval * 3) => {}
                        }
                        consecutive_errors = 0;
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.notified() => break,
                _ = sleep(config.scan_interval) => {}
            }
        }

        debug!("scan loop ended");
    }
}

impl Drop for ScoreboardHub {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }
}
