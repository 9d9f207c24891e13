//! Device registry: single source of truth for known devices.
//!
//! One mutex guards the device map, the in-flight connection set, and the
//! live link handles. Every mutation publishes its event while still holding
//! the lock, so a registry snapshot is always consistent with the most
//! recently published event for each device. Publishing never blocks (the
//! bus drops on backpressure), and the lock is never held across I/O.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ble::transport::DeviceLink;
use crate::codec::TelemetryUpdate;
use crate::device::DeviceState;
use crate::events::{Event, EventBus};

#[derive(Default)]
struct RegistryInner {
    devices: HashMap<String, DeviceState>,
    connecting: HashSet<String>,
    links: HashMap<String, Arc<dyn DeviceLink>>,
}

/// Mutex-guarded mapping of device identifier to device state, plus session
/// bookkeeping.
pub struct DeviceRegistry {
    inner: Mutex<RegistryInner>,
    bus: EventBus,
    max_devices: usize,
}

impl DeviceRegistry {
    /// Create a registry publishing onto `bus`, capped at `max_devices`.
    pub fn new(bus: EventBus, max_devices: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            bus,
            max_devices,
        }
    }

    /// Atomically reserve an identifier for a new connection session.
    ///
    /// Fails if the device is already tracked or connecting, or if the
    /// combined tracked + connecting count has reached the maximum. The
    /// test-and-set runs under the registry lock so two scan cycles racing
    /// on the same identifier produce exactly one session.
    pub fn try_reserve(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();

        if inner.devices.contains_key(id) || inner.connecting.contains(id) {
            debug!("device {} already tracked or connecting, skipping", id);
            return false;
        }

        if inner.devices.len() + inner.connecting.len() >= self.max_devices {
            warn!(
                "maximum device count ({}) reached, ignoring {}",
                self.max_devices, id
            );
            return false;
        }

        inner.connecting.insert(id.to_string());
        true
    }

    /// Release a reservation for a session that never activated.
    pub fn release(&self, id: &str) {
        self.inner.lock().connecting.remove(id);
    }

    /// Promote a verified device to tracked state and publish `DeviceAdded`.
    ///
    /// Replaces any stale entry under the same identifier.
    pub fn activate(&self, device: DeviceState, link: Arc<dyn DeviceLink>) {
        let mut inner = self.inner.lock();
        let id = device.id.clone();
        inner.connecting.remove(&id);
        inner.links.insert(id.clone(), link);
        inner.devices.insert(id.clone(), device.clone());
        self.bus.publish(&Event::DeviceAdded { device });
        drop(inner);

        info!("device {} added to registry", id);
    }

    /// Apply a telemetry update and publish `DeviceUpdated` if it changed
    /// anything.
    ///
    /// Returns whether an event was published. Unknown identifiers and
    /// no-op updates are silently ignored.
    pub fn apply_update(&self, id: &str, update: &TelemetryUpdate) -> bool {
        let mut inner = self.inner.lock();

        let Some(device) = inner.devices.get_mut(id) else {
            return false;
        };

        if !device.apply(update) {
            return false;
        }

        let snapshot = device.clone();
        self.bus.publish(&Event::DeviceUpdated { device: snapshot });
        true
    }

    /// Remove a device and publish `DeviceRemoved` if it was tracked.
    ///
    /// Also clears any reservation or link handle. Idempotent.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.connecting.remove(id);
        inner.links.remove(id);

        if inner.devices.remove(id).is_some() {
            self.bus.publish(&Event::DeviceRemoved { id: id.to_string() });
            drop(inner);
            info!("device {} removed from registry", id);
            true
        } else {
            false
        }
    }

    /// Snapshot of all tracked devices.
    pub fn snapshot(&self) -> Vec<DeviceState> {
        self.inner.lock().devices.values().cloned().collect()
    }

    /// Look up the live link for a tracked device.
    pub fn link(&self, id: &str) -> Option<Arc<dyn DeviceLink>> {
        self.inner.lock().links.get(id).cloned()
    }

    /// All live links (used for graceful shutdown).
    pub fn links(&self) -> Vec<Arc<dyn DeviceLink>> {
        self.inner.lock().links.values().cloned().collect()
    }

    /// Number of tracked devices.
    pub fn device_count(&self) -> usize {
        self.inner.lock().devices.len()
    }

    /// Number of tracked devices plus in-flight connection attempts.
    pub fn active_and_pending(&self) -> usize {
        let inner = self.inner.lock();
        inner.devices.len() + inner.connecting.len()
    }

    /// The bus this registry publishes onto.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}
