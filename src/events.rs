//! Event bus fanning device state changes out to subscribers.
//!
//! Each subscriber gets its own bounded queue. Publishing pushes a snapshot
//! of the event onto every queue and never blocks: a full queue simply drops
//! that delivery, so one slow consumer cannot stall the publisher or its
//! peers.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::device::DeviceState;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// A state change broadcast to subscribers.
///
/// Events carry value snapshots, never references, so late consumers cannot
/// observe future mutation. Serializes with a `type` tag matching the wire
/// format the dashboard front end relays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A device completed verification and entered the registry.
    DeviceAdded {
        /// Snapshot of the new device.
        device: DeviceState,
    },
    /// A tracked device's state changed.
    DeviceUpdated {
        /// Snapshot of the device after the change.
        device: DeviceState,
    },
    /// A device disconnected and left the registry.
    DeviceRemoved {
        /// Identifier of the removed device.
        id: String,
    },
}

struct BusInner {
    subscribers: HashMap<u64, mpsc::Sender<Event>>,
    next_id: u64,
}

/// Publish/subscribe broadcaster with per-subscriber bounded queues.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus whose subscriber queues hold up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                subscribers: HashMap::new(),
                next_id: 0,
            })),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber.
    ///
    /// The subscription unregisters itself when dropped.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);

        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.insert(id, tx);
            id
        };

        Subscription {
            id,
            rx,
            inner: self.inner.clone(),
        }
    }

    /// Publish an event to every currently-registered subscriber.
    ///
    /// The subscriber set is snapshotted under a short-held lock; deliveries
    /// happen outside it and a full or closed queue drops that delivery
    /// silently.
    pub fn publish(&self, event: &Event) {
        let senders: Vec<_> = self.inner.lock().subscribers.values().cloned().collect();

        for tx in senders {
            if tx.try_send(event.clone()).is_err() {
                trace!("subscriber queue full or gone, dropping event");
            }
        }
    }

    /// Number of currently-registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// Handle to one subscriber's event queue.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
    inner: Arc<Mutex<BusInner>>,
}

impl Subscription {
    /// Receive the next event, waiting until one is published.
    ///
    /// Returns `None` once the bus itself has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Receive the next event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.lock().subscribers.remove(&self.id);
    }
}
