//! Per-device connection session.
//!
//! Drives one device through connect -> verify -> subscribe -> run ->
//! disconnect. Sessions are spawned by the scan loop, one per reserved
//! identifier, and own their transport link for their whole lifetime.
//! A session failure only ever affects its own device.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::ble::transport::{DeviceLink, DiscoveredDevice};
use crate::codec;
use crate::config::HubConfig;
use crate::device::DeviceState;
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;

/// Interval for the connectivity poll while no notifications arrive.
const LIVENESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Opening the transport-level connection.
    #[default]
    Connecting,
    /// Connected; verifying the device exposes the scoreboard service.
    ServiceVerifying,
    /// Verified and registered; consuming telemetry.
    Active,
    /// Terminal. Reached from any state on failure, disconnect, or stop.
    Closed,
}

impl SessionState {
    /// Check if the session is serving telemetry.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the session has terminated.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::ServiceVerifying => write!(f, "ServiceVerifying"),
            Self::Active => write!(f, "Active"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// One in-flight or active connection to a single peripheral.
///
/// The caller must hold a registry reservation for the device's identifier
/// before running the session; the session consumes it either way.
pub struct ConnectionSession {
    device: DiscoveredDevice,
    registry: Arc<DeviceRegistry>,
    config: Arc<HubConfig>,
    state: SessionState,
}

impl ConnectionSession {
    /// Create a session for a filter-accepted device.
    pub fn new(
        device: DiscoveredDevice,
        registry: Arc<DeviceRegistry>,
        config: Arc<HubConfig>,
    ) -> Self {
        Self {
            device,
            registry,
            config,
            state: SessionState::Connecting,
        }
    }

    /// Run the session to completion.
    ///
    /// Never returns an error: failures are logged, the reservation is
    /// released, and the device remains rediscoverable on the next scan
    /// cycle.
    pub async fn run(mut self) {
        let id = self.device.record.id.clone();

        if let Err(e) = self.establish().await {
            warn!(
                "session for {} ({}) ended before activation: {}",
                self.device.record.display_name(),
                id,
                e
            );
            self.registry.release(&id);
            self.close_link().await;
            self.set_state(SessionState::Closed);
            return;
        }

        self.pump_telemetry().await;

        // Disconnected (or shutting down): clean up and publish removal.
        self.set_state(SessionState::Closed);
        self.registry.remove(&id);
        self.close_link().await;
        info!("session for {} closed", id);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn link(&self) -> &Arc<dyn DeviceLink> {
        &self.device.link
    }

    /// Connect, verify the scoreboard service, seed initial state, and
    /// register the device.
    async fn establish(&mut self) -> Result<()> {
        // Owned copies so the identity outlives the state transitions below.
        let id = self.device.record.id.clone();
        let display_name = self.device.record.display_name().to_string();
        let local_name = self.device.record.local_name.clone();

        info!("connecting to authorized device {} ({})", display_name, id);

        self.link().connect(self.config.connect_timeout).await?;

        self.set_state(SessionState::ServiceVerifying);
        let services = self.link().service_uuids().await?;
        if !services.contains(&self.config.service_uuid) {
            warn!(
                "device {} ({}) connected but does not expose service {}; refusing",
                display_name, id, self.config.service_uuid
            );
            return Err(Error::ServiceNotFound {
                uuid: self.config.service_uuid.to_string(),
            });
        }

        let mut device = DeviceState::new(id.clone(), local_name);

        // Initial telemetry read is best-effort; a device with nothing to
        // report yet is still valid.
        match self.link().read(&self.config.inbound_char).await {
            Ok(payload) => {
                if let Some(update) = codec::decode(&payload) {
                    device.apply(&update);
                }
            }
            Err(e) => debug!("no initial telemetry from {}: {}", id, e),
        }

        self.set_state(SessionState::Active);
        self.registry.activate(device, self.link().clone());
        Ok(())
    }

    /// Consume telemetry notifications until the link goes away.
    async fn pump_telemetry(&mut self) {
        let id = self.device.record.id.clone();

        if let Err(e) = self.link().subscribe(&self.config.inbound_char).await {
            // Partial functionality beats total failure: stay registered
            // without live updates and wait out the connection.
            warn!("could not enable telemetry notifications for {}: {}", id, e);
            self.wait_for_disconnect().await;
            return;
        }

        let mut notifications = match self.link().notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("could not open notification stream for {}: {}", id, e);
                self.wait_for_disconnect().await;
                return;
            }
        };

        debug!("telemetry notifications enabled for {}", id);

        loop {
            tokio::select! {
                maybe = notifications.next() => match maybe {
                    Some(notification)
                        if notification.characteristic == self.config.inbound_char =>
                    {
                        if let Some(update) = codec::decode(&notification.data) {
                            self.registry.apply_update(&id, &update);
                        }
                    }
                    Some(_) => {}
                    // Stream end means the transport dropped the link.
                    None => break,
                },
                _ = sleep(LIVENESS_POLL_INTERVAL) => {
                    if !self.link().is_connected().await {
                        break;
                    }
                }
            }
        }

        info!("device disconnected: {}", id);
    }

    /// Poll connectivity until the link drops (no-notification fallback).
    async fn wait_for_disconnect(&self) {
        while self.link().is_connected().await {
            sleep(LIVENESS_POLL_INTERVAL).await;
        }
        info!("device disconnected: {}", self.device.record.id);
    }

    /// Best-effort bounded disconnect so shutdown never hangs.
    async fn close_link(&self) {
        match timeout(self.config.disconnect_timeout, self.link().disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("disconnect failed for {}: {}", self.device.record.id, e),
            Err(_) => debug!("disconnect timed out for {}", self.device.record.id),
        }
    }

    fn set_state(&mut self, new_state: SessionState) {
        if self.state != new_state {
            debug!(
                "session {} state: {} -> {}",
                self.device.record.id, self.state, new_state
            );
            self.state = new_state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::testing::FakeLink;
    use crate::ble::uuids::{SCOREBOARD_SERVICE_UUID, TELEMETRY_CHARACTERISTIC_UUID};
    use crate::device::{deterministic_color, DEFAULT_GAME_NAME};
    use crate::events::{Event, EventBus};
    use crate::filter::AdvertisementRecord;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn setup() -> (Arc<DeviceRegistry>, Arc<HubConfig>) {
        let config = Arc::new(HubConfig::default());
        let registry = Arc::new(DeviceRegistry::new(
            EventBus::new(16),
            config.max_devices,
        ));
        (registry, config)
    }

    fn discovered(id: &str, name: Option<&str>, link: Arc<FakeLink>) -> DiscoveredDevice {
        DiscoveredDevice {
            record: AdvertisementRecord {
                id: id.to_string(),
                local_name: name.map(str::to_string),
                ..Default::default()
            },
            link,
        }
    }

    async fn recv(sub: &mut crate::events::Subscription) -> Event {
        tokio::time::timeout(Duration::from_secs(10), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("bus closed")
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(format!("{}", SessionState::Active), "Active");
        assert_eq!(format!("{}", SessionState::Closed), "Closed");
        assert!(SessionState::Active.is_active());
        assert!(SessionState::Closed.is_closed());
        assert!(!SessionState::Connecting.is_closed());
    }

    #[tokio::test]
    async fn test_establish_walks_states_to_active() {
        let (registry, config) = setup();
        let link = FakeLink::new(vec![SCOREBOARD_SERVICE_UUID]);

        assert!(registry.try_reserve("AA:BB"));
        let mut session = ConnectionSession::new(
            discovered("AA:BB", Some("scoreboard-1"), link),
            registry.clone(),
            config,
        );
        assert_eq!(session.state(), SessionState::Connecting);

        session.establish().await.unwrap();

        assert!(session.state().is_active());
        assert_eq!(registry.device_count(), 1);
        assert_eq!(registry.active_and_pending(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_releases_reservation() {
        let (registry, config) = setup();
        let link = FakeLink::new(vec![SCOREBOARD_SERVICE_UUID]);
        link.fail_connect.store(true, Ordering::SeqCst);

        assert!(registry.try_reserve("AA:BB"));
        let mut sub = registry.bus().subscribe();
        ConnectionSession::new(discovered("AA:BB", None, link), registry.clone(), config)
            .run()
            .await;

        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.active_and_pending(), 0);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_wrong_service_never_registers() {
        let (registry, config) = setup();
        // Connected device exposing some other service only.
        let link = FakeLink::new(vec![Uuid::from_u128(0xdead_beef)]);

        assert!(registry.try_reserve("AA:BB"));
        let mut sub = registry.bus().subscribe();
        ConnectionSession::new(discovered("AA:BB", None, link.clone()), registry.clone(), config)
            .run()
            .await;

        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.active_and_pending(), 0);
        assert!(sub.try_recv().is_none());
        // The transport was closed on rejection.
        assert!(!link.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_read_seeds_state() {
        let (registry, config) = setup();
        let link = FakeLink::new(vec![SCOREBOARD_SERVICE_UUID]);
        link.set_read(
            TELEMETRY_CHARACTERISTIC_UUID,
            br#"{"game_name":"Pong","score":3}"#.to_vec(),
        );

        assert!(registry.try_reserve("AA:BB"));
        let mut sub = registry.bus().subscribe();
        let session = ConnectionSession::new(
            discovered("AA:BB", Some("scoreboard-1"), link.clone()),
            registry.clone(),
            config,
        );
        let handle = tokio::spawn(session.run());

        let Event::DeviceAdded { device } = recv(&mut sub).await else {
            panic!("expected DeviceAdded");
        };
        assert_eq!(device.id, "AA:BB");
        assert_eq!(device.name, "scoreboard-1");
        assert_eq!(device.game_name, "Pong");
        assert_eq!(device.score, 3);
        assert_eq!(device.color, deterministic_color("AA:BB"));

        link.simulate_disconnect();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_initial_read_uses_defaults() {
        let (registry, config) = setup();
        let link = FakeLink::new(vec![SCOREBOARD_SERVICE_UUID]);

        assert!(registry.try_reserve("AA:BB"));
        let mut sub = registry.bus().subscribe();
        let handle = tokio::spawn(
            ConnectionSession::new(discovered("AA:BB", None, link.clone()), registry.clone(), config)
                .run(),
        );

        let Event::DeviceAdded { device } = recv(&mut sub).await else {
            panic!("expected DeviceAdded");
        };
        assert_eq!(device.game_name, DEFAULT_GAME_NAME);
        assert_eq!(device.score, 0);

        link.simulate_disconnect();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_updates_and_disconnect() {
        let (registry, config) = setup();
        let link = FakeLink::new(vec![SCOREBOARD_SERVICE_UUID]);

        assert!(registry.try_reserve("AA:BB"));
        let mut sub = registry.bus().subscribe();
        let handle = tokio::spawn(
            ConnectionSession::new(discovered("AA:BB", None, link.clone()), registry.clone(), config)
                .run(),
        );

        assert!(matches!(recv(&mut sub).await, Event::DeviceAdded { .. }));

        link.notify(TELEMETRY_CHARACTERISTIC_UUID, br#"{"score":7}"#.to_vec());
        let Event::DeviceUpdated { device } = recv(&mut sub).await else {
            panic!("expected DeviceUpdated");
        };
        assert_eq!(device.score, 7);
        assert_eq!(device.game_name, DEFAULT_GAME_NAME);

        // Duplicate value and garbage produce no events.
        link.notify(TELEMETRY_CHARACTERISTIC_UUID, br#"{"score":7}"#.to_vec());
        link.notify(TELEMETRY_CHARACTERISTIC_UUID, vec![0xFF]);
        // Notifications for other characteristics are ignored.
        link.notify(Uuid::from_u128(1), b"99".to_vec());
        link.notify(TELEMETRY_CHARACTERISTIC_UUID, b"Air Hockey:1".to_vec());
        let Event::DeviceUpdated { device } = recv(&mut sub).await else {
            panic!("expected DeviceUpdated");
        };
        assert_eq!(device.game_name, "Air Hockey");
        assert_eq!(device.score, 1);

        link.simulate_disconnect();
        let Event::DeviceRemoved { id } = recv(&mut sub).await else {
            panic!("expected DeviceRemoved");
        };
        assert_eq!(id, "AA:BB");
        assert!(registry.snapshot().is_empty());

        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failure_still_active() {
        let (registry, config) = setup();
        let link = FakeLink::new(vec![SCOREBOARD_SERVICE_UUID]);
        link.fail_subscribe.store(true, Ordering::SeqCst);

        assert!(registry.try_reserve("AA:BB"));
        let mut sub = registry.bus().subscribe();
        let handle = tokio::spawn(
            ConnectionSession::new(discovered("AA:BB", None, link.clone()), registry.clone(), config)
                .run(),
        );

        // Still registered despite the failed subscription.
        assert!(matches!(recv(&mut sub).await, Event::DeviceAdded { .. }));
        assert_eq!(registry.device_count(), 1);

        link.simulate_disconnect();
        assert!(matches!(recv(&mut sub).await, Event::DeviceRemoved { .. }));
        let _ = handle.await;
    }
}
