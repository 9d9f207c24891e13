//! Hub configuration.
//!
//! Defaults carry the wire identity shared with the peripheral firmware;
//! deployments override via the builder helpers or `SCOREBOARD_*`
//! environment variables.

use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::ble::uuids::{
    COMMAND_CHARACTERISTIC_UUID, SCOREBOARD_SERVICE_UUID, TELEMETRY_CHARACTERISTIC_UUID,
};
use crate::events::DEFAULT_QUEUE_CAPACITY;
use crate::filter::FilterPolicy;

/// Default pause between discovery cycles.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(8);
/// Default discovery window per cycle.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
/// Default connection attempt bound.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default graceful disconnect bound.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default maximum tracked + connecting devices (a 9x6 dashboard grid).
pub const DEFAULT_MAX_DEVICES: usize = 54;
/// Default consecutive discovery failures before the scan loop backs off.
pub const DEFAULT_MAX_CONSECUTIVE_SCAN_ERRORS: u32 = 5;

/// Configuration for a [`crate::hub::ScoreboardHub`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Service UUID devices must expose.
    pub service_uuid: Uuid,
    /// Inbound telemetry characteristic (peripheral -> hub).
    pub inbound_char: Uuid,
    /// Outbound command characteristic (hub -> peripheral).
    pub outbound_char: Uuid,
    /// Pause between discovery cycles.
    pub scan_interval: Duration,
    /// Discovery window per cycle.
    pub scan_timeout: Duration,
    /// Bound on each connection attempt.
    pub connect_timeout: Duration,
    /// Bound on graceful disconnects during cleanup and shutdown.
    pub disconnect_timeout: Duration,
    /// Cap on tracked + connecting devices.
    pub max_devices: usize,
    /// Require service-UUID evidence in advertisements before connecting.
    pub strict_filter: bool,
    /// Name keywords accepted in permissive mode.
    pub name_allow_list: Vec<String>,
    /// Consecutive discovery failures before one elongated sleep.
    pub max_consecutive_scan_errors: u32,
    /// Per-subscriber event queue capacity.
    pub event_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            service_uuid: SCOREBOARD_SERVICE_UUID,
            inbound_char: TELEMETRY_CHARACTERISTIC_UUID,
            outbound_char: COMMAND_CHARACTERISTIC_UUID,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            max_devices: DEFAULT_MAX_DEVICES,
            strict_filter: false,
            name_allow_list: vec!["scoreboard".to_string(), "esp32".to_string()],
            max_consecutive_scan_errors: DEFAULT_MAX_CONSECUTIVE_SCAN_ERRORS,
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl HubConfig {
    /// Build a configuration from `SCOREBOARD_*` environment variables,
    /// falling back to the defaults for anything unset or unparsable.
    ///
    /// Recognized variables: `SCOREBOARD_SERVICE_UUID`,
    /// `SCOREBOARD_TELEMETRY_CHAR_UUID`, `SCOREBOARD_COMMAND_CHAR_UUID`,
    /// `SCOREBOARD_SCAN_INTERVAL` (seconds), `SCOREBOARD_MAX_DEVICES`,
    /// `SCOREBOARD_STRICT_FILTER` (`1`/`true`),
    /// `SCOREBOARD_NAME_ALLOW_LIST` (comma-separated).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(uuid) = env_uuid("SCOREBOARD_SERVICE_UUID") {
            config.service_uuid = uuid;
        }
        if let Some(uuid) = env_uuid("SCOREBOARD_TELEMETRY_CHAR_UUID") {
            config.inbound_char = uuid;
        }
        if let Some(uuid) = env_uuid("SCOREBOARD_COMMAND_CHAR_UUID") {
            config.outbound_char = uuid;
        }
        if let Some(secs) = env_parse::<f64>("SCOREBOARD_SCAN_INTERVAL") {
            if secs > 0.0 {
                config.scan_interval = Duration::from_secs_f64(secs);
            }
        }
        if let Some(max) = env_parse::<usize>("SCOREBOARD_MAX_DEVICES") {
            config.max_devices = max;
        }
        if let Ok(value) = std::env::var("SCOREBOARD_STRICT_FILTER") {
            config.strict_filter = matches!(value.trim(), "1" | "true" | "TRUE" | "True");
        }
        if let Ok(value) = std::env::var("SCOREBOARD_NAME_ALLOW_LIST") {
            config.name_allow_list = value
                .split(',')
                .map(|keyword| keyword.trim().to_string())
                .filter(|keyword| !keyword.is_empty())
                .collect();
        }

        config
    }

    /// The filter's view of this configuration.
    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy {
            service_uuid: self.service_uuid,
            strict: self.strict_filter,
            name_allow_list: self.name_allow_list.clone(),
        }
    }

    /// Set the pause between discovery cycles.
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Set the maximum tracked + connecting device count.
    pub fn with_max_devices(mut self, max: usize) -> Self {
        self.max_devices = max;
        self
    }

    /// Toggle strict advertisement filtering.
    pub fn with_strict_filter(mut self, strict: bool) -> Self {
        self.strict_filter = strict;
        self
    }

    /// Replace the permissive-mode name allow-list.
    pub fn with_name_allow_list(mut self, keywords: Vec<String>) -> Self {
        self.name_allow_list = keywords;
        self
    }
}

fn env_uuid(name: &str) -> Option<Uuid> {
    let value = std::env::var(name).ok()?;
    match Uuid::parse_str(value.trim()) {
        Ok(uuid) => Some(uuid),
        Err(e) => {
            warn!("ignoring invalid {}: {}", name, e);
            None
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring unparsable {}={}", name, value);
            None
        }
    }
}
