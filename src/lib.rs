// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # scoreboard-ble
//!
//! A cross-platform Rust library for discovering and tracking scoreboard
//! peripherals over Bluetooth Low Energy.
//!
//! A [`ScoreboardHub`] scans for advertising scoreboards, connects to each
//! eligible device, verifies the scoreboard service, and then holds the
//! connection open to stream live telemetry (game name and score). Device
//! state changes are published as [`Event`]s; hosts typically serve the
//! snapshot plus the live event stream to a dashboard UI.
//!
//! ## Features
//!
//! - **Continuous Discovery**: Periodic scan cycles pick up new devices and
//!   re-discover devices that dropped off
//! - **Per-device Sessions**: Each peripheral runs an independent connection
//!   task; one device failing never affects its peers
//! - **Tolerant Telemetry Decoding**: JSON, plain text, and binary payloads
//!   are all accepted
//! - **Deterministic Colors**: Every device gets a stable display color
//!   derived from its identifier
//! - **Commands**: JSON commands can be pushed back to any connected device
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scoreboard_ble::{Event, HubConfig, Result, ScoreboardHub};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let hub = ScoreboardHub::new(HubConfig::default()).await?;
//!     let mut events = hub.subscribe();
//!     hub.start();
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             Event::DeviceAdded { device } => {
//!                 println!("+ {} ({})", device.name, device.id);
//!             }
//!             Event::DeviceUpdated { device } => {
//!                 println!("  {} is at {} in {}", device.name, device.score, device.game_name);
//!             }
//!             Event::DeviceRemoved { id } => {
//!                 println!("- {}", id);
//!             }
//!         }
//!     }
//!
//!     hub.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod ble;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod filter;
pub mod hub;
pub mod registry;
pub mod session;

// Re-exports for convenience
pub use config::HubConfig;
pub use device::{deterministic_color, DeviceState};
pub use error::{Error, Result};
pub use events::{Event, EventBus, Subscription};
pub use hub::ScoreboardHub;

// Re-export commonly used types from submodules
pub use ble::transport::{DeviceLink, DiscoveredDevice, Discovery, Notification};
pub use ble::uuids::{
    COMMAND_CHARACTERISTIC_UUID, SCOREBOARD_SERVICE_UUID, TELEMETRY_CHARACTERISTIC_UUID,
};
pub use codec::{decode, decode_score, TelemetryUpdate};
pub use filter::{AdvertisementRecord, FilterPolicy};
pub use registry::DeviceRegistry;
pub use session::SessionState;
