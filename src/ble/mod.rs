//! BLE communication layer.
//!
//! Splits into the radio seams the core consumes ([`transport`]), the
//! btleplug-backed production implementations ([`radio`]), and the UUID
//! constants shared with peripheral firmware ([`uuids`]).

pub mod radio;
pub mod transport;
pub mod uuids;

pub use radio::{BleLink, BleRadio};
pub use transport::{DeviceLink, DiscoveredDevice, Discovery, Notification};
