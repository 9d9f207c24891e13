//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants used for scoreboard peripheral communication.
//! These must match the values flashed onto the peripherals.

use uuid::Uuid;

/// Scoreboard service UUID advertised by peripherals.
///
/// Used both for discovery filtering and for post-connection verification.
pub const SCOREBOARD_SERVICE_UUID: Uuid = Uuid::from_u128(0xc9b9a344_a062_4e55_a507_441c7e610e2c);

/// Telemetry characteristic UUID (peripheral -> hub, Notify/Read).
///
/// Peripherals push game name and score frames over this characteristic.
pub const TELEMETRY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x29f80071_9a06_426b_8c26_02ae5df749a4);

/// Command characteristic UUID (hub -> peripheral, Write).
///
/// The hub writes JSON command frames (e.g. `{"command":"reset"}`) here.
pub const COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xa43359d2_e50e_43c9_ad86_b77ee5c6524e);

/// Check if a service UUID is the scoreboard service.
pub fn is_scoreboard_service(uuid: &Uuid) -> bool {
    *uuid == SCOREBOARD_SERVICE_UUID
}
