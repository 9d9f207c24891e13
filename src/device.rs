//! Device state and deterministic display colors.

use serde::{Deserialize, Serialize};

use crate::codec::TelemetryUpdate;

/// Game name used until the peripheral reports one.
pub const DEFAULT_GAME_NAME: &str = "Unknown Game";

/// Fixed display palette indexed by the identifier hash.
pub const COLOR_PALETTE: [&str; 16] = [
    "#FF6B6B", "#4ECDC4", "#1A535C", "#FF9F1C", "#2EC4B6", "#E71D36", "#6A4C93", "#1982C4",
    "#8AC926", "#FF595E", "#FFCA3A", "#6A994E", "#386641", "#8338EC", "#3A86FF", "#FB5607",
];

/// Derive a stable display color from a device identifier.
///
/// Uses a 31-multiplier polynomial hash over the identifier bytes, masked to
/// 32 bits, to index [`COLOR_PALETTE`]. Pure function of the identifier, so
/// a device keeps its color across disconnects and reconnects.
pub fn deterministic_color(id: &str) -> &'static str {
    let mut h: u32 = 0;
    for byte in id.bytes() {
        h = h.wrapping_mul(31).wrapping_add(u32::from(byte));
    }
    COLOR_PALETTE[h as usize % COLOR_PALETTE.len()]
}

/// Live state of one currently-known scoreboard peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Stable hardware address string; primary key.
    pub id: String,
    /// Display name, defaulting to the identifier when the advertisement
    /// carries no local name.
    pub name: String,
    /// Free-text game label reported by the peripheral.
    pub game_name: String,
    /// Current score.
    pub score: i64,
    /// Display color derived from `id`; fixed for the device's lifetime.
    pub color: String,
}

impl DeviceState {
    /// Create state for a newly verified device.
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        let id = id.into();
        let name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| id.clone());
        let color = deterministic_color(&id).to_string();
        Self {
            id,
            name,
            game_name: DEFAULT_GAME_NAME.to_string(),
            score: 0,
            color,
        }
    }

    /// Merge a telemetry update, returning whether anything changed.
    ///
    /// Unchanged values are ignored so callers can suppress duplicate events.
    pub fn apply(&mut self, update: &TelemetryUpdate) -> bool {
        let mut changed = false;

        if let Some(game_name) = &update.game_name {
            if self.game_name != *game_name {
                self.game_name = game_name.clone();
                changed = true;
            }
        }

        if let Some(score) = update.score {
            if self.score != score {
                self.score = score;
                changed = true;
            }
        }

        changed
    }
}
