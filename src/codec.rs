//! Telemetry payload decoding.
//!
//! Peripherals report game state in whatever format their firmware supports:
//! JSON frames, plain text, or a raw little-endian integer. Decoding tries
//! each format in a fixed order and short-circuits on the first that parses.
//! Malformed payloads are never an error; they decode to `None` and the
//! caller treats them as "no update".

use serde::Deserialize;

/// A normalized telemetry update decoded from a raw payload.
///
/// Any subset of the fields may be present; absent fields leave the
/// corresponding device state untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TelemetryUpdate {
    /// Free-text game label reported by the peripheral.
    #[serde(default)]
    pub game_name: Option<String>,
    /// Current score.
    #[serde(default)]
    pub score: Option<i64>,
}

impl TelemetryUpdate {
    /// Create an update carrying only a score.
    pub fn score_only(score: i64) -> Self {
        Self {
            game_name: None,
            score: Some(score),
        }
    }

    /// Check whether the update carries no recognized fields.
    pub fn is_empty(&self) -> bool {
        self.game_name.is_none() && self.score.is_none()
    }
}

/// Decode a raw telemetry payload.
///
/// Fallback order, first that parses wins:
/// 1. UTF-8 JSON object with any subset of `game_name`/`score` (unknown keys
///    such as `timestamp` are ignored).
/// 2. UTF-8 text: `name:score` when a `:` is present, else the whole trimmed
///    text as an integer score.
/// 3. Raw little-endian 4-byte unsigned integer score.
///
/// Returns `None` when nothing parses or the payload is empty.
pub fn decode(data: &[u8]) -> Option<TelemetryUpdate> {
    if data.is_empty() {
        return None;
    }

    decode_json(data)
        .or_else(|| decode_text(data))
        .or_else(|| decode_binary(data))
}

/// Decode a score-only payload (legacy characteristic layout).
///
/// Same fallback chain as [`decode`] minus the JSON branch. Kept for
/// peripherals whose firmware predates the JSON telemetry frames.
pub fn decode_score(data: &[u8]) -> Option<i64> {
    if data.is_empty() {
        return None;
    }

    decode_text(data)
        .or_else(|| decode_binary(data))
        .and_then(|update| update.score)
}

fn decode_json(data: &[u8]) -> Option<TelemetryUpdate> {
    // Deserializing into the struct rejects non-object JSON (e.g. a bare
    // number), which must fall through to the text branch instead.
    serde_json::from_slice::<TelemetryUpdate>(data).ok()
}

fn decode_text(data: &[u8]) -> Option<TelemetryUpdate> {
    let text = std::str::from_utf8(data).ok()?.trim();
    if text.is_empty() {
        return None;
    }

    if let Some((name, score)) = text.split_once(':') {
        let score = score.trim().parse::<i64>().ok()?;
        return Some(TelemetryUpdate {
            game_name: Some(name.trim().to_string()),
            score: Some(score),
        });
    }

    text.parse::<i64>().ok().map(TelemetryUpdate::score_only)
}

fn decode_binary(data: &[u8]) -> Option<TelemetryUpdate> {
    let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(TelemetryUpdate::score_only(
        u32::from_le_bytes(bytes) as i64
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_decode_json_full() {
        let update = decode(br#"{"game_name":"Pong","score":5}"#).unwrap();
        assert_eq!(update.game_name.as_deref(), Some("Pong"));
        assert_eq!(update.score, Some(5));
    }

    #[test]
    fn test_decode_json_subset() {
        let update = decode(br#"{"score":50}"#).unwrap();
        assert_eq!(update.game_name, None);
        assert_eq!(update.score, Some(50));

        let update = decode(br#"{"game_name":"Air Hockey"}"#).unwrap();
        assert_eq!(update.game_name.as_deref(), Some("Air Hockey"));
        assert_eq!(update.score, None);
    }

    #[test]
    fn test_decode_json_ignores_unknown_keys() {
        // Firmware includes a timestamp in full state frames.
        let update = decode(br#"{"game_name":"Pong","score":42,"timestamp":12345}"#).unwrap();
        assert_eq!(update.game_name.as_deref(), Some("Pong"));
        assert_eq!(update.score, Some(42));
    }

    #[test]
    fn test_decode_plain_integer() {
        let update = decode(b"42").unwrap();
        assert_eq!(update, TelemetryUpdate::score_only(42));

        let update = decode(b"  -7 \n").unwrap();
        assert_eq!(update, TelemetryUpdate::score_only(-7));
    }

    #[test]
    fn test_decode_name_colon_score() {
        let update = decode(b"Foo:7").unwrap();
        assert_eq!(update.game_name.as_deref(), Some("Foo"));
        assert_eq!(update.score, Some(7));
    }

    #[test]
    fn test_decode_little_endian() {
        let update = decode(&300u32.to_le_bytes()).unwrap();
        assert_eq!(update, TelemetryUpdate::score_only(300));
    }

    #[test]
    fn test_decode_empty_and_garbage() {
        assert_eq!(decode(b""), None);
        assert_eq!(decode(&[0xFF, 0xFE]), None);
        assert_eq!(decode(b"abc"), None);
    }

    #[test]
    fn test_text_branch_beats_binary_for_digits() {
        // b"1234" is both valid text and four bytes; the text branch wins.
        let update = decode(b"1234").unwrap();
        assert_eq!(update.score, Some(1234));
    }

    #[test]
    fn test_colon_with_bad_score_falls_through() {
        // "ab:cd" fails the text branch (non-integer score) and is exactly
        // five bytes, so the binary branch applies to the first four.
        let update = decode(b"ab:cd").unwrap();
        assert_eq!(update.score, Some(u32::from_le_bytes(*b"ab:c") as i64));
    }

    #[test]
    fn test_decode_score_legacy() {
        assert_eq!(decode_score(b"42"), Some(42));
        assert_eq!(decode_score(b"Foo:7"), Some(7));
        assert_eq!(decode_score(&300u32.to_le_bytes()), Some(300));
        assert_eq!(decode_score(b""), None);
        // JSON is not recognized by the legacy entry point; the frame is
        // eleven bytes so the binary branch kicks in instead.
        let json = br#"{"score":5}"#;
        assert_eq!(
            decode_score(json),
            Some(u32::from_le_bytes([json[0], json[1], json[2], json[3]]) as i64)
        );
    }

    proptest! {
        #[test]
        fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&data);
            let _ = decode_score(&data);
        }

        #[test]
        fn decode_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(decode(&data), decode(&data));
        }

        #[test]
        fn json_roundtrip(score in any::<i32>(), name in "[a-zA-Z0-9 ]{0,20}") {
            let payload = serde_json::json!({"game_name": name, "score": score});
            let update = decode(&serde_json::to_vec(&payload).unwrap()).unwrap();
            prop_assert_eq!(update.game_name.as_deref(), Some(name.as_str()));
            prop_assert_eq!(update.score, Some(score as i64));
        }
    }
}
