//! Security filter deciding which advertisements are eligible for a session.
//!
//! Advertisement-level service UUID visibility varies per platform, so the
//! predicate is a cascade: explicit service evidence first, then increasingly
//! defensive fallbacks. In strict mode anything without service evidence is
//! rejected; in permissive mode unknown devices are still accepted, which is
//! deliberately relaxed for development setups and should be flagged in any
//! security-sensitive deployment.

use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Read-only snapshot of one peripheral's advertisement.
///
/// Consumed by the filter only; never stored.
#[derive(Debug, Clone, Default)]
pub struct AdvertisementRecord {
    /// Stable hardware address string.
    pub id: String,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Advertised service data, keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Advertised manufacturer data, keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Signal strength in dBm, if reported.
    pub rssi: Option<i16>,
}

impl AdvertisementRecord {
    /// Display name for logging: local name or the identifier.
    pub fn display_name(&self) -> &str {
        self.local_name.as_deref().unwrap_or(&self.id)
    }
}

/// Static allow-policy evaluated against advertisements.
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    /// Service UUID that marks a device as a scoreboard peripheral.
    pub service_uuid: Uuid,
    /// Require explicit service-UUID evidence before connecting.
    pub strict: bool,
    /// Name keywords accepted in permissive mode (case-insensitive substring).
    pub name_allow_list: Vec<String>,
}

impl FilterPolicy {
    /// Decide whether a device is eligible for a connection attempt.
    ///
    /// Evaluation order, first hit wins:
    /// 1. advertised service UUID list contains the target UUID;
    /// 2. service-data keys contain the target UUID;
    /// 3. manufacturer-data or service-data values textually contain the
    ///    target UUID (some platforms surface UUIDs oddly);
    /// 4. permissive mode: name matches an allow-list keyword, or failing
    ///    that, accept anyway;
    /// 5. strict mode with no service evidence: reject.
    pub fn matches(&self, record: &AdvertisementRecord) -> bool {
        if record.services.contains(&self.service_uuid) {
            debug!(
                "device {} ({}) advertises service {}",
                record.display_name(),
                record.id,
                self.service_uuid
            );
            return true;
        }

        if record.service_data.contains_key(&self.service_uuid) {
            debug!(
                "device {} ({}) carries service data for {}",
                record.display_name(),
                record.id,
                self.service_uuid
            );
            return true;
        }

        let needle = self.service_uuid.to_string();
        if values_contain(&record.manufacturer_data, &needle)
            || values_contain(&record.service_data, &needle)
        {
            debug!(
                "device {} ({}) embeds service UUID in advertisement payload",
                record.display_name(),
                record.id
            );
            return true;
        }

        if !self.strict {
            if let Some(name) = &record.local_name {
                let name = name.to_lowercase();
                let keyword_match = self
                    .name_allow_list
                    .iter()
                    .map(|keyword| keyword.trim().to_lowercase())
                    .any(|keyword| !keyword.is_empty() && name.contains(&keyword));
                if keyword_match {
                    info!("accepting name-matched device: {}", record.display_name());
                    return true;
                }
            }
            debug!(
                "device {} ({}) accepted under permissive filtering",
                record.display_name(),
                record.id
            );
            return true;
        }

        debug!(
            "device {} ({}) does not advertise required service {}",
            record.display_name(),
            record.id,
            self.service_uuid
        );
        false
    }
}

/// Case-insensitive textual containment across a metadata map's values.
fn values_contain<K>(data: &HashMap<K, Vec<u8>>, needle: &str) -> bool {
    data.values()
        .any(|value| String::from_utf8_lossy(value).to_lowercase().contains(needle))
}
