//! Per-printer compatibility associations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::device_id::{DeviceId, IdentifierSet};

/// Compatible consumables for one printer, split into the two catalog
/// sections the vendor template exposes. An entry with both sets empty is
/// never persisted; the producing stage omits the printer instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityEntry {
    #[serde(default)]
    pub cartridges: IdentifierSet,
    #[serde(default)]
    pub parts: IdentifierSet,
}

impl CompatibilityEntry {
    pub fn is_empty(&self) -> bool {
        self.cartridges.is_empty() && self.parts.is_empty()
    }
}

/// Printer identifier → compatible cartridge/part identifiers.
pub type CompatibilityMap = BTreeMap<DeviceId, CompatibilityEntry>;

/// Union of every cartridge and part identifier referenced by the map.
pub fn referenced_identifiers(map: &CompatibilityMap) -> IdentifierSet {
    let mut ids = IdentifierSet::new();
    for entry in map.values() {
        ids.extend(entry.cartridges.iter().cloned());
        ids.extend(entry.parts.iter().cloned());
    }
    ids
}
