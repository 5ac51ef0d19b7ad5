//! Stock reconciliation: pure transforms over compatibility and product
//! maps. Inputs are read-only; outputs are new values.

use std::collections::BTreeMap;

use crate::domain::{CompatibilityEntry, CompatibilityMap, DeviceId, IdentifierSet, ProductMap};

/// Restrict one printer's lists to identifiers present in the stock set.
pub fn filter_entry(entry: &CompatibilityEntry, stock: &IdentifierSet) -> CompatibilityEntry {
    CompatibilityEntry {
        cartridges: entry.cartridges.intersection(stock).cloned().collect(),
        parts: entry.parts.intersection(stock).cloned().collect(),
    }
}

/// Filter the whole map against the stock set. A printer whose filtered
/// cartridge and part lists are both empty is dropped entirely.
pub fn filter_by_stock(map: &CompatibilityMap, stock: &IdentifierSet) -> CompatibilityMap {
    map.iter()
        .filter_map(|(printer, entry)| {
            let kept = filter_entry(entry, stock);
            (!kept.is_empty()).then(|| (printer.clone(), kept))
        })
        .collect()
}

/// Patch every record's in-transit quantity from the feed-derived map,
/// defaulting to 0 for identifiers the feed does not mention. Applied to
/// the in-memory map before its one save; persisted artifacts are never
/// rewritten in place.
pub fn merge_in_transit(products: &mut ProductMap, in_transit: &BTreeMap<DeviceId, u32>) {
    for (id, record) in products.iter_mut() {
        record.in_transit = in_transit.get(id).copied().unwrap_or(0);
    }
}
