//! Product record entity produced by the detail-page extractor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::device_id::DeviceId;

/// Everything extracted from one device detail page, merged with the
/// in-transit quantity from the stock feed.
///
/// Extraction never fails a whole record for one missing field: absent or
/// unparseable fields keep their defaults (empty string, zero count, zero
/// price) and the degradation is logged by the extracting stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub availability: u32,
    #[serde(default)]
    pub in_transit: u32,
    #[serde(default)]
    pub wholesale_price: f64,
    #[serde(default)]
    pub retail_price: f64,
    #[serde(default)]
    pub characteristics: BTreeMap<String, String>,
    #[serde(default)]
    pub description: String,
}

/// Device identifier → extracted product record.
pub type ProductMap = BTreeMap<DeviceId, ProductRecord>;
