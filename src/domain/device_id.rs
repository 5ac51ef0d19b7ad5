//! Device identifier value object.
//!
//! Every catalog entry (printer, cartridge or part) is addressed by the
//! 12-digit numeric identifier embedded in its detail-page URL. Identifiers
//! are immutable once extracted; equality is exact digit-string match.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed width of a catalog identifier.
pub const DEVICE_ID_DIGITS: usize = 12;

/// Validated 12-digit catalog identifier.
///
/// Serializes as a plain JSON string and re-validates on deserialization, so
/// an artifact document tampered with on disk is rejected at load time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceIdError {
    #[error("device id must be exactly {DEVICE_ID_DIGITS} digits, got '{0}'")]
    Malformed(String),
}

impl DeviceId {
    /// Validate and wrap a raw identifier string.
    pub fn new(raw: impl Into<String>) -> Result<Self, DeviceIdError> {
        let raw = raw.into();
        if raw.len() == DEVICE_ID_DIGITS && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw))
        } else {
            Err(DeviceIdError::Malformed(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = DeviceIdError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl FromStr for DeviceId {
    type Err = DeviceIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::new(raw)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deduplicated, order-stable set of identifiers. Persisted as a JSON array;
/// ordering carries no meaning.
pub type IdentifierSet = BTreeSet<DeviceId>;
