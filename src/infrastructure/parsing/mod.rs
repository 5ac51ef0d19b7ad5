//! HTML extraction for the vendor catalog.
//!
//! The catalog has one fixed, known template, so every parser compiles its
//! selectors from [`ParsingConfig`] at construction and fails fast on an
//! invalid selector instead of discovering it mid-crawl.

pub mod compatibility_parser;
pub mod config;
pub mod detail_parser;
pub mod error;
pub mod listing_parser;

pub use compatibility_parser::CompatibilityParser;
pub use config::ParsingConfig;
pub use detail_parser::DetailParser;
pub use error::{ParsingError, ParsingResult};
pub use listing_parser::ListingParser;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Selector;

use crate::domain::DeviceId;

/// Detail-page link pattern: the path fragment followed by the 12-digit
/// catalog identifier.
static DETAIL_LINK_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/Store/Details/(\d{12})").expect("detail link pattern"));

/// Pull the device identifier out of a detail-page href, if present.
pub(crate) fn device_id_from_href(href: &str) -> Option<DeviceId> {
    let captures = DETAIL_LINK_ID.captures(href)?;
    DeviceId::new(&captures[1]).ok()
}

pub(crate) fn compile_selector(selector: &str) -> ParsingResult<Selector> {
    Selector::parse(selector).map_err(|e| ParsingError::invalid_selector(selector, &e.to_string()))
}
