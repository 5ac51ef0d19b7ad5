//! Identifier harvesting from listing/browse pages.

use scraper::{Html, Selector};
use tracing::debug;

use super::config::ListingSelectors;
use super::{compile_selector, device_id_from_href, ParsingResult};
use crate::domain::IdentifierSet;

/// Harvests the set of device identifiers linked from one listing page.
///
/// Pure transform: no fetching, no persistence. An empty result is a valid
/// outcome, not an error.
pub struct ListingParser {
    link_selector: Selector,
}

impl ListingParser {
    pub fn new(selectors: &ListingSelectors) -> ParsingResult<Self> {
        Ok(Self {
            link_selector: compile_selector(&selectors.product_link)?,
        })
    }

    /// Scan every catalog anchor for a detail link and collect the unique
    /// identifiers.
    pub fn harvest(&self, page: &str) -> IdentifierSet {
        let document = Html::parse_document(page);
        let mut ids = IdentifierSet::new();
        for anchor in document.select(&self.link_selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if let Some(id) = device_id_from_href(href) {
                ids.insert(id);
            }
        }
        debug!("harvested {} unique identifiers from listing page", ids.len());
        ids
    }
}
