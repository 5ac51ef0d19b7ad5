//! Related-product section scanning for printer detail pages.

use scraper::{ElementRef, Html, Selector};
use tracing::trace;

use super::config::SectionSelectors;
use super::{compile_selector, device_id_from_href, ParsingResult};
use crate::domain::{CompatibilityEntry, IdentifierSet};

/// Partitions the grouped sections of a printer's detail page into
/// cartridge and part identifier sets.
///
/// Sections are classified by the exact text of their heading, scanned in
/// document order. A parts section is only harvested once a cartridges
/// section has been seen on the same page; a parts section appearing first
/// is ignored. The vendor template guarantees this ordering and downstream
/// data depends on it, so the rule must not be "fixed" here.
pub struct CompatibilityParser {
    group: Selector,
    heading: Selector,
    link: Selector,
    cartridges_title: String,
    parts_title: String,
}

impl CompatibilityParser {
    pub fn new(selectors: &SectionSelectors) -> ParsingResult<Self> {
        Ok(Self {
            group: compile_selector(&selectors.group)?,
            heading: compile_selector(&selectors.heading)?,
            link: compile_selector(&selectors.product_link)?,
            cartridges_title: selectors.cartridges_title.clone(),
            parts_title: selectors.parts_title.clone(),
        })
    }

    pub fn partition(&self, page: &str) -> CompatibilityEntry {
        let document = Html::parse_document(page);
        let mut entry = CompatibilityEntry::default();
        let mut found_cartridges = false;

        for group in document.select(&self.group) {
            let Some(heading) = group.select(&self.heading).next() else {
                continue;
            };
            let title = heading.text().collect::<String>().trim().to_string();

            if title == self.cartridges_title {
                found_cartridges = true;
                self.harvest_links(&group, &mut entry.cartridges);
            } else if title == self.parts_title && found_cartridges {
                self.harvest_links(&group, &mut entry.parts);
            } else {
                trace!("skipping section '{}'", title);
            }
        }

        entry
    }

    fn harvest_links(&self, group: &ElementRef<'_>, into: &mut IdentifierSet) {
        for anchor in group.select(&self.link) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if let Some(id) = device_id_from_href(href) {
                into.insert(id);
            }
        }
    }
}
