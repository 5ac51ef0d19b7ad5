//! Product-record extraction from device detail pages.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::config::DetailSelectors;
use super::{compile_selector, ParsingResult};
use crate::domain::ProductRecord;

/// The price element encodes both prices in a call-like attribute:
/// `getBrowsingPrice(RETAIL, WHOLESALE)`.
static PRICE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"getBrowsingPrice\((\d+\.\d+), (\d+\.?\d*)\)").expect("price pattern"));

/// Extracts a [`ProductRecord`] from one fetched detail page.
///
/// Field-level failures degrade that field to its default and surface as a
/// diagnostic message; they never fail the record. The caller decides where
/// the diagnostics go (log sink, tracing).
pub struct DetailParser {
    title: Selector,
    availability: Selector,
    price: Selector,
    properties_row: Selector,
    cell: Selector,
    description: Selector,
}

impl DetailParser {
    pub fn new(selectors: &DetailSelectors) -> ParsingResult<Self> {
        Ok(Self {
            title: compile_selector(&selectors.title)?,
            availability: compile_selector(&selectors.availability)?,
            price: compile_selector(&selectors.price)?,
            properties_row: compile_selector(&selectors.properties_row)?,
            cell: compile_selector("td")?,
            description: compile_selector(&selectors.description)?,
        })
    }

    pub fn extract(&self, page: &str) -> (ProductRecord, Vec<String>) {
        let document = Html::parse_document(page);
        let mut diagnostics = Vec::new();
        let mut record = ProductRecord::default();

        if let Some(title) = document.select(&self.title).next() {
            record.name = element_text(&title);
        }

        if let Some(counter) = document.select(&self.availability).next() {
            let text = element_text(&counter);
            // Non-numeric counter text (e.g. "10+") deliberately reads as 0.
            if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
                record.availability = text.parse().unwrap_or(0);
            }
        }

        if let Some(price_element) = document.select(&self.price).next() {
            let attribute = price_element.value().attr("data-bind").unwrap_or("");
            match PRICE_CALL.captures(attribute) {
                Some(captures) => {
                    record.retail_price = captures[1].parse().unwrap_or(0.0);
                    record.wholesale_price = captures[2].parse().unwrap_or(0.0);
                }
                None => diagnostics.push(format!(
                    "could not extract prices from attribute '{attribute}'"
                )),
            }
        }

        for row in document.select(&self.properties_row) {
            let cells: Vec<ElementRef> = row.select(&self.cell).collect();
            // Header rows and colspan rows have a different cell count.
            if let [key, value] = cells[..] {
                record
                    .characteristics
                    .insert(element_text(&key), element_text(&value));
            }
        }

        if let Some(block) = document.select(&self.description).next() {
            record.description = collapse_whitespace(&block.text().collect::<String>());
        }

        (record, diagnostics)
    }
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
