//! Selector configuration for the vendor's page template.
//!
//! The topology is fixed and known; the defaults below describe it exactly.
//! They stay configurable so a template change on the vendor side is a
//! config edit, not a code change.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    pub listing: ListingSelectors,
    pub detail: DetailSelectors,
    pub sections: SectionSelectors,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            listing: ListingSelectors::default(),
            detail: DetailSelectors::default(),
            sections: SectionSelectors::default(),
        }
    }
}

/// Selectors for listing/browse pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    /// Anchor elements wrapping each catalog tile.
    pub product_link: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            product_link: "a.cells-wrapper".to_string(),
        }
    }
}

/// Selectors for device detail pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailSelectors {
    pub title: String,
    pub availability: String,
    pub price: String,
    pub properties_row: String,
    pub description: String,
}

impl Default for DetailSelectors {
    fn default() -> Self {
        Self {
            title: "div.grid-body.text-left.space-top-tiny h1".to_string(),
            availability: "span.product-count".to_string(),
            price: r#"div.product-price-container span[data-bind*="getBrowsingPrice"]"#.to_string(),
            properties_row: "div.product-properties-container table.price-list tr".to_string(),
            description: "div.grid.space-top div.grid-body.text-left.space-top-tiny".to_string(),
        }
    }
}

/// Selectors and heading texts for the grouped related-product sections on a
/// printer's detail page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionSelectors {
    pub group: String,
    pub heading: String,
    pub product_link: String,
    /// Exact heading text of the cartridges section.
    pub cartridges_title: String,
    /// Exact heading text of the parts section.
    pub parts_title: String,
}

impl Default for SectionSelectors {
    fn default() -> Self {
        Self {
            group: "div.grid.space-top".to_string(),
            heading: "div.grid-header h2.title".to_string(),
            product_link: "a.cells-wrapper".to_string(),
            cartridges_title: "Cartridges".to_string(),
            parts_title: "Parts".to_string(),
        }
    }
}
