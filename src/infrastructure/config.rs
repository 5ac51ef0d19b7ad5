//! Application configuration.
//!
//! Layered the usual way: compiled-in defaults, then an optional
//! `supply-certis.toml` next to the binary, then `SUPPLY_CERTIS__*`
//! environment overrides (credentials normally arrive through the
//! environment).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::http_client::HttpSessionConfig;
use super::parsing::ParsingConfig;
use crate::domain::DeviceId;

/// Fixed vendor site topology.
pub mod vendor {
    pub const BASE_URL: &str = "https://shop.printware.example";
    pub const LOGON_PATH: &str = "/Account/LogOn";
    pub const PRINTER_LISTING_PATH: &str = "/Store/Browse/400000006580/laser-printers-and-mfp";
    pub const PRICE_FEED_PATH: &str = "/Content/PriceList/price.xls";
    pub const DETAILS_PATH: &str = "/Store/Details/";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub logon_path: String,
    pub listing_path: String,
    pub price_feed_path: String,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Directory holding the JSON artifacts (and the feed scratch file).
    pub store_dir: PathBuf,
    /// File name of the downloaded feed inside `store_dir`.
    pub feed_scratch_file: String,
    /// Directory for the rolling run log.
    pub log_dir: PathBuf,

    pub http: HttpSessionConfig,
    pub parsing: ParsingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: vendor::BASE_URL.to_string(),
            logon_path: vendor::LOGON_PATH.to_string(),
            listing_path: vendor::PRINTER_LISTING_PATH.to_string(),
            price_feed_path: vendor::PRICE_FEED_PATH.to_string(),
            username: None,
            password: None,
            store_dir: PathBuf::from("catalog_store"),
            feed_scratch_file: "price_feed.xls".to_string(),
            log_dir: PathBuf::from("logs"),
            http: HttpSessionConfig::default(),
            parsing: ParsingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `supply-certis.toml` (optional) and the environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let loaded: Self = config::Config::builder()
            .add_source(config::File::with_name("supply-certis").required(false))
            .add_source(config::Environment::with_prefix("SUPPLY_CERTIS").separator("__"))
            .build()?
            .try_deserialize()?;

        // A malformed base URL would otherwise only surface as per-item
        // fetch failures deep inside a stage.
        url::Url::parse(&loaded.base_url).map_err(|e| {
            config::ConfigError::Message(format!("base_url '{}' is invalid: {e}", loaded.base_url))
        })?;
        Ok(loaded)
    }

    pub fn logon_url(&self) -> String {
        format!("{}{}", self.base_url, self.logon_path)
    }

    pub fn listing_url(&self) -> String {
        format!("{}{}", self.base_url, self.listing_path)
    }

    pub fn feed_url(&self) -> String {
        format!("{}{}", self.base_url, self.price_feed_path)
    }

    pub fn details_url(&self, id: &DeviceId) -> String {
        format!("{}{}{}", self.base_url, vendor::DETAILS_PATH, id)
    }

    pub fn feed_scratch_path(&self) -> PathBuf {
        self.store_dir.join(&self.feed_scratch_file)
    }
}
