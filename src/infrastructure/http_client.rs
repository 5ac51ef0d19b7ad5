//! Authenticated HTTP session for the vendor catalog.
//!
//! The whole pipeline shares one cookie-backed session, used by at most one
//! stage at a time. Fetches are sequential; the only politeness mechanism is
//! a fixed inter-request delay.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("log-on rejected: incorrect user name or password")]
    BadCredentials,

    #[error("session construction failed: {0}")]
    Build(#[source] reqwest::Error),
}

/// Transport seam used by every stage: any non-success result is treated by
/// the pipeline as a per-item recoverable failure.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HttpSessionConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub request_delay_ms: u64,
    /// Element holding the log-on failure message on the account page.
    pub logon_error_selector: String,
    /// Phrase inside that element that marks rejected credentials.
    pub logon_error_marker: String,
}

impl Default for HttpSessionConfig {
    fn default() -> Self {
        Self {
            user_agent: "supply-certis/0.2 (catalog sync)".to_string(),
            timeout_seconds: 10,
            request_delay_ms: 250,
            logon_error_selector: "h1.dark-red-color".to_string(),
            logon_error_marker: "incorrect user name or password".to_string(),
        }
    }
}

/// Cookie-backed session client.
pub struct HttpSession {
    client: Client,
    config: HttpSessionConfig,
}

impl HttpSession {
    pub fn new(config: HttpSessionConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&config.user_agent) {
            headers.insert(USER_AGENT, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .build()
            .map_err(FetchError::Build)?;

        Ok(Self { client, config })
    }

    /// Cheap reachability check before attempting to log on.
    pub async fn probe(&self, base_url: &str) -> Result<(), FetchError> {
        self.get_checked(base_url).await?;
        debug!("vendor site reachable at {}", base_url);
        Ok(())
    }

    /// Post the log-on form and verify the site accepted the credentials.
    ///
    /// The site answers a rejected log-on with HTTP 200 and an error heading
    /// in the page body, so the body has to be inspected.
    pub async fn log_on(
        &self,
        logon_url: &str,
        username: &str,
        password: &str,
    ) -> Result<(), FetchError> {
        let form = [
            ("UserName", username),
            ("Password", password),
            ("RememberMe", "false"),
        ];
        let response = self
            .client
            .post(logon_url)
            .form(&form)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: logon_url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: logon_url.to_string(),
            });
        }

        let body = response.text().await.map_err(|source| FetchError::Request {
            url: logon_url.to_string(),
            source,
        })?;

        if self.body_reports_bad_credentials(&body) {
            warn!("log-on rejected by {}", logon_url);
            return Err(FetchError::BadCredentials);
        }

        info!("logged on to vendor site");
        Ok(())
    }

    fn body_reports_bad_credentials(&self, body: &str) -> bool {
        let Ok(selector) = Selector::parse(&self.config.logon_error_selector) else {
            return false;
        };
        let document = Html::parse_document(body);
        document.select(&selector).any(|heading| {
            heading
                .text()
                .collect::<String>()
                .to_lowercase()
                .contains(&self.config.logon_error_marker)
        })
    }

    async fn get_checked(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        if self.config.request_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
        }

        debug!("fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl PageFetcher for HttpSession {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.get_checked(url).await?;
        response.text().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get_checked(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_credentials_heading_is_detected() {
        let session = HttpSession::new(HttpSessionConfig::default()).unwrap();
        let body = r#"<h1 class="dark-red-color">Incorrect user name or password entered</h1>"#;
        assert!(session.body_reports_bad_credentials(body));
    }

    #[test]
    fn ordinary_page_is_not_a_rejection() {
        let session = HttpSession::new(HttpSessionConfig::default()).unwrap();
        let body = r#"<h1 class="welcome">Store front</h1>"#;
        assert!(!session.body_reports_bad_credentials(body));
    }
}
