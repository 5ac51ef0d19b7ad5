//! Console runner: builds the authenticated session and drives the full
//! pipeline. Ctrl-C trips the cancellation token; the run then stops at the
//! next identifier boundary without corrupting on-disk artifacts.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use supply_certis::infrastructure::artifact_store::JsonFileStore;
use supply_certis::infrastructure::config::AppConfig;
use supply_certis::infrastructure::http_client::HttpSession;
use supply_certis::infrastructure::logging;
use supply_certis::infrastructure::spreadsheet::XlsFeedReader;
use supply_certis::pipeline::progress::TracingSink;
use supply_certis::pipeline::{Orchestrator, StageOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("configuration is invalid")?;
    let _log_guard = logging::init(&config.log_dir)?;

    let (Some(username), Some(password)) = (config.username.clone(), config.password.clone())
    else {
        bail!("vendor credentials are not configured (SUPPLY_CERTIS_USERNAME / SUPPLY_CERTIS_PASSWORD)");
    };

    let session = HttpSession::new(config.http.clone())?;
    session.probe(&config.base_url).await?;
    session.log_on(&config.logon_url(), &username, &password).await?;

    let store = JsonFileStore::new(config.store_dir.clone());
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(session),
        Arc::new(store),
        Arc::new(XlsFeedReader),
        Arc::new(TracingSink),
    );

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current item then stopping");
            signal_token.cancel();
        }
    });

    match orchestrator.run_full_pipeline(&token).await? {
        StageOutcome::Completed(products) => {
            info!("pipeline persisted {} product records", products.len());
        }
        StageOutcome::Cancelled => {
            warn!("operation cancelled");
        }
    }
    Ok(())
}
