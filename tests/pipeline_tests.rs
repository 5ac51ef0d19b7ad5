//! Pipeline integration tests with in-memory collaborators: stage contracts,
//! reconciliation behavior, cancellation and the orchestrator state machine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use supply_certis::domain::{DeviceId, IdentifierSet};
use supply_certis::infrastructure::artifact_store::{self, ArtifactStore, MemoryStore};
use supply_certis::infrastructure::config::AppConfig;
use supply_certis::infrastructure::http_client::{FetchError, PageFetcher};
use supply_certis::infrastructure::spreadsheet::{FeedError, Sheet, SpreadsheetReader};
use supply_certis::pipeline::progress::RecordingSink;
use supply_certis::pipeline::stages::{self, artifacts, ExtractionScope, StageContext};
use supply_certis::pipeline::{Orchestrator, PipelineError, PipelineState};
use supply_certis::{CompatibilityEntry, CompatibilityMap, ProductMap};

fn id(raw: &str) -> DeviceId {
    DeviceId::new(raw).unwrap()
}

/// Canned-response transport. Optionally fails specific URLs and cancels a
/// token after a given number of fetches (to exercise mid-stage
/// cancellation deterministically).
#[derive(Default)]
struct FakeFetcher {
    pages: HashMap<String, String>,
    failing: HashSet<String>,
    feed_bytes: Vec<u8>,
    cancel_after: Option<(usize, CancellationToken)>,
    fetches: AtomicUsize,
}

impl FakeFetcher {
    fn with_page(mut self, url: String, body: &str) -> Self {
        self.pages.insert(url, body.to_string());
        self
    }

    fn with_failure(mut self, url: String) -> Self {
        self.failing.insert(url);
        self
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let count = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if count >= *after {
                token.cancel();
            }
        }
        if self.failing.contains(url) {
            return Err(FetchError::Status {
                status: 500,
                url: url.to_string(),
            });
        }
        self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
            status: 404,
            url: url.to_string(),
        })
    }

    async fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(self.feed_bytes.clone())
    }
}

/// Returns canned sheets regardless of the scratch file's content.
struct FakeFeedReader {
    sheets: Vec<Sheet>,
}

impl FakeFeedReader {
    fn empty() -> Self {
        Self { sheets: Vec::new() }
    }

    fn with_rows(rows: &[&[&str]]) -> Self {
        Self {
            sheets: vec![Sheet {
                name: "price".to_string(),
                rows: rows
                    .iter()
                    .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                    .collect(),
            }],
        }
    }
}

impl SpreadsheetReader for FakeFeedReader {
    fn read_sheets(&self, _path: &std::path::Path) -> Result<Vec<Sheet>, FeedError> {
        Ok(self.sheets.clone())
    }
}

struct Harness {
    config: AppConfig,
    fetcher: FakeFetcher,
    store: MemoryStore,
    feed_reader: FakeFeedReader,
    sink: RecordingSink,
    _scratch_dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let scratch_dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            store_dir: scratch_dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        Self {
            config,
            fetcher: FakeFetcher::default(),
            store: MemoryStore::new(),
            feed_reader: FakeFeedReader::empty(),
            sink: RecordingSink::new(),
            _scratch_dir: scratch_dir,
        }
    }

    fn context<'a>(&'a self, token: &'a CancellationToken) -> StageContext<'a> {
        StageContext {
            config: &self.config,
            fetcher: &self.fetcher,
            store: &self.store,
            feed_reader: &self.feed_reader,
            sink: &self.sink,
            token,
        }
    }

    async fn seed<T: serde::Serialize>(&self, key: &str, value: &T) {
        artifact_store::save(&self.store, key, value).await.unwrap();
    }
}

fn listing_page(ids: &[&str]) -> String {
    ids.iter()
        .map(|raw| format!(r#"<a class="cells-wrapper" href="/Store/Details/{raw}">item</a>"#))
        .collect()
}

fn section(title: &str, ids: &[&str]) -> String {
    let links = listing_page(ids);
    format!(
        r#"<div class="grid space-top">
             <div class="grid-header"><h2 class="title">{title}</h2></div>
             {links}
           </div>"#
    )
}

fn detail_page(name: &str, availability: &str, price_attribute: &str) -> String {
    format!(
        r#"<div class="grid-body text-left space-top-tiny"><h1>{name}</h1></div>
           <span class="product-count">{availability}</span>
           <div class="product-price-container">
             <span data-bind="{price_attribute}"></span>
           </div>"#
    )
}

#[tokio::test]
async fn harvest_dedupes_and_rejects_malformed_identifiers() {
    let mut harness = Harness::new();
    let page = format!(
        "{}{}",
        listing_page(&["400000000001", "400000000002", "400000000001", "12345"]),
        r#"<a class="cells-wrapper" href="/Store/Browse/400000000009/cat">browse</a>"#
    );
    harness.fetcher = FakeFetcher::default().with_page(harness.config.listing_url(), &page);

    let token = CancellationToken::new();
    let outcome = stages::harvest_printers(&harness.context(&token)).await.unwrap();

    let ids = outcome.completed().unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|one| one.as_str().len() == 12));

    let persisted: IdentifierSet =
        artifact_store::load(&harness.store, artifacts::PRINTERS).await.unwrap();
    assert_eq!(persisted, ids);
}

#[tokio::test]
async fn compatibility_example_with_section_ordering() {
    let mut harness = Harness::new();
    let printer = id("400000000001");
    harness.seed(artifacts::PRINTERS, &IdentifierSet::from([printer.clone()])).await;

    let page = format!(
        "{}{}",
        section("Cartridges", &["500000000001", "500000000002"]),
        section("Parts", &["600000000001"])
    );
    harness.fetcher =
        FakeFetcher::default().with_page(harness.config.details_url(&printer), &page);

    let token = CancellationToken::new();
    let map = stages::resolve_compatibility(&harness.context(&token))
        .await
        .unwrap()
        .completed()
        .unwrap();

    let entry = &map[&printer];
    assert_eq!(entry.cartridges, [id("500000000001"), id("500000000002")].into());
    assert_eq!(entry.parts, [id("600000000001")].into());

    // Filter against a one-element stock set: parts list empties but the
    // printer is retained because cartridges survive.
    harness.seed(artifacts::STOCK, &IdentifierSet::from([id("500000000001")])).await;
    let filtered = stages::filter_compatibility(&harness.context(&token))
        .await
        .unwrap()
        .completed()
        .unwrap();

    let kept = &filtered[&printer];
    assert_eq!(kept.cartridges, [id("500000000001")].into());
    assert!(kept.parts.is_empty());

    let persisted: CompatibilityMap =
        artifact_store::load(&harness.store, artifacts::COMPATIBILITY_IN_STOCK)
            .await
            .unwrap();
    assert_eq!(persisted, filtered);
}

#[tokio::test]
async fn fetch_failed_printer_is_omitted_not_stored_empty() {
    let mut harness = Harness::new();
    let good = id("400000000001");
    let bad = id("400000000002");
    harness
        .seed(
            artifacts::PRINTERS,
            &IdentifierSet::from([good.clone(), bad.clone()]),
        )
        .await;

    harness.fetcher = FakeFetcher::default()
        .with_page(
            harness.config.details_url(&good),
            &section("Cartridges", &["500000000001"]),
        )
        .with_failure(harness.config.details_url(&bad));

    let token = CancellationToken::new();
    let map = stages::resolve_compatibility(&harness.context(&token))
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert!(map.contains_key(&good));
    assert!(!map.contains_key(&bad));
    assert!(harness
        .sink
        .messages()
        .iter()
        .any(|line| line.contains("skipping printer 400000000002")));
}

#[tokio::test]
async fn cancellation_mid_stage_discards_partial_results() {
    let mut harness = Harness::new();
    let printers: IdentifierSet = [id("400000000001"), id("400000000002"), id("400000000003")]
        .into();
    harness.seed(artifacts::PRINTERS, &printers).await;

    let token = CancellationToken::new();
    let mut fetcher = FakeFetcher::default();
    for printer in &printers {
        fetcher.pages.insert(
            harness.config.details_url(printer),
            section("Cartridges", &["500000000001"]),
        );
    }
    // The token trips during the second fetch; the loop notices at the
    // third identifier boundary.
    fetcher.cancel_after = Some((2, token.clone()));
    harness.fetcher = fetcher;

    let outcome = stages::resolve_compatibility(&harness.context(&token)).await.unwrap();
    assert!(outcome.is_cancelled());
    assert!(!harness.store.exists(artifacts::COMPATIBILITY).await);
    assert!(harness
        .sink
        .messages()
        .iter()
        .any(|line| line == "operation cancelled"));
}

#[tokio::test]
async fn filtering_without_stock_artifact_is_a_hard_stop() {
    let harness = Harness::new();
    let mut map = CompatibilityMap::new();
    map.insert(
        id("400000000001"),
        CompatibilityEntry {
            cartridges: [id("500000000001")].into(),
            parts: IdentifierSet::new(),
        },
    );
    harness.seed(artifacts::COMPATIBILITY, &map).await;

    let token = CancellationToken::new();
    let err = stages::filter_compatibility(&harness.context(&token)).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingArtifact { key } if key == artifacts::STOCK
    ));
}

#[tokio::test]
async fn build_stock_set_scans_feed_and_persists() {
    let mut harness = Harness::new();
    harness.fetcher = FakeFetcher::default();
    harness.feed_reader = FakeFeedReader::with_rows(&[
        &["Wholesale price list"],
        &["1", "Cartridge X", "500000000001", "box", "12", "3"],
        &["2", "Part Y", "600000000001", "pc", "1", "0"],
        &["3", "no identifier here", "-", "-", "-", "-"],
    ]);

    let token = CancellationToken::new();
    let stock = stages::build_stock_set(&harness.context(&token))
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(stock, [id("500000000001"), id("600000000001")].into());
    // Scratch feed file is short-lived: gone once the artifact is saved.
    assert!(!harness.config.feed_scratch_path().exists());
    let persisted: IdentifierSet =
        artifact_store::load(&harness.store, artifacts::STOCK).await.unwrap();
    assert_eq!(persisted, stock);
}

#[tokio::test]
async fn extraction_merges_in_transit_before_the_single_save() {
    let mut harness = Harness::new();
    let mut map = CompatibilityMap::new();
    map.insert(
        id("400000000001"),
        CompatibilityEntry {
            cartridges: [id("500000000001"), id("500000000002")].into(),
            parts: IdentifierSet::new(),
        },
    );
    harness.seed(artifacts::COMPATIBILITY_IN_STOCK, &map).await;

    harness.feed_reader = FakeFeedReader::with_rows(&[
        &["1", "Cartridge X", "500000000001", "box", "12", "4"],
    ]);
    harness.fetcher = FakeFetcher::default()
        .with_page(
            harness.config.details_url(&id("500000000001")),
            &detail_page("Cartridge X", "17", "text: getBrowsingPrice(199.99, 150.00)"),
        )
        .with_page(
            harness.config.details_url(&id("500000000002")),
            &detail_page("Cartridge Y", "0", "text: askForPrice()"),
        );

    let token = CancellationToken::new();
    let products = stages::extract_details(&harness.context(&token), ExtractionScope::InStock)
        .await
        .unwrap()
        .completed()
        .unwrap();

    let first = &products[&id("500000000001")];
    assert_eq!(first.name, "Cartridge X");
    assert_eq!(first.availability, 17);
    assert_eq!(first.retail_price, 199.99);
    assert_eq!(first.wholesale_price, 150.00);
    assert_eq!(first.in_transit, 4);

    // Absent from the feed: defaults to zero; unmatched price attribute
    // degrades to zero prices with a logged diagnostic.
    let second = &products[&id("500000000002")];
    assert_eq!(second.in_transit, 0);
    assert_eq!(second.retail_price, 0.0);
    assert!(harness
        .sink
        .messages()
        .iter()
        .any(|line| line.starts_with("500000000002:") && line.contains("askForPrice")));

    let persisted: ProductMap =
        artifact_store::load(&harness.store, artifacts::PRODUCTS_IN_STOCK)
            .await
            .unwrap();
    assert_eq!(persisted, products);
}

#[tokio::test]
async fn extraction_without_prerequisite_artifact_reports_its_identity() {
    let harness = Harness::new();
    let token = CancellationToken::new();
    let err = stages::extract_details(&harness.context(&token), ExtractionScope::AllKnown)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingArtifact { key } if key == artifacts::COMPATIBILITY
    ));
}

fn orchestrator_with(harness: Harness) -> Orchestrator {
    Orchestrator::new(
        harness.config,
        Arc::new(harness.fetcher),
        Arc::new(harness.store),
        Arc::new(harness.feed_reader),
        Arc::new(harness.sink),
    )
}

#[tokio::test]
async fn full_pipeline_reaches_persisted() {
    let mut harness = Harness::new();
    let printer = id("400000000001");
    let cartridge = id("500000000001");

    harness.fetcher = FakeFetcher::default()
        .with_page(
            harness.config.listing_url(),
            &listing_page(&["400000000001"]),
        )
        .with_page(
            harness.config.details_url(&printer),
            &format!(
                "{}{}",
                section("Cartridges", &["500000000001"]),
                section("Parts", &["600000000001"])
            ),
        )
        .with_page(
            harness.config.details_url(&cartridge),
            &detail_page("Cartridge X", "5", "text: getBrowsingPrice(99.90, 70.00)"),
        );
    harness.feed_reader = FakeFeedReader::with_rows(&[
        &["1", "Cartridge X", "500000000001", "box", "12", "2"],
    ]);

    let orchestrator = orchestrator_with(harness);
    let token = CancellationToken::new();
    let products = orchestrator
        .run_full_pipeline(&token)
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(orchestrator.state(), PipelineState::Persisted);
    // The part is out of stock, so only the cartridge is extracted.
    assert_eq!(products.len(), 1);
    assert_eq!(products[&cartridge].in_transit, 2);
}

#[tokio::test]
async fn full_pipeline_with_empty_listing_fails_with_cause() {
    let mut harness = Harness::new();
    harness.fetcher =
        FakeFetcher::default().with_page(harness.config.listing_url(), "<html></html>");

    let orchestrator = orchestrator_with(harness);
    let token = CancellationToken::new();
    let err = orchestrator.run_full_pipeline(&token).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::EmptyArtifact { key } if key == artifacts::PRINTERS
    ));
    assert_eq!(orchestrator.state(), PipelineState::Failed);
}

#[tokio::test]
async fn pre_cancelled_token_reports_cancelled_not_failed() {
    let mut harness = Harness::new();
    harness.fetcher =
        FakeFetcher::default().with_page(harness.config.listing_url(), "<html></html>");

    let orchestrator = orchestrator_with(harness);
    let token = CancellationToken::new();
    token.cancel();

    let outcome = orchestrator.harvest_printers(&token).await.unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(orchestrator.state(), PipelineState::Cancelled);
}

/// Fetcher that reports when a fetch has begun and blocks until released,
/// keeping the first run's guard held while a second run is attempted.
struct GatedFetcher {
    entered: std::sync::Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
    release: tokio::sync::Notify,
}

#[async_trait]
impl PageFetcher for GatedFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        if let Some(entered) = self.entered.lock().unwrap().take() {
            let _ = entered.send(());
        }
        self.release.notified().await;
        Err(FetchError::Status {
            status: 404,
            url: url.to_string(),
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch_text(url).await.map(String::into_bytes)
    }
}

#[tokio::test]
async fn second_concurrent_run_is_rejected() {
    let harness = Harness::new();
    let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
    let fetcher = Arc::new(GatedFetcher {
        entered: std::sync::Mutex::new(Some(entered_tx)),
        release: tokio::sync::Notify::new(),
    });

    let orchestrator = Arc::new(Orchestrator::new(
        harness.config,
        Arc::clone(&fetcher) as Arc<dyn PageFetcher>,
        Arc::new(harness.store),
        Arc::new(harness.feed_reader),
        Arc::new(harness.sink),
    ));

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let token = CancellationToken::new();
        tokio::spawn(async move { orchestrator.harvest_printers(&token).await })
    };
    // The first run is now inside its fetch, holding the run guard.
    entered_rx.await.unwrap();

    let token = CancellationToken::new();
    let second = orchestrator.harvest_printers(&token).await;
    assert!(matches!(second, Err(PipelineError::RunInProgress)));

    fetcher.release.notify_one();
    let first = first.await.unwrap();
    assert!(matches!(first, Err(PipelineError::Fetch(_))));

    // With the first run settled, the guard is free again.
    let token = CancellationToken::new();
    token.cancel();
    let outcome = orchestrator.harvest_printers(&token).await.unwrap();
    assert!(outcome.is_cancelled());
}
