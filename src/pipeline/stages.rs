//! One operation per pipeline stage.
//!
//! Every stage reads its input from the artifact store, never from an
//! in-memory hand-off, so re-runs are idempotent and never re-derive a
//! cached artifact over the network. Item loops check the cancellation
//! token once per identifier; a cancelled stage discards its partial result
//! and persists nothing. A failed fetch for one identifier skips that
//! identifier with a log line and continues the batch.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::compatibility::referenced_identifiers;
use crate::domain::{CompatibilityMap, DeviceId, IdentifierSet, ProductMap};
use crate::infrastructure::artifact_store::{self, ArtifactStore, StoreError};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::parsing::{CompatibilityParser, DetailParser, ListingParser};
use crate::infrastructure::spreadsheet::{self, SpreadsheetReader};
use crate::pipeline::error::{PipelineError, StageOutcome, StageResult};
use crate::pipeline::progress::EventSink;
use crate::pipeline::reconcile;

/// Artifact keys, one per stage output.
pub mod artifacts {
    pub const PRINTERS: &str = "printers";
    pub const STOCK: &str = "stock";
    pub const COMPATIBILITY: &str = "compatibility";
    pub const COMPATIBILITY_IN_STOCK: &str = "compatibility_in_stock";
    pub const PRODUCTS_IN_STOCK: &str = "products_in_stock";
    pub const PRODUCTS_ALL: &str = "products_all";
    pub const PRODUCTS_GENERAL: &str = "products_general";
}

/// Everything a stage needs, borrowed for the duration of one call. The
/// collaborators behind the references are the seams the tests fake.
pub struct StageContext<'a> {
    pub config: &'a AppConfig,
    pub fetcher: &'a dyn PageFetcher,
    pub store: &'a dyn ArtifactStore,
    pub feed_reader: &'a dyn SpreadsheetReader,
    pub sink: &'a dyn EventSink,
    pub token: &'a CancellationToken,
}

impl StageContext<'_> {
    fn cancelled<T>(&self) -> StageResult<T> {
        self.sink.log("operation cancelled");
        Ok(StageOutcome::Cancelled)
    }
}

/// Load a stage's required input artifact; absence is fatal to the stage.
async fn load_required<T: DeserializeOwned>(
    ctx: &StageContext<'_>,
    key: &str,
) -> Result<T, PipelineError> {
    match artifact_store::load(ctx.store, key).await {
        Ok(value) => Ok(value),
        Err(StoreError::NotFound { key }) => Err(PipelineError::MissingArtifact { key }),
        Err(other) => Err(other.into()),
    }
}

/// Harvest the printer identifier set from the listing page.
///
/// One page, one fetch: a transport failure here fails the stage (there is
/// no batch to continue). The harvested set overwrites the prior artifact.
pub async fn harvest_printers(ctx: &StageContext<'_>) -> StageResult<IdentifierSet> {
    if ctx.token.is_cancelled() {
        return ctx.cancelled();
    }

    let parser = ListingParser::new(&ctx.config.parsing.listing)?;
    let page = ctx.fetcher.fetch_text(&ctx.config.listing_url()).await?;
    let ids = parser.harvest(&page);

    artifact_store::save(ctx.store, artifacts::PRINTERS, &ids).await?;
    ctx.sink.log(&format!(
        "found {} printers; identifiers saved to '{}'",
        ids.len(),
        artifacts::PRINTERS
    ));
    Ok(StageOutcome::Completed(ids))
}

/// Download the price feed and build the stock identifier set.
///
/// The feed file is scratch state, deleted once parsed; the durable output
/// is the stock artifact.
pub async fn build_stock_set(ctx: &StageContext<'_>) -> StageResult<IdentifierSet> {
    if ctx.token.is_cancelled() {
        return ctx.cancelled();
    }

    let scratch = ctx.config.feed_scratch_path();
    download_feed(ctx, &scratch).await?;
    let sheets = ctx.feed_reader.read_sheets(&scratch)?;

    let mut ids = IdentifierSet::new();
    for sheet in &sheets {
        if ctx.token.is_cancelled() {
            let _ = tokio::fs::remove_file(&scratch).await;
            return ctx.cancelled();
        }
        ids.extend(spreadsheet::scan_stock_identifiers(std::slice::from_ref(sheet)));
    }

    artifact_store::save(ctx.store, artifacts::STOCK, &ids).await?;
    let _ = tokio::fs::remove_file(&scratch).await;
    ctx.sink.log(&format!(
        "stock feed parsed: {} identifiers in stock",
        ids.len()
    ));
    Ok(StageOutcome::Completed(ids))
}

/// Resolve cartridge/part compatibility for every harvested printer.
///
/// A printer whose page fetch fails, or whose page lists no compatible
/// products, is omitted from the output map entirely.
pub async fn resolve_compatibility(ctx: &StageContext<'_>) -> StageResult<CompatibilityMap> {
    let printers: IdentifierSet = load_required(ctx, artifacts::PRINTERS).await?;
    if printers.is_empty() {
        return Err(PipelineError::empty_artifact(artifacts::PRINTERS));
    }

    let parser = CompatibilityParser::new(&ctx.config.parsing.sections)?;
    let total = printers.len();
    let mut map = CompatibilityMap::new();

    for (index, printer) in printers.iter().enumerate() {
        if ctx.token.is_cancelled() {
            return ctx.cancelled();
        }
        ctx.sink.progress(index + 1, total);

        let page = match ctx.fetcher.fetch_text(&ctx.config.details_url(printer)).await {
            Ok(page) => page,
            Err(e) => {
                warn!("printer {printer}: page fetch failed: {e}");
                ctx.sink
                    .log(&format!("skipping printer {printer}: {e}"));
                continue;
            }
        };

        let entry = parser.partition(&page);
        if entry.is_empty() {
            ctx.sink
                .log(&format!("printer {printer}: no compatible products listed"));
            continue;
        }
        ctx.sink.log(&format!(
            "printer {printer}: {} cartridge(s), {} part(s)",
            entry.cartridges.len(),
            entry.parts.len()
        ));
        map.insert(printer.clone(), entry);
    }

    if map.is_empty() {
        ctx.sink.log("no compatibility data collected");
        return Ok(StageOutcome::Completed(map));
    }

    artifact_store::save(ctx.store, artifacts::COMPATIBILITY, &map).await?;
    ctx.sink.log(&format!(
        "compatibility for {} printers saved to '{}'",
        map.len(),
        artifacts::COMPATIBILITY
    ));
    Ok(StageOutcome::Completed(map))
}

/// Filter the compatibility map down to identifiers present in the stock
/// artifact. Both inputs must exist and be non-empty.
pub async fn filter_compatibility(ctx: &StageContext<'_>) -> StageResult<CompatibilityMap> {
    let map: CompatibilityMap = load_required(ctx, artifacts::COMPATIBILITY).await?;
    if map.is_empty() {
        return Err(PipelineError::empty_artifact(artifacts::COMPATIBILITY));
    }
    let stock: IdentifierSet = load_required(ctx, artifacts::STOCK).await?;
    if stock.is_empty() {
        return Err(PipelineError::empty_artifact(artifacts::STOCK));
    }

    let total = map.len();
    let mut filtered = CompatibilityMap::new();
    for (index, (printer, entry)) in map.iter().enumerate() {
        if ctx.token.is_cancelled() {
            return ctx.cancelled();
        }
        ctx.sink.progress(index + 1, total);

        let kept = reconcile::filter_entry(entry, &stock);
        if kept.is_empty() {
            ctx.sink
                .log(&format!("printer {printer}: dropped, nothing in stock"));
        } else {
            ctx.sink.log(&format!(
                "printer {printer}: kept {} cartridge(s), {} part(s)",
                kept.cartridges.len(),
                kept.parts.len()
            ));
            filtered.insert(printer.clone(), kept);
        }
    }

    if filtered.is_empty() {
        ctx.sink.log("nothing left after stock filtering");
        return Ok(StageOutcome::Completed(filtered));
    }

    artifact_store::save(ctx.store, artifacts::COMPATIBILITY_IN_STOCK, &filtered).await?;
    ctx.sink.log(&format!(
        "filtered compatibility for {} printers saved to '{}'",
        filtered.len(),
        artifacts::COMPATIBILITY_IN_STOCK
    ));
    Ok(StageOutcome::Completed(filtered))
}

/// Which identifier universe a detail-extraction pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionScope {
    /// Cartridges/parts referenced by the stock-filtered compatibility map.
    InStock,
    /// Cartridges/parts referenced by the unfiltered compatibility map.
    AllKnown,
    /// The general product line: every identifier in the stock artifact.
    GeneralCatalog,
}

impl ExtractionScope {
    pub fn artifact_key(self) -> &'static str {
        match self {
            Self::InStock => artifacts::PRODUCTS_IN_STOCK,
            Self::AllKnown => artifacts::PRODUCTS_ALL,
            Self::GeneralCatalog => artifacts::PRODUCTS_GENERAL,
        }
    }

    fn source_key(self) -> &'static str {
        match self {
            Self::InStock => artifacts::COMPATIBILITY_IN_STOCK,
            Self::AllKnown => artifacts::COMPATIBILITY,
            Self::GeneralCatalog => artifacts::STOCK,
        }
    }
}

/// Resolve the identifier union an extraction pass must visit, from the
/// already-persisted prerequisite artifact.
pub async fn extraction_targets(
    ctx: &StageContext<'_>,
    scope: ExtractionScope,
) -> Result<IdentifierSet, PipelineError> {
    let ids = match scope {
        ExtractionScope::InStock | ExtractionScope::AllKnown => {
            let map: CompatibilityMap = load_required(ctx, scope.source_key()).await?;
            referenced_identifiers(&map)
        }
        ExtractionScope::GeneralCatalog => load_required(ctx, scope.source_key()).await?,
    };
    if ids.is_empty() {
        return Err(PipelineError::empty_artifact(scope.source_key()));
    }
    Ok(ids)
}

/// Build the in-transit quantity map from the feed, re-downloading the
/// scratch file if it is gone. Degraded, not fatal: without a feed every
/// quantity reads as 0.
pub async fn load_in_transit(ctx: &StageContext<'_>) -> BTreeMap<DeviceId, u32> {
    let scratch = ctx.config.feed_scratch_path();
    if !scratch.exists() {
        ctx.sink.log("price feed absent; downloading");
        if let Err(e) = download_feed(ctx, &scratch).await {
            ctx.sink.log(&format!(
                "price feed unavailable ({e}); in-transit quantities default to 0"
            ));
            return BTreeMap::new();
        }
    }
    match ctx.feed_reader.read_sheets(&scratch) {
        Ok(sheets) => {
            let quantities = spreadsheet::scan_in_transit(&sheets);
            ctx.sink
                .log(&format!("{} in-transit quantities loaded", quantities.len()));
            quantities
        }
        Err(e) => {
            ctx.sink.log(&format!(
                "price feed unreadable ({e}); in-transit quantities default to 0"
            ));
            BTreeMap::new()
        }
    }
}

/// Fetch and extract a product record for every identifier. Per-identifier
/// fetch failures skip that identifier; field diagnostics are forwarded to
/// the sink with the identifier attached.
pub async fn collect_product_records(
    ctx: &StageContext<'_>,
    ids: &IdentifierSet,
) -> StageResult<ProductMap> {
    let parser = DetailParser::new(&ctx.config.parsing.detail)?;
    let total = ids.len();
    let mut products = ProductMap::new();

    for (index, id) in ids.iter().enumerate() {
        if ctx.token.is_cancelled() {
            return ctx.cancelled();
        }
        ctx.sink.progress(index + 1, total);

        let page = match ctx.fetcher.fetch_text(&ctx.config.details_url(id)).await {
            Ok(page) => page,
            Err(e) => {
                warn!("product {id}: page fetch failed: {e}");
                ctx.sink.log(&format!("skipping {id}: {e}"));
                continue;
            }
        };

        let (record, diagnostics) = parser.extract(&page);
        for diagnostic in diagnostics {
            ctx.sink.log(&format!("{id}: {diagnostic}"));
        }
        products.insert(id.clone(), record);
    }

    Ok(StageOutcome::Completed(products))
}

/// Patch a just-collected product map with in-transit quantities from the
/// feed. Operates on the in-memory map only, before its one save;
/// already-persisted artifacts are never rewritten.
pub async fn merge_in_transit(
    ctx: &StageContext<'_>,
    products: &mut ProductMap,
) -> StageResult<()> {
    if ctx.token.is_cancelled() {
        return ctx.cancelled();
    }
    let in_transit = load_in_transit(ctx).await;
    reconcile::merge_in_transit(products, &in_transit);
    ctx.sink.log(&format!(
        "in-transit quantities merged into {} records",
        products.len()
    ));
    Ok(StageOutcome::Completed(()))
}

/// Full detail-extraction pass: resolve targets, collect records, merge
/// in-transit quantities, persist once.
pub async fn extract_details(
    ctx: &StageContext<'_>,
    scope: ExtractionScope,
) -> StageResult<ProductMap> {
    let ids = extraction_targets(ctx, scope).await?;
    ctx.sink
        .log(&format!("{} unique identifiers to extract", ids.len()));

    let mut products = match collect_product_records(ctx, &ids).await? {
        StageOutcome::Completed(products) => products,
        StageOutcome::Cancelled => return Ok(StageOutcome::Cancelled),
    };
    if merge_in_transit(ctx, &mut products).await?.is_cancelled() {
        return Ok(StageOutcome::Cancelled);
    }

    if products.is_empty() {
        ctx.sink.log("no product data collected");
        return Ok(StageOutcome::Completed(products));
    }

    artifact_store::save(ctx.store, scope.artifact_key(), &products).await?;
    ctx.sink.log(&format!(
        "{} product records saved to '{}'",
        products.len(),
        scope.artifact_key()
    ));
    Ok(StageOutcome::Completed(products))
}

async fn download_feed(ctx: &StageContext<'_>, scratch: &Path) -> Result<(), PipelineError> {
    let bytes = ctx.fetcher.fetch_bytes(&ctx.config.feed_url()).await?;
    if let Some(parent) = scratch.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(PipelineError::Scratch)?;
    }
    tokio::fs::write(scratch, &bytes)
        .await
        .map_err(PipelineError::Scratch)?;
    ctx.sink.log("price feed downloaded");
    Ok(())
}
