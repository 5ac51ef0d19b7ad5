//! Pipeline orchestration: run state machine, single-run guard, composite
//! workflows.
//!
//! Composite workflows are transactional at the orchestration level only:
//! if a later stage fails, earlier stages' artifacts stay persisted and are
//! reused by the next run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::domain::compatibility::referenced_identifiers;
use crate::domain::{CompatibilityMap, IdentifierSet, ProductMap};
use crate::infrastructure::artifact_store::{self, ArtifactStore};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::spreadsheet::SpreadsheetReader;
use crate::pipeline::error::{PipelineError, StageOutcome, StageResult};
use crate::pipeline::progress::EventSink;
use crate::pipeline::stages::{self, artifacts, ExtractionScope, StageContext};

/// Where a run currently is. `Cancelled` and `Failed` are terminal for the
/// run that reached them; the next run starts over from `Harvesting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PipelineState {
    Idle,
    Harvesting,
    AwaitingStockFeed,
    ResolvingCompatibility,
    Filtering,
    ExtractingDetails,
    MergingInTransit,
    Persisted,
    Cancelled,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Harvesting => "harvesting",
            Self::AwaitingStockFeed => "awaiting stock feed",
            Self::ResolvingCompatibility => "resolving compatibility",
            Self::Filtering => "filtering",
            Self::ExtractingDetails => "extracting details",
            Self::MergingInTransit => "merging in-transit quantities",
            Self::Persisted => "persisted",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct Orchestrator {
    config: AppConfig,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn ArtifactStore>,
    feed_reader: Arc<dyn SpreadsheetReader>,
    sink: Arc<dyn EventSink>,
    state: Mutex<PipelineState>,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn ArtifactStore>,
        feed_reader: Arc<dyn SpreadsheetReader>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            fetcher,
            store,
            feed_reader,
            sink,
            state: Mutex::new(PipelineState::Idle),
            running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().expect("state mutex poisoned")
    }

    fn set_state(&self, next: PipelineState) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        debug!("pipeline state: {} -> {}", *state, next);
        *state = next;
    }

    /// Intermediate artifacts are shared mutable files, so at most one run
    /// may be active; a second start is rejected, not queued.
    fn begin_run(&self) -> Result<RunGuard<'_>, PipelineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::RunInProgress);
        }
        Ok(RunGuard { owner: self })
    }

    fn stage_context<'a>(&'a self, token: &'a CancellationToken) -> StageContext<'a> {
        StageContext {
            config: &self.config,
            fetcher: self.fetcher.as_ref(),
            store: self.store.as_ref(),
            feed_reader: self.feed_reader.as_ref(),
            sink: self.sink.as_ref(),
            token,
        }
    }

    /// Record the terminal state of a run from its outcome, then hand the
    /// outcome back. `completed` is the state a successful run ends in.
    fn settle<T>(&self, outcome: StageResult<T>, completed: PipelineState) -> StageResult<T> {
        match &outcome {
            Ok(StageOutcome::Completed(_)) => self.set_state(completed),
            Ok(StageOutcome::Cancelled) => self.set_state(PipelineState::Cancelled),
            Err(e) => {
                error!("pipeline stage failed: {e}");
                self.set_state(PipelineState::Failed);
            }
        }
        outcome
    }

    pub async fn harvest_printers(&self, token: &CancellationToken) -> StageResult<IdentifierSet> {
        let _run = self.begin_run()?;
        self.set_state(PipelineState::Harvesting);
        let outcome = stages::harvest_printers(&self.stage_context(token)).await;
        self.settle(outcome, PipelineState::Idle)
    }

    pub async fn build_stock_set(&self, token: &CancellationToken) -> StageResult<IdentifierSet> {
        let _run = self.begin_run()?;
        self.set_state(PipelineState::AwaitingStockFeed);
        let outcome = stages::build_stock_set(&self.stage_context(token)).await;
        self.settle(outcome, PipelineState::Idle)
    }

    pub async fn resolve_compatibility(
        &self,
        token: &CancellationToken,
    ) -> StageResult<CompatibilityMap> {
        let _run = self.begin_run()?;
        self.set_state(PipelineState::ResolvingCompatibility);
        let outcome = stages::resolve_compatibility(&self.stage_context(token)).await;
        self.settle(outcome, PipelineState::Idle)
    }

    pub async fn filter_by_stock(&self, token: &CancellationToken) -> StageResult<CompatibilityMap> {
        let _run = self.begin_run()?;
        self.set_state(PipelineState::Filtering);
        let outcome = stages::filter_compatibility(&self.stage_context(token)).await;
        self.settle(outcome, PipelineState::Idle)
    }

    pub async fn extract_details(
        &self,
        scope: ExtractionScope,
        token: &CancellationToken,
    ) -> StageResult<ProductMap> {
        let _run = self.begin_run()?;
        self.set_state(PipelineState::ExtractingDetails);
        let outcome = stages::extract_details(&self.stage_context(token), scope).await;
        self.settle(outcome, PipelineState::Idle)
    }

    /// Patch an in-memory product map with feed in-transit quantities.
    /// Exposed for callers that collect records themselves; the composite
    /// passes apply it automatically before their one save.
    pub async fn merge_in_transit(
        &self,
        products: &mut ProductMap,
        token: &CancellationToken,
    ) -> StageResult<()> {
        let _run = self.begin_run()?;
        self.set_state(PipelineState::MergingInTransit);
        let outcome = stages::merge_in_transit(&self.stage_context(token), products).await;
        self.settle(outcome, PipelineState::Idle)
    }

    /// Composite: harvest the printer set, then build the stock set. The
    /// printer artifact survives a stock-feed failure.
    pub async fn harvest_catalog(&self, token: &CancellationToken) -> StageResult<IdentifierSet> {
        let _run = self.begin_run()?;
        let ctx = self.stage_context(token);

        self.set_state(PipelineState::Harvesting);
        match stages::harvest_printers(&ctx).await {
            Ok(StageOutcome::Completed(_)) => {}
            other => return self.settle(other, PipelineState::Idle),
        }

        self.set_state(PipelineState::AwaitingStockFeed);
        let outcome = stages::build_stock_set(&ctx).await;
        self.settle(outcome, PipelineState::Idle)
    }

    /// Composite: resolve compatibility, then filter by stock. The full
    /// compatibility artifact survives a filtering failure.
    pub async fn resolve_and_filter(
        &self,
        token: &CancellationToken,
    ) -> StageResult<CompatibilityMap> {
        let _run = self.begin_run()?;
        let ctx = self.stage_context(token);

        self.set_state(PipelineState::ResolvingCompatibility);
        match stages::resolve_compatibility(&ctx).await {
            Ok(StageOutcome::Completed(_)) => {}
            other => return self.settle(other, PipelineState::Idle),
        }

        self.set_state(PipelineState::Filtering);
        let outcome = stages::filter_compatibility(&ctx).await;
        self.settle(outcome, PipelineState::Idle)
    }

    /// Run every stage in dependency order and persist the final in-stock
    /// product dataset.
    pub async fn run_full_pipeline(&self, token: &CancellationToken) -> StageResult<ProductMap> {
        let _run = self.begin_run()?;
        let ctx = self.stage_context(token);
        let outcome = self.drive_pipeline(&ctx).await;
        self.settle(outcome, PipelineState::Persisted)
    }

    async fn drive_pipeline(&self, ctx: &StageContext<'_>) -> StageResult<ProductMap> {
        self.set_state(PipelineState::Harvesting);
        let printers = match stages::harvest_printers(ctx).await? {
            StageOutcome::Completed(printers) => printers,
            StageOutcome::Cancelled => return Ok(StageOutcome::Cancelled),
        };
        if printers.is_empty() {
            return Err(PipelineError::empty_artifact(artifacts::PRINTERS));
        }

        self.set_state(PipelineState::AwaitingStockFeed);
        let stock = match stages::build_stock_set(ctx).await? {
            StageOutcome::Completed(stock) => stock,
            StageOutcome::Cancelled => return Ok(StageOutcome::Cancelled),
        };
        if stock.is_empty() {
            return Err(PipelineError::empty_artifact(artifacts::STOCK));
        }

        self.set_state(PipelineState::ResolvingCompatibility);
        let map = match stages::resolve_compatibility(ctx).await? {
            StageOutcome::Completed(map) => map,
            StageOutcome::Cancelled => return Ok(StageOutcome::Cancelled),
        };
        if map.is_empty() {
            return Err(PipelineError::empty_artifact(artifacts::COMPATIBILITY));
        }

        self.set_state(PipelineState::Filtering);
        let filtered = match stages::filter_compatibility(ctx).await? {
            StageOutcome::Completed(filtered) => filtered,
            StageOutcome::Cancelled => return Ok(StageOutcome::Cancelled),
        };
        if filtered.is_empty() {
            return Err(PipelineError::empty_artifact(artifacts::COMPATIBILITY_IN_STOCK));
        }

        self.set_state(PipelineState::ExtractingDetails);
        let targets = referenced_identifiers(&filtered);
        let mut products = match stages::collect_product_records(ctx, &targets).await? {
            StageOutcome::Completed(products) => products,
            StageOutcome::Cancelled => return Ok(StageOutcome::Cancelled),
        };

        self.set_state(PipelineState::MergingInTransit);
        if stages::merge_in_transit(ctx, &mut products).await?.is_cancelled() {
            return Ok(StageOutcome::Cancelled);
        }

        artifact_store::save(ctx.store, artifacts::PRODUCTS_IN_STOCK, &products).await?;
        ctx.sink.log(&format!(
            "full pipeline finished: {} product records saved to '{}'",
            products.len(),
            artifacts::PRODUCTS_IN_STOCK
        ));
        Ok(StageOutcome::Completed(products))
    }
}

struct RunGuard<'a> {
    owner: &'a Orchestrator,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.owner.running.store(false, Ordering::SeqCst);
    }
}
