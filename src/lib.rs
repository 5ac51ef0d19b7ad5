//! supply-certis: staged printer-supply catalog crawler
//!
//! Harvests device identifiers from the vendor catalog, resolves per-printer
//! cartridge/part compatibility, reconciles the result against the wholesale
//! stock feed and persists each stage's output as a JSON artifact so that
//! later stages (and later runs) resume from durable state instead of
//! re-fetching the network.

pub mod domain;
pub mod infrastructure;
pub mod pipeline;

pub use domain::{
    CompatibilityEntry, CompatibilityMap, DeviceId, IdentifierSet, ProductMap, ProductRecord,
};
pub use infrastructure::artifact_store::{ArtifactStore, JsonFileStore, MemoryStore};
pub use infrastructure::config::AppConfig;
pub use infrastructure::http_client::{HttpSession, PageFetcher};
pub use pipeline::error::{PipelineError, StageOutcome};
pub use pipeline::orchestrator::{Orchestrator, PipelineState};
pub use pipeline::progress::EventSink;
