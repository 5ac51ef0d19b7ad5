//! The staged crawl-and-reconcile pipeline.
//!
//! Each stage is a function from loaded artifacts to a new artifact, with
//! the artifact store as the only stateful boundary; the orchestrator
//! sequences stages, enforces artifact preconditions, forwards progress and
//! honors cancellation.

pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod reconcile;
pub mod stages;

pub use error::{PipelineError, StageOutcome, StageResult};
pub use orchestrator::{Orchestrator, PipelineState};
pub use progress::{EventSink, RecordingSink, TracingSink};
pub use stages::{artifacts, ExtractionScope, StageContext};
