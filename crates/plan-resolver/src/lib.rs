//! Plan-Resolver: tiered lookup of saved query execution plans
//!
//! Finds the saved execution plan for a plan identifier by running the
//! external plan retrieval tool against the live plan store and then
//! against numbered archive directories, newest first, until the output
//! looks like a real plan.
//!
//! ## Components
//!
//! - [`validator`]: classifies retrieved text as a plan or as noise
//! - [`discovery`]: lists and orders archive tiers
//! - [`extractor`]: runs the tool for one tier and captures its output
//! - [`orchestrator`]: the tiered search policy
//!
//! Focus: never mistake a "not found" notice for a plan.

pub mod attempt;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extractor;
pub mod fakes;
pub mod orchestrator;
pub mod telemetry;
pub mod tier;
pub mod validator;

pub use attempt::{ProcessOutcome, RetrievalAttempt};
pub use config::{ArchiveConfig, ArtifactConfig, ResolverConfig, ToolConfig, ValidatorConfig};
pub use discovery::{discover, TierCache};
pub use error::ResolveError;
pub use extractor::{
    tool_args, CaptureFile, Extraction, PlanExtractor, PlanRetriever, PlanTool, ToolLocator,
};
pub use orchestrator::{
    artifact_digest, ComprehensiveRetry, Continuation, FailureKind, FoundPlan, PlanHit,
    SearchFailure, SearchMode, SearchOptions, SearchOrchestrator, SearchResult, SearchState,
    SurveyReport,
};
pub use telemetry::init_tracing;
pub use tier::{ArchiveTier, PlanId, Tier};
pub use validator::{ContentValidator, RejectReason, ValidationRule, Verdict};

/// Result type for plan-resolver operations
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Locate the retrieval tool and build an orchestrator from `config`
///
/// Fails fast with [`ResolveError::ToolNotFound`].
pub fn orchestrator_from_config(config: &ResolverConfig) -> Result<SearchOrchestrator<PlanTool>> {
    let tool = PlanTool::locate(&config.tool)?;
    Ok(SearchOrchestrator::from_config(tool, config))
}
