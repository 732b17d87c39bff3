//! Tiered plan search
//!
//! Tries the live plan store first, then archive tiers newest first, one at
//! a time. The first valid artifact ends the search. A bounded search stops
//! after a fixed number of archive tiers and hands back a
//! [`ComprehensiveRetry`] the caller can use to continue over the rest.

use crate::attempt::RetrievalAttempt;
use crate::config::{ResolverConfig, DEFAULT_MAX_BOUNDED_TIERS};
use crate::discovery::TierCache;
use crate::error::ResolveError;
use crate::extractor::{Extraction, PlanExtractor, PlanRetriever};
use crate::tier::{ArchiveTier, PlanId, Tier};
use crate::validator::{ContentValidator, Verdict};
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn, Instrument};

/// How far a search may go past the default tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Live plan store only
    DefaultOnly,
    /// Default tier, then at most `max_bounded_tiers` archives
    BoundedArchiveSearch,
    /// Default tier, then every archive
    ComprehensiveSearch,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SearchMode::DefaultOnly => "default-only",
            SearchMode::BoundedArchiveSearch => "bounded",
            SearchMode::ComprehensiveSearch => "comprehensive",
        };
        f.write_str(name)
    }
}

/// Search progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    NotStarted,
    TryingDefault,
    TryingArchives,
    Found,
    Exhausted,
}

impl SearchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SearchState::Found | SearchState::Exhausted)
    }

    /// Allowed transitions.
    ///
    /// `NotStarted -> TryingArchives` is a manual-path lookup;
    /// `Exhausted -> TryingArchives` is a comprehensive retry.
    pub fn can_advance(self, next: SearchState) -> bool {
        use SearchState::*;
        matches!(
            (self, next),
            (NotStarted, TryingDefault)
                | (NotStarted, TryingArchives)
                | (TryingDefault, Found)
                | (TryingDefault, TryingArchives)
                | (TryingDefault, Exhausted)
                | (TryingArchives, Found)
                | (TryingArchives, Exhausted)
                | (Exhausted, TryingArchives)
        )
    }
}

/// Why a search ended without a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Every applicable tier was tried
    Exhausted,
    /// Archive base directory is missing
    BaseNotFound { path: PathBuf },
    /// Archive base holds no numeric directories
    NoArchivesFound { path: PathBuf },
    /// Archive base exists but could not be listed
    ArchivesUnreadable { path: PathBuf, message: String },
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Exhausted => write!(f, "no valid plan in any searched tier"),
            FailureKind::BaseNotFound { path } => {
                write!(f, "archive base {} not found", path.display())
            }
            FailureKind::NoArchivesFound { path } => {
                write!(f, "no archive directories under {}", path.display())
            }
            FailureKind::ArchivesUnreadable { path, message } => {
                write!(f, "cannot list archives under {}: {}", path.display(), message)
            }
        }
    }
}

/// A valid plan and where it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundPlan {
    pub plan_id: PlanId,
    pub source: Tier,
    pub artifact: String,
    /// SHA-256 of the artifact text
    pub digest: String,
    pub persisted_to: Option<PathBuf>,
    /// Set when persisting was requested and failed
    pub persist_error: Option<String>,
    /// Command that reproduces this retrieval
    pub reproducer: String,
    /// Every attempt made, the winning one last
    pub trace: Vec<RetrievalAttempt>,
}

/// Untried archive tiers left behind by a bounded search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub base: PathBuf,
    pub remaining_tiers: usize,
}

/// A search that ended without a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFailure {
    pub plan_id: PlanId,
    pub kind: FailureKind,
    pub trace: Vec<RetrievalAttempt>,
    /// Present when a bounded search stopped with tiers left
    pub continuation: Option<Continuation>,
}

impl SearchFailure {
    /// Whether a comprehensive retry could try more tiers
    pub fn can_continue(&self) -> bool {
        self.continuation.is_some()
    }

    /// Turn this failure into a retry token, if tiers remain
    pub fn comprehensive_retry(self) -> Option<ComprehensiveRetry> {
        let continuation = self.continuation?;
        Some(ComprehensiveRetry {
            plan_id: self.plan_id,
            base: continuation.base,
            trace: self.trace,
        })
    }
}

/// Token for continuing a bounded search over every remaining tier
#[derive(Debug, Clone)]
pub struct ComprehensiveRetry {
    pub plan_id: PlanId,
    pub base: PathBuf,
    /// Attempts already made; their tiers are not tried again
    pub trace: Vec<RetrievalAttempt>,
}

/// Terminal outcome of one search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SearchResult {
    Found(FoundPlan),
    NotFound(SearchFailure),
}

impl SearchResult {
    pub fn is_found(&self) -> bool {
        matches!(self, SearchResult::Found(_))
    }

    pub fn final_state(&self) -> SearchState {
        match self {
            SearchResult::Found(_) => SearchState::Found,
            SearchResult::NotFound(_) => SearchState::Exhausted,
        }
    }

    pub fn trace(&self) -> &[RetrievalAttempt] {
        match self {
            SearchResult::Found(found) => &found.trace,
            SearchResult::NotFound(failure) => &failure.trace,
        }
    }
}

/// One valid copy found by [`SearchOrchestrator::survey`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanHit {
    pub tier: Tier,
    pub meaningful_lines: usize,
    pub digest: String,
    pub reproducer: String,
    #[serde(skip)]
    pub artifact: String,
}

/// Every valid copy of a plan across all tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyReport {
    pub plan_id: PlanId,
    /// Default tier first, then archives newest first
    pub hits: Vec<PlanHit>,
    pub attempts: usize,
    /// Set when archives could not be listed
    pub archive_problem: Option<FailureKind>,
}

/// Knobs for the search policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Archive attempts allowed in a bounded search
    pub max_bounded_tiers: usize,
    /// Where a found plan is persisted; `None` keeps it in memory only
    pub output_dir: Option<PathBuf>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            max_bounded_tiers: DEFAULT_MAX_BOUNDED_TIERS,
            output_dir: None,
        }
    }
}

/// Bookkeeping for one search in progress
struct SearchRun {
    plan_id: PlanId,
    state: SearchState,
    trace: Vec<RetrievalAttempt>,
}

impl SearchRun {
    fn new(plan_id: PlanId) -> Self {
        SearchRun {
            plan_id,
            state: SearchState::NotStarted,
            trace: Vec::new(),
        }
    }

    fn resumed(retry: ComprehensiveRetry) -> Self {
        SearchRun {
            plan_id: retry.plan_id,
            state: SearchState::Exhausted,
            trace: retry.trace,
        }
    }

    fn enter(&mut self, next: SearchState) {
        debug_assert!(
            self.state.can_advance(next),
            "illegal search transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Search state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn reject(&mut self, attempt: RetrievalAttempt) {
        let reasons: Vec<String> = attempt
            .verdict
            .reasons()
            .iter()
            .map(|r| r.to_string())
            .collect();
        warn!("Rejected {}: {}", attempt.tier.label(), reasons.join("; "));
        self.trace.push(attempt);
    }

    fn fail(mut self, kind: FailureKind, continuation: Option<Continuation>) -> SearchResult {
        self.enter(SearchState::Exhausted);
        info!(
            "Plan {} not resolved after {} attempt(s): {}",
            self.plan_id,
            self.trace.len(),
            kind
        );
        SearchResult::NotFound(SearchFailure {
            plan_id: self.plan_id,
            kind,
            trace: self.trace,
            continuation,
        })
    }
}

/// Drives tiered searches and owns the archive tier cache
pub struct SearchOrchestrator<R> {
    extractor: PlanExtractor<R>,
    cache: TierCache,
    options: SearchOptions,
}

impl<R: PlanRetriever> SearchOrchestrator<R> {
    pub fn new(extractor: PlanExtractor<R>, options: SearchOptions) -> Self {
        SearchOrchestrator {
            extractor,
            cache: TierCache::new(),
            options,
        }
    }

    /// Build from config around an already located retriever
    pub fn from_config(retriever: R, config: &ResolverConfig) -> Self {
        let extractor = PlanExtractor::new(
            retriever,
            ContentValidator::new(&config.validator),
            config.artifacts.scratch_dir(),
        );
        let options = SearchOptions {
            max_bounded_tiers: config.archive.max_bounded_tiers,
            output_dir: config.artifacts.output_dir.clone(),
        };
        Self::new(extractor, options)
    }

    pub fn extractor(&self) -> &PlanExtractor<R> {
        &self.extractor
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Forget discovered tiers; the next archive search re-discovers
    pub fn invalidate_tiers(&mut self) {
        self.cache.invalidate();
    }

    /// Archive tiers under `base`, newest first (cached)
    pub fn archive_tiers(&mut self, base: &Path) -> Result<Vec<ArchiveTier>> {
        Ok(self.cache.tiers(base)?.to_vec())
    }

    /// Search for `plan_id` per `mode`.
    ///
    /// Only `ToolNotFound` (or an unusable scratch directory) is an error;
    /// every per-tier problem ends up in the result's trace.
    pub async fn resolve(
        &mut self,
        plan_id: PlanId,
        base: &Path,
        mode: SearchMode,
    ) -> Result<SearchResult> {
        let span = info_span!(
            "resolve",
            plan_id = %plan_id,
            mode = %mode,
            token = %self.extractor.token()
        );
        self.resolve_inner(plan_id, base, mode).instrument(span).await
    }

    async fn resolve_inner(
        &mut self,
        plan_id: PlanId,
        base: &Path,
        mode: SearchMode,
    ) -> Result<SearchResult> {
        let mut run = SearchRun::new(plan_id);

        run.enter(SearchState::TryingDefault);
        info!("Looking up plan {} in the default plan store", plan_id);
        let extraction = self.extractor.extract(plan_id, &Tier::Default).await?;
        if extraction.attempt.is_valid() {
            return Ok(self.finish_found(run, extraction));
        }
        run.reject(extraction.attempt);

        let limit = match mode {
            SearchMode::DefaultOnly => return Ok(run.fail(FailureKind::Exhausted, None)),
            SearchMode::BoundedArchiveSearch => Some(self.options.max_bounded_tiers),
            SearchMode::ComprehensiveSearch => None,
        };

        let tiers = match self.cache.tiers(base) {
            Ok(tiers) => tiers.to_vec(),
            Err(e) => return Ok(run.fail(discovery_failure(base, e)?, None)),
        };
        if tiers.is_empty() {
            return Ok(run.fail(
                FailureKind::NoArchivesFound {
                    path: base.to_path_buf(),
                },
                None,
            ));
        }

        self.search_archives(run, base, tiers, limit).await
    }

    /// Continue a bounded search over every tier it did not reach.
    ///
    /// Tiers already in the retry's trace, including the default tier, are
    /// not attempted again.
    pub async fn continue_comprehensive(
        &mut self,
        retry: ComprehensiveRetry,
    ) -> Result<SearchResult> {
        let span = info_span!(
            "continue_comprehensive",
            plan_id = %retry.plan_id,
            token = %self.extractor.token()
        );
        self.continue_inner(retry).instrument(span).await
    }

    async fn continue_inner(&mut self, retry: ComprehensiveRetry) -> Result<SearchResult> {
        let base = retry.base.clone();
        let run = SearchRun::resumed(retry);

        let tiers = match self.cache.tiers(&base) {
            Ok(tiers) => tiers.to_vec(),
            Err(e) => {
                let kind = discovery_failure(&base, e)?;
                let mut run = run;
                run.enter(SearchState::TryingArchives);
                return Ok(run.fail(kind, None));
            }
        };

        let untried: Vec<ArchiveTier> = tiers
            .into_iter()
            .filter(|t| {
                !run.trace
                    .iter()
                    .any(|a| a.tier.archive().map(|x| x.key) == Some(t.key))
            })
            .collect();
        info!(
            "Continuing plan {} over {} remaining archive tier(s)",
            run.plan_id,
            untried.len()
        );

        self.search_archives(run, &base, untried, None).await
    }

    async fn search_archives(
        &mut self,
        mut run: SearchRun,
        base: &Path,
        tiers: Vec<ArchiveTier>,
        limit: Option<usize>,
    ) -> Result<SearchResult> {
        run.enter(SearchState::TryingArchives);
        let end = limit.map_or(tiers.len(), |l| l.min(tiers.len()));

        for (i, archive) in tiers[..end].iter().enumerate() {
            let tier = Tier::Archive(archive.clone());
            debug!("Trying {} ({}/{})", tier.label(), i + 1, end);
            let extraction = self.extractor.extract(run.plan_id, &tier).await?;
            if extraction.attempt.is_valid() {
                return Ok(self.finish_found(run, extraction));
            }
            run.reject(extraction.attempt);
        }

        let continuation = (end < tiers.len()).then(|| Continuation {
            base: base.to_path_buf(),
            remaining_tiers: tiers.len() - end,
        });
        if let Some(c) = &continuation {
            info!(
                "Bounded search stopped after {} archive tier(s); {} left",
                end, c.remaining_tiers
            );
        }
        Ok(run.fail(FailureKind::Exhausted, continuation))
    }

    /// Single attempt against a caller-supplied archive directory
    pub async fn resolve_manual(&mut self, plan_id: PlanId, path: &Path) -> Result<SearchResult> {
        let mut run = SearchRun::new(plan_id);
        run.enter(SearchState::TryingArchives);

        if !path.is_dir() {
            return Ok(run.fail(
                FailureKind::BaseNotFound {
                    path: path.to_path_buf(),
                },
                None,
            ));
        }

        let tier = Tier::Archive(ArchiveTier::manual(path));
        info!("Looking up plan {} in manual archive {:?}", plan_id, path);
        let extraction = self.extractor.extract(plan_id, &tier).await?;
        if extraction.attempt.is_valid() {
            return Ok(self.finish_found(run, extraction));
        }
        run.reject(extraction.attempt);
        Ok(run.fail(FailureKind::Exhausted, None))
    }

    /// Try every tier and collect each valid copy. Persists nothing.
    pub async fn survey(&mut self, plan_id: PlanId, base: &Path) -> Result<SurveyReport> {
        let mut tiers = vec![Tier::Default];
        let archive_problem = match self.cache.tiers(base) {
            Ok(archives) if archives.is_empty() => Some(FailureKind::NoArchivesFound {
                path: base.to_path_buf(),
            }),
            Ok(archives) => {
                tiers.extend(archives.iter().cloned().map(Tier::Archive));
                None
            }
            Err(e) => Some(discovery_failure(base, e)?),
        };

        let mut hits = Vec::new();
        for tier in &tiers {
            let extraction = self.extractor.extract(plan_id, tier).await?;
            let attempt = extraction.attempt;
            if let Verdict::Valid { meaningful_lines } = attempt.verdict {
                hits.push(PlanHit {
                    reproducer: self.extractor.reproducer(plan_id, tier),
                    digest: artifact_digest(&attempt.text),
                    tier: attempt.tier,
                    meaningful_lines,
                    artifact: attempt.text,
                });
            }
        }

        info!(
            "Survey of plan {} found {} valid cop(ies) in {} tier(s)",
            plan_id,
            hits.len(),
            tiers.len()
        );
        Ok(SurveyReport {
            plan_id,
            hits,
            attempts: tiers.len(),
            archive_problem,
        })
    }

    fn finish_found(&self, mut run: SearchRun, mut extraction: Extraction) -> SearchResult {
        let plan_id = run.plan_id;
        let source = extraction.attempt.tier.clone();

        let (persisted_to, persist_error) =
            match (self.options.output_dir.as_deref(), extraction.take_capture()) {
                (Some(dir), Some(capture)) => {
                    match capture.persist_into(dir, &plan_id.to_string()) {
                        Ok(path) => (Some(path), None),
                        Err(e) => {
                            warn!("Could not persist plan {}: {}", plan_id, e);
                            (None, Some(e.to_string()))
                        }
                    }
                }
                _ => (None, None),
            };

        let artifact = extraction.attempt.text.clone();
        run.trace.push(extraction.attempt);
        run.enter(SearchState::Found);

        info!(
            "Plan {} found in {} after {} attempt(s)",
            plan_id,
            source,
            run.trace.len()
        );
        SearchResult::Found(FoundPlan {
            plan_id,
            reproducer: self.extractor.reproducer(plan_id, &source),
            digest: artifact_digest(&artifact),
            source,
            artifact,
            persisted_to,
            persist_error,
            trace: run.trace,
        })
    }
}

/// Turn a discovery error into a search failure.
///
/// Only `ToolNotFound` stays an error; nothing else ends a search early.
fn discovery_failure(base: &Path, err: ResolveError) -> Result<FailureKind> {
    match err {
        ResolveError::ToolNotFound { .. } => Err(err),
        ResolveError::BaseNotFound(path) => {
            warn!("Archive base {:?} not found", path);
            Ok(FailureKind::BaseNotFound { path })
        }
        other => {
            warn!("Cannot list archives under {:?}: {}", base, other);
            Ok(FailureKind::ArchivesUnreadable {
                path: base.to_path_buf(),
                message: other.to_string(),
            })
        }
    }
}

/// SHA-256 hex digest of artifact text
pub fn artifact_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
