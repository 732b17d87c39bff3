//! plan-resolver - saved query plan lookup CLI
//!
//! The `plan-resolver` command finds the stored execution plan for a plan
//! id, searching the live plan store and then the archive tiers.
//!
//! ## Commands
//!
//! - `resolve`: Look up one plan and persist it
//! - `archives`: List archive tiers newest first
//! - `classify`: Run the plan validator over a saved file
//! - `survey`: Find every tier holding a valid copy of a plan
//! - `interactive`: Prompt-driven lookups sharing one tier cache

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use plan_resolver::{
    ArchiveConfig, ContentValidator, FailureKind, PlanId, PlanRetriever, ResolverConfig,
    RetrievalAttempt, SearchMode, SearchOrchestrator, SearchResult, SurveyReport, Verdict,
};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "plan-resolver")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Find saved query execution plans in the plan store and its archives", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML config file
    #[arg(long, global = true, env = "PLAN_RESOLVER_CONFIG")]
    config: Option<PathBuf>,

    /// Result output format
    #[arg(long, global = true, value_enum, default_value_t = ReportFormat::Text)]
    report: ReportFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a plan by id
    Resolve {
        /// Plan identifier (positive integer)
        #[arg(value_parser = parse_plan_id)]
        plan_id: PlanId,

        /// How far past the default plan store to search
        #[arg(short, long, value_enum, default_value_t = ModeArg::Bounded)]
        mode: ModeArg,

        #[command(flatten)]
        overrides: Overrides,

        /// Search only this archive directory
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Continue with a comprehensive search without asking
        #[arg(short, long)]
        yes: bool,

        /// Never offer a comprehensive retry
        #[arg(long, conflicts_with = "yes")]
        no_retry: bool,

        /// Print the plan text after the report
        #[arg(long)]
        show_plan: bool,
    },

    /// List archive tiers newest first
    Archives {
        /// Archive base directory
        #[arg(long)]
        base: Option<PathBuf>,
    },

    /// Check whether a saved file looks like a plan
    Classify {
        /// File holding captured tool output
        file: PathBuf,
    },

    /// List every tier holding a valid copy of a plan
    Survey {
        #[arg(value_parser = parse_plan_id)]
        plan_id: PlanId,

        /// Archive base directory
        #[arg(long)]
        base: Option<PathBuf>,

        /// Path to the plan retrieval tool
        #[arg(long)]
        tool: Option<PathBuf>,
    },

    /// Prompt for plan ids until a blank line
    Interactive {
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Flags layered over config file and environment
#[derive(clap::Args, Debug, Default, Clone)]
struct Overrides {
    /// Archive base directory
    #[arg(long)]
    base: Option<PathBuf>,

    /// Directory found plans are written to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Don't write the found plan anywhere
    #[arg(long, conflicts_with = "output_dir")]
    no_persist: bool,

    /// Archive tiers tried by a bounded search
    #[arg(long)]
    max_tiers: Option<usize>,

    /// Per-attempt timeout in seconds (0 disables)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Path to the plan retrieval tool
    #[arg(long)]
    tool: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut ResolverConfig) {
        if let Some(base) = &self.base {
            // An explicit base is used as given.
            config.archive.base = base.clone();
            config.archive.alternates.clear();
        }
        if let Some(dir) = &self.output_dir {
            config.artifacts.output_dir = Some(dir.clone());
        }
        if self.no_persist {
            config.artifacts.output_dir = None;
        }
        if let Some(max) = self.max_tiers {
            config.archive.max_bounded_tiers = max;
        }
        if let Some(secs) = self.timeout_secs {
            config.tool.timeout_secs = secs;
        }
        if let Some(tool) = &self.tool {
            config.tool.fallback = Some(tool.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Default,
    Bounded,
    Comprehensive,
}

impl From<ModeArg> for SearchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Default => SearchMode::DefaultOnly,
            ModeArg::Bounded => SearchMode::BoundedArchiveSearch,
            ModeArg::Comprehensive => SearchMode::ComprehensiveSearch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

/// What to do when a bounded search leaves tiers unsearched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryPolicy {
    Always,
    Never,
    Ask,
}

fn parse_plan_id(value: &str) -> std::result::Result<PlanId, String> {
    value.parse::<PlanId>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    plan_resolver::init_tracing(cli.json, level);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Resolve {
            plan_id,
            mode,
            overrides,
            archive,
            yes,
            no_retry,
            show_plan,
        } => {
            overrides.apply(&mut config);
            let retry = if yes {
                RetryPolicy::Always
            } else if no_retry {
                RetryPolicy::Never
            } else {
                RetryPolicy::Ask
            };
            cmd_resolve(
                &config,
                plan_id,
                mode.into(),
                archive.as_deref(),
                retry,
                cli.report,
                show_plan,
            )
            .await
        }
        Commands::Archives { base } => {
            if let Some(base) = base {
                config.archive.base = base;
                config.archive.alternates.clear();
            }
            cmd_archives(&config.archive, cli.report)
        }
        Commands::Classify { file } => cmd_classify(&config, &file, cli.report),
        Commands::Survey {
            plan_id,
            base,
            tool,
        } => {
            let overrides = Overrides {
                base,
                tool,
                ..Overrides::default()
            };
            overrides.apply(&mut config);
            cmd_survey(&config, plan_id, cli.report).await
        }
        Commands::Interactive { overrides } => {
            overrides.apply(&mut config);
            cmd_interactive(&config, cli.report).await
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Defaults, then the config file, then `PLAN_RESOLVER_*` variables
fn load_config(path: Option<&Path>) -> Result<ResolverConfig> {
    let mut config = match path {
        Some(path) => ResolverConfig::from_file(path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?,
        None => ResolverConfig::default(),
    };
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("Invalid PLAN_RESOLVER_* environment override")?;
    Ok(config)
}

/// The configured base if it exists, else the first existing alternate.
///
/// Falls back to the configured base so the search reports it as missing.
fn select_base(archive: &ArchiveConfig) -> PathBuf {
    if archive.base.is_dir() {
        return archive.base.clone();
    }
    match archive.alternates.iter().find(|alt| alt.is_dir()) {
        Some(alt) => {
            info!(
                "Archive base {:?} not found, using alternate {:?}",
                archive.base, alt
            );
            alt.clone()
        }
        None => archive.base.clone(),
    }
}

fn build_orchestrator(
    config: &ResolverConfig,
) -> Result<SearchOrchestrator<plan_resolver::PlanTool>> {
    config.validate().context("Invalid configuration")?;
    plan_resolver::orchestrator_from_config(config)
        .context("Cannot run lookups without the plan retrieval tool")
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Line-oriented question and answer over any reader/writer pair
struct Prompter {
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}

impl Prompter {
    fn new(input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        Prompter { input, output }
    }

    fn stdio() -> Self {
        Self::new(
            Box::new(std::io::BufReader::new(std::io::stdin())),
            Box::new(std::io::stderr()),
        )
    }

    /// Trimmed answer, or `None` at end of input
    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        write!(self.output, "{} ", question)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.ask(&format!("{} [y/N]", question))?;
        Ok(matches!(
            answer.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("y") | Some("yes")
        ))
    }
}

// ---------------------------------------------------------------------------
// Lookup flow
// ---------------------------------------------------------------------------

struct LookupRequest {
    plan_id: PlanId,
    base: PathBuf,
    manual: Option<PathBuf>,
    mode: SearchMode,
    retry: RetryPolicy,
}

/// Run one lookup, offering a manual archive path when the base is missing
/// and a comprehensive retry when a bounded search stopped early.
async fn lookup<R: PlanRetriever>(
    orchestrator: &mut SearchOrchestrator<R>,
    request: &LookupRequest,
    mut prompter: Option<&mut Prompter>,
) -> Result<SearchResult> {
    let plan_id = request.plan_id;

    let mut result = match &request.manual {
        Some(path) => orchestrator.resolve_manual(plan_id, path).await?,
        None => {
            orchestrator
                .resolve(plan_id, &request.base, request.mode)
                .await?
        }
    };

    if let SearchResult::NotFound(failure) = &result {
        let archives_unusable = matches!(
            failure.kind,
            FailureKind::BaseNotFound { .. } | FailureKind::ArchivesUnreadable { .. }
        );
        if let (true, Some(p), None) =
            (archives_unusable, prompter.as_deref_mut(), &request.manual)
        {
            let question = format!(
                "{}. Archive directory to search (blank to skip):",
                failure.kind
            );
            if let Some(manual) = p.ask(&question)?.filter(|a| !a.is_empty()) {
                let earlier = failure.trace.clone();
                let manual_result = orchestrator
                    .resolve_manual(plan_id, Path::new(&manual))
                    .await?;
                result = prepend_trace(earlier, manual_result);
            }
        }
    }

    let failure = match result {
        SearchResult::NotFound(failure) if failure.can_continue() => failure,
        other => return Ok(other),
    };

    let remaining = failure
        .continuation
        .as_ref()
        .map_or(0, |c| c.remaining_tiers);
    let go = match (request.retry, prompter) {
        (RetryPolicy::Always, _) => true,
        (RetryPolicy::Never, _) | (RetryPolicy::Ask, None) => false,
        (RetryPolicy::Ask, Some(p)) => p.confirm(&format!(
            "Plan {} not in the newest tiers. Search the remaining {} archive tier(s)?",
            plan_id, remaining
        ))?,
    };
    if !go {
        return Ok(SearchResult::NotFound(failure));
    }

    match failure.comprehensive_retry() {
        Some(retry) => Ok(orchestrator.continue_comprehensive(retry).await?),
        None => anyhow::bail!("Search for plan {} cannot be continued", plan_id),
    }
}

fn prepend_trace(mut earlier: Vec<RetrievalAttempt>, result: SearchResult) -> SearchResult {
    match result {
        SearchResult::Found(mut found) => {
            earlier.append(&mut found.trace);
            found.trace = earlier;
            SearchResult::Found(found)
        }
        SearchResult::NotFound(mut failure) => {
            earlier.append(&mut failure.trace);
            failure.trace = earlier;
            SearchResult::NotFound(failure)
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_resolve(
    config: &ResolverConfig,
    plan_id: PlanId,
    mode: SearchMode,
    archive: Option<&Path>,
    retry: RetryPolicy,
    report: ReportFormat,
    show_plan: bool,
) -> Result<()> {
    let mut orchestrator = build_orchestrator(config)?;

    let mut stdio = std::io::stdin().is_terminal().then(Prompter::stdio);

    let request = LookupRequest {
        plan_id,
        base: select_base(&config.archive),
        manual: archive.map(Path::to_path_buf),
        mode,
        retry,
    };
    let result = lookup(&mut orchestrator, &request, stdio.as_mut()).await?;

    let prompted = stdio.is_some() && retry == RetryPolicy::Ask;
    print_result(&result, report, show_plan, prompted)?;
    if result.is_found() {
        Ok(())
    } else {
        anyhow::bail!("Plan {} not found", plan_id)
    }
}

fn cmd_archives(archive: &ArchiveConfig, report: ReportFormat) -> Result<()> {
    let base = select_base(archive);
    let tiers = plan_resolver::discover(&base)
        .with_context(|| format!("Failed to list archives under {:?}", base))?;

    match report {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&tiers)?),
        ReportFormat::Text => {
            println!("Archive base: {}", base.display());
            if tiers.is_empty() {
                println!("  (no archive tiers)");
            }
            for tier in &tiers {
                println!("  {:>12}  {}", tier.key, tier.path.display());
            }
        }
    }
    Ok(())
}

fn cmd_classify(config: &ResolverConfig, file: &Path, report: ReportFormat) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    let text = String::from_utf8_lossy(&bytes);

    let validator = ContentValidator::new(&config.validator);
    let verdict = validator.classify(&text);

    match report {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&verdict)?),
        ReportFormat::Text => println!("{}", render_verdict(&verdict)),
    }
    if verdict.is_valid() {
        Ok(())
    } else {
        anyhow::bail!("{:?} does not hold a valid plan", file)
    }
}

async fn cmd_survey(config: &ResolverConfig, plan_id: PlanId, report: ReportFormat) -> Result<()> {
    let mut orchestrator = build_orchestrator(config)?;
    let base = select_base(&config.archive);
    let survey = orchestrator.survey(plan_id, &base).await?;

    match report {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&survey)?),
        ReportFormat::Text => println!("{}", render_survey_text(&survey)),
    }
    Ok(())
}

async fn cmd_interactive(config: &ResolverConfig, report: ReportFormat) -> Result<()> {
    let mut orchestrator = build_orchestrator(config)?;
    let mut prompter = Prompter::stdio();
    interactive_loop(&mut orchestrator, config, &mut prompter, report).await
}

async fn interactive_loop<R: PlanRetriever>(
    orchestrator: &mut SearchOrchestrator<R>,
    config: &ResolverConfig,
    prompter: &mut Prompter,
    report: ReportFormat,
) -> Result<()> {
    loop {
        let Some(answer) = prompter.ask("Plan id (blank to quit):")? else {
            return Ok(());
        };
        if answer.is_empty() {
            return Ok(());
        }
        let plan_id = match parse_plan_id(&answer) {
            Ok(id) => id,
            Err(e) => {
                warn!("{}", e);
                eprintln!("{}", e);
                continue;
            }
        };

        let mode = prompter
            .ask("Search [d]efault store, [b]ounded archives or [c]omprehensive? (b):")?
            .unwrap_or_default();
        let mode = match mode.to_ascii_lowercase().as_str() {
            "d" | "default" => SearchMode::DefaultOnly,
            "c" | "comprehensive" => SearchMode::ComprehensiveSearch,
            _ => SearchMode::BoundedArchiveSearch,
        };

        let request = LookupRequest {
            plan_id,
            base: select_base(&config.archive),
            manual: None,
            mode,
            retry: RetryPolicy::Ask,
        };
        let result = lookup(orchestrator, &request, Some(&mut *prompter)).await?;
        print_result(&result, report, false, true)?;
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn print_result(
    result: &SearchResult,
    report: ReportFormat,
    show_plan: bool,
    prompted: bool,
) -> Result<()> {
    match report {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        ReportFormat::Text => println!("{}", render_result_text(result, prompted)),
    }
    if let (true, SearchResult::Found(found)) = (show_plan, result) {
        println!();
        print!("{}", found.artifact);
    }
    Ok(())
}

fn render_verdict(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Valid { meaningful_lines } => {
            format!("valid ({} meaningful lines)", meaningful_lines)
        }
        Verdict::Invalid { reasons } => {
            let reasons: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
            format!("invalid: {}", reasons.join("; "))
        }
    }
}

fn render_trace(trace: &[RetrievalAttempt]) -> String {
    let mut out = String::from("Attempts:\n");
    for attempt in trace {
        let status = if attempt.is_valid() { "✓" } else { "✗" };
        out.push_str(&format!(
            "  {} {:<16} {} ({}ms)\n",
            status,
            attempt.tier.label(),
            render_verdict(&attempt.verdict),
            attempt.duration_ms
        ));
    }
    out
}

/// Text report. `prompted` runs already offered the comprehensive retry,
/// so the leftover-tier note reads as an option rather than a flag to pass.
fn render_result_text(result: &SearchResult, prompted: bool) -> String {
    let mut out = String::new();
    match result {
        SearchResult::Found(found) => {
            out.push_str(&format!("✓ Plan {} found in {}\n", found.plan_id, found.source));
            match (&found.persisted_to, &found.persist_error) {
                (Some(path), _) => out.push_str(&format!("  Saved to:  {}\n", path.display())),
                (None, Some(err)) => out.push_str(&format!("  Not saved: {}\n", err)),
                (None, None) => {}
            }
            out.push_str(&format!("  Digest:    {}\n", found.digest));
            out.push_str(&format!("  Reproduce: {}\n", found.reproducer));
            out.push('\n');
            out.push_str(&render_trace(&found.trace));
        }
        SearchResult::NotFound(failure) => {
            out.push_str(&format!(
                "✗ Plan {} not found: {}\n\n",
                failure.plan_id, failure.kind
            ));
            out.push_str(&render_trace(&failure.trace));
            if let Some(c) = &failure.continuation {
                let next = if prompted {
                    "a comprehensive search can still cover them later"
                } else {
                    "rerun with --mode comprehensive"
                };
                out.push_str(&format!(
                    "\n{} archive tier(s) under {} not searched; {}\n",
                    c.remaining_tiers,
                    c.base.display(),
                    next
                ));
            }
        }
    }
    out.trim_end().to_string()
}

fn render_survey_text(survey: &SurveyReport) -> String {
    let mut out = format!(
        "Plan {}: {} valid cop(ies) in {} tier(s)\n",
        survey.plan_id,
        survey.hits.len(),
        survey.attempts
    );
    for hit in &survey.hits {
        out.push_str(&format!(
            "  {:<16} {:>5} lines  {}  {}\n",
            hit.tier.label(),
            hit.meaningful_lines,
            &hit.digest[..hit.digest.len().min(12)],
            hit.reproducer
        ));
    }
    if let Some(problem) = &survey.archive_problem {
        out.push_str(&format!("  archives skipped: {}\n", problem));
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plan_resolver::fakes::{not_found_notice, sample_plan, ScriptedRetriever};
    use plan_resolver::{ContentValidator, PlanExtractor, SearchOptions};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn scripted(
        retriever: ScriptedRetriever,
        scratch: &Path,
        max_bounded_tiers: usize,
    ) -> SearchOrchestrator<ScriptedRetriever> {
        let extractor = PlanExtractor::new(retriever, ContentValidator::default(), scratch);
        SearchOrchestrator::new(
            extractor,
            SearchOptions {
                max_bounded_tiers,
                output_dir: None,
            },
        )
    }

    fn answers(lines: &str) -> Prompter {
        Prompter::new(
            Box::new(Cursor::new(lines.as_bytes().to_vec())),
            Box::new(std::io::sink()),
        )
    }

    fn request(plan_id: u64, base: &Path, retry: RetryPolicy) -> LookupRequest {
        LookupRequest {
            plan_id: PlanId::new(plan_id).unwrap(),
            base: base.to_path_buf(),
            manual: None,
            mode: SearchMode::BoundedArchiveSearch,
            retry,
        }
    }

    fn archives(keys: std::ops::RangeInclusive<u64>) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        for key in keys {
            std::fs::create_dir(dir.path().join(key.to_string())).unwrap();
        }
        dir
    }

    #[test]
    fn test_parse_resolve_flags() {
        let cli = Cli::try_parse_from([
            "plan-resolver",
            "resolve",
            "4521",
            "--mode",
            "comprehensive",
            "--base",
            "/tmp/planshist",
            "--max-tiers",
            "3",
            "--yes",
            "--report",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.report, ReportFormat::Json);
        match cli.command {
            Commands::Resolve {
                plan_id,
                mode,
                overrides,
                yes,
                ..
            } => {
                assert_eq!(plan_id.get(), 4521);
                assert_eq!(SearchMode::from(mode), SearchMode::ComprehensiveSearch);
                assert_eq!(overrides.base, Some(PathBuf::from("/tmp/planshist")));
                assert_eq!(overrides.max_tiers, Some(3));
                assert!(yes);
            }
            _ => panic!("expected resolve"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_plan_ids() {
        for bad in ["0", "-3", "abc", ""] {
            assert!(
                Cli::try_parse_from(["plan-resolver", "resolve", bad]).is_err(),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_conflicting_flags() {
        assert!(
            Cli::try_parse_from(["plan-resolver", "resolve", "1", "--yes", "--no-retry"]).is_err()
        );
        assert!(Cli::try_parse_from([
            "plan-resolver",
            "resolve",
            "1",
            "--output-dir",
            "/tmp/out",
            "--no-persist"
        ])
        .is_err());
    }

    #[test]
    fn test_overrides_layer_over_config() {
        let mut config = ResolverConfig::default();
        config.artifacts.output_dir = Some(PathBuf::from("/var/plans"));

        let overrides = Overrides {
            base: Some(PathBuf::from("/srv/planshist")),
            no_persist: true,
            timeout_secs: Some(0),
            tool: Some(PathBuf::from("/opt/nz_plan")),
            ..Overrides::default()
        };
        overrides.apply(&mut config);

        assert_eq!(config.archive.base, PathBuf::from("/srv/planshist"));
        assert!(config.archive.alternates.is_empty());
        assert!(config.artifacts.output_dir.is_none());
        assert!(config.tool.timeout().is_none());
        assert_eq!(config.tool.fallback, Some(PathBuf::from("/opt/nz_plan")));
    }

    #[test]
    fn test_select_base_substitutes_alternate() {
        let dir = tempdir().unwrap();
        let alternate = dir.path().join("data");
        std::fs::create_dir(&alternate).unwrap();

        let archive = ArchiveConfig {
            base: dir.path().join("kit"),
            alternates: vec![dir.path().join("missing"), alternate.clone()],
            max_bounded_tiers: 10,
        };
        assert_eq!(select_base(&archive), alternate);

        let nothing = ArchiveConfig {
            alternates: vec![],
            ..archive.clone()
        };
        assert_eq!(select_base(&nothing), dir.path().join("kit"));
    }

    #[test]
    fn test_confirm_answers() {
        assert!(answers("y\n").confirm("go?").unwrap());
        assert!(answers("YES\n").confirm("go?").unwrap());
        assert!(!answers("n\n").confirm("go?").unwrap());
        assert!(!answers("").confirm("go?").unwrap());
    }

    #[tokio::test]
    async fn test_lookup_retries_comprehensively_when_allowed() {
        let base = archives(1..=5);
        let scratch = tempdir().unwrap();
        let retriever = ScriptedRetriever::new()
            .default_text(not_found_notice(42))
            .archive_text(1, sample_plan(6));
        let mut orch = scripted(retriever, scratch.path(), 2);

        let result = lookup(&mut orch, &request(42, base.path(), RetryPolicy::Always), None)
            .await
            .unwrap();

        assert!(result.is_found());
        assert_eq!(result.trace().len(), 6);
    }

    #[tokio::test]
    async fn test_lookup_without_prompter_does_not_retry() {
        let base = archives(1..=5);
        let scratch = tempdir().unwrap();
        let retriever = ScriptedRetriever::new()
            .default_text(not_found_notice(42))
            .archive_text(1, sample_plan(6));
        let mut orch = scripted(retriever, scratch.path(), 2);

        let result = lookup(&mut orch, &request(42, base.path(), RetryPolicy::Ask), None)
            .await
            .unwrap();

        assert!(!result.is_found());
        assert_eq!(orch.extractor().retriever().archive_calls(), vec![5, 4]);
    }

    #[tokio::test]
    async fn test_lookup_asks_before_retry() {
        let base = archives(1..=5);
        let scratch = tempdir().unwrap();
        let retriever = ScriptedRetriever::new()
            .default_text(not_found_notice(42))
            .archive_text(1, sample_plan(6));
        let mut orch = scripted(retriever, scratch.path(), 2);

        let mut prompter = answers("y\n");
        let result = lookup(
            &mut orch,
            &request(42, base.path(), RetryPolicy::Ask),
            Some(&mut prompter),
        )
        .await
        .unwrap();

        assert!(result.is_found());
        assert_eq!(
            orch.extractor().retriever().archive_calls(),
            vec![5, 4, 3, 2, 1]
        );
    }

    #[tokio::test]
    async fn test_lookup_offers_manual_path_for_missing_base() {
        let dir = tempdir().unwrap();
        let manual = dir.path().join("copied");
        std::fs::create_dir(&manual).unwrap();
        let scratch = tempdir().unwrap();
        let retriever = ScriptedRetriever::new()
            .default_text(not_found_notice(7))
            .unscripted(plan_resolver::fakes::ScriptedResponse::ok(sample_plan(8)));
        let mut orch = scripted(retriever, scratch.path(), 10);

        let mut prompter = answers(&format!("{}\n", manual.display()));
        let result = lookup(
            &mut orch,
            &request(7, &dir.path().join("planshist"), RetryPolicy::Ask),
            Some(&mut prompter),
        )
        .await
        .unwrap();

        match result {
            SearchResult::Found(found) => {
                assert_eq!(found.trace.len(), 2);
                assert!(found.trace[0].tier.is_default());
                assert_eq!(found.source.archive().map(|a| a.path.clone()), Some(manual));
            }
            SearchResult::NotFound(f) => panic!("expected plan, got {:?}", f.kind),
        }
    }

    #[tokio::test]
    async fn test_render_result_text() {
        let base = archives(1..=3);
        let scratch = tempdir().unwrap();
        let retriever = ScriptedRetriever::new().default_text(not_found_notice(9));
        let mut orch = scripted(retriever, scratch.path(), 2);

        let result = lookup(&mut orch, &request(9, base.path(), RetryPolicy::Never), None)
            .await
            .unwrap();
        let text = render_result_text(&result, false);

        assert!(text.starts_with("✗ Plan 9 not found"));
        assert!(text.contains("✗ default"));
        assert!(text.contains("archive:3"));
        assert!(text.contains("1 archive tier(s)"));
        assert!(text.contains("--mode comprehensive"));
    }

    #[tokio::test]
    async fn test_declined_retry_report_has_no_flag_instruction() {
        let base = archives(1..=3);
        let scratch = tempdir().unwrap();
        let retriever = ScriptedRetriever::new().default_text(not_found_notice(9));
        let mut orch = scripted(retriever, scratch.path(), 2);

        let mut prompter = answers("n\n");
        let result = lookup(
            &mut orch,
            &request(9, base.path(), RetryPolicy::Ask),
            Some(&mut prompter),
        )
        .await
        .unwrap();
        let text = render_result_text(&result, true);

        assert!(!result.is_found());
        assert!(text.contains("1 archive tier(s)"));
        assert!(text.contains("a comprehensive search can still cover them later"));
        assert!(!text.contains("--mode"));
    }

    #[tokio::test]
    async fn test_interactive_loop_reuses_orchestrator() {
        let base = archives(1..=2);
        let scratch = tempdir().unwrap();
        let retriever = ScriptedRetriever::new()
            .default_text(not_found_notice(3))
            .archive_text(1, sample_plan(5));
        let mut orch = scripted(retriever, scratch.path(), 10);

        let mut config = ResolverConfig::default();
        config.archive.base = base.path().to_path_buf();
        config.archive.alternates.clear();

        // "0" is rejected and re-asked; the blank line quits.
        let mut prompter = answers("3\nb\n0\n3\nd\n\n");
        interactive_loop(&mut orch, &config, &mut prompter, ReportFormat::Text)
            .await
            .unwrap();

        assert_eq!(orch.extractor().retriever().archive_calls(), vec![2, 1]);
        assert_eq!(orch.extractor().retriever().calls().len(), 4);
    }
}
