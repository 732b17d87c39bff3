//! Runs `PlanTool` against small shell scripts standing in for the
//! retrieval executable.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use plan_resolver::{
    orchestrator_from_config, ArchiveTier, ContentValidator, PlanExtractor, PlanId, PlanTool,
    ProcessOutcome, RejectReason, ResolveError, ResolverConfig, SearchMode, SearchResult, Tier,
};
use tempfile::tempdir;

const PLAN_BODY: &str = r#"echo "NOTICE: plan retrieved"
i=1
while [ $i -le 6 ]; do
  echo "Node $i. [SPU Sequential Scan table \"LINEITEM\"]"
  i=$((i+1))
done
"#;

fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn extractor(tool: PlanTool, scratch: &Path) -> PlanExtractor<PlanTool> {
    PlanExtractor::new(tool, ContentValidator::default(), scratch)
}

fn plan_id(n: u64) -> PlanId {
    PlanId::new(n).unwrap()
}

#[tokio::test]
async fn test_stdout_and_stderr_share_one_capture() {
    let bin = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let body = format!("{PLAN_BODY}echo \"WARNING: plan is stale\" >&2\n");
    let tool = PlanTool::new(write_tool(bin.path(), "nz_plan", &body), None);

    let extraction = extractor(tool, scratch.path())
        .extract(plan_id(4521), &Tier::Default)
        .await
        .unwrap();

    let attempt = &extraction.attempt;
    assert!(attempt.is_valid(), "{:?}", attempt.verdict);
    assert!(attempt.text.contains("Node 6."));
    assert!(attempt.text.contains("WARNING: plan is stale"));
    assert_eq!(
        attempt.process,
        ProcessOutcome::Exited {
            success: true,
            code: Some(0)
        }
    );
}

#[tokio::test]
async fn test_archive_tier_passes_tar_arguments() {
    let bin = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let tool = PlanTool::new(write_tool(bin.path(), "nz_plan", "echo \"args: $*\"\n"), None);
    let archive = ArchiveTier::new(200, "/nz/kit/log/planshist/200");

    let extraction = extractor(tool, scratch.path())
        .extract(plan_id(12), &Tier::Archive(archive))
        .await
        .unwrap();

    assert!(extraction
        .attempt
        .text
        .contains("args: -tar 12 -tardir /nz/kit/log/planshist/200"));
    assert!(!extraction.attempt.is_valid());
}

#[tokio::test]
async fn test_hung_tool_is_killed_at_timeout() {
    let bin = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let body = "echo \"NOTICE: starting\"\nexec sleep 30\n";
    let tool = PlanTool::new(
        write_tool(bin.path(), "nz_plan", body),
        Some(Duration::from_secs(1)),
    );

    let started = Instant::now();
    let extraction = extractor(tool, scratch.path())
        .extract(plan_id(3), &Tier::Default)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(
        extraction.attempt.process,
        ProcessOutcome::TimedOut { limit_secs: 1 }
    );
    assert_eq!(
        extraction.attempt.verdict.reasons()[0],
        RejectReason::TimedOut { limit_secs: 1 }
    );
}

#[tokio::test]
async fn test_non_zero_exit_with_full_plan_is_valid() {
    let bin = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let body = format!("{PLAN_BODY}exit 3\n");
    let tool = PlanTool::new(write_tool(bin.path(), "nz_plan", &body), None);

    let extraction = extractor(tool, scratch.path())
        .extract(plan_id(8), &Tier::Default)
        .await
        .unwrap();

    assert!(extraction.attempt.is_valid());
    assert!(!extraction.attempt.process.reported_success());
}

#[tokio::test]
async fn test_missing_executable_is_tool_not_found() {
    let bin = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let tool = PlanTool::new(bin.path().join("nz_plan"), None);

    let err = extractor(tool, scratch.path())
        .extract(plan_id(8), &Tier::Default)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::ToolNotFound { .. }));
    assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_resolve_end_to_end_with_located_tool() {
    let bin = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let output = tempdir().unwrap();
    let base = tempdir().unwrap();
    for key in ["300", "200", "100"] {
        std::fs::create_dir(base.path().join(key)).unwrap();
    }

    // Only archive 200 holds the plan.
    let body = format!(
        "case \"$4\" in\n  */200)\n{PLAN_BODY}    ;;\n  *)\n    echo \"ERROR: file not accessible\"\n    exit 1\n    ;;\nesac\n"
    );
    let tool = write_tool(bin.path(), "nz_plan", &body);

    let mut config = ResolverConfig::default();
    config.tool.candidates = vec![bin.path().join("missing"), tool.clone()];
    config.tool.timeout_secs = 30;
    config.artifacts.scratch_dir = Some(scratch.path().to_path_buf());
    config.artifacts.output_dir = Some(output.path().to_path_buf());

    let mut orch = orchestrator_from_config(&config).unwrap();
    let result = orch
        .resolve(plan_id(4521), base.path(), SearchMode::BoundedArchiveSearch)
        .await
        .unwrap();

    let found = match result {
        SearchResult::Found(found) => found,
        SearchResult::NotFound(f) => panic!("expected plan, got {:?}", f.kind),
    };
    assert_eq!(found.source.archive().map(|a| a.key), Some(200));
    assert_eq!(found.trace.len(), 3);
    assert_eq!(
        found.reproducer,
        format!(
            "{} -tar 4521 -tardir {}",
            tool.display(),
            base.path().join("200").display()
        )
    );

    let persisted = found.persisted_to.expect("persisted");
    assert_eq!(persisted, output.path().join("4521.pln"));
    assert!(std::fs::read_to_string(persisted)
        .unwrap()
        .contains("Node 6."));
    assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
}
