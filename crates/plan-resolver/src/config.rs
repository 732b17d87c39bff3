//! Resolver configuration
//!
//! Defaults are built in; a TOML file and environment variables can
//! override them, in that order.

use crate::error::ResolveError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Install locations for the plan retrieval tool, checked in order
pub const DEFAULT_TOOL_CANDIDATES: &[&str] = &[
    "/nz/support/bin/nz_plan",
    "/nz/kit/bin/adm/nz_plan",
    "/usr/local/bin/nz_plan",
];

pub const DEFAULT_ARCHIVE_BASE: &str = "/nz/kit/log/planshist";
pub const DEFAULT_ARCHIVE_ALTERNATE: &str = "/nz/data/log/planshist";

pub const DEFAULT_MIN_MEANINGFUL_LINES: usize = 5;
pub const DEFAULT_MAX_BOUNDED_TIERS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_ERROR_SIGNATURES: &[&str] = &[
    "file not accessible",
    "trying to access",
    "not found",
    "no such file or directory",
    "error:",
    "failed",
    "failure",
    "permission denied",
];

pub const DEFAULT_NOISE_PREFIXES: &[&str] = &[
    "NOTICE",
    "WARNING",
    "ERROR",
    "INFO:",
    "nz_plan",
    "Usage:",
    "Searching",
    "Looking for",
    "Retrieving plan",
    "Plan file",
    "Archive directory",
];

/// Environment variable naming a TOML config file
pub const CONFIG_ENV: &str = "PLAN_RESOLVER_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub tool: ToolConfig,
    pub archive: ArchiveConfig,
    pub validator: ValidatorConfig,
    pub artifacts: ArtifactConfig,
}

/// Where to find the retrieval tool and how long to let it run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Install paths checked in order
    pub candidates: Vec<PathBuf>,
    /// Caller-supplied path tried after the candidates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<PathBuf>,
    /// Per-attempt timeout in seconds (0 = no timeout)
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            candidates: DEFAULT_TOOL_CANDIDATES.iter().map(PathBuf::from).collect(),
            fallback: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Archive tier layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory whose numeric children are archive tiers
    pub base: PathBuf,
    /// Bases tried by the CLI when `base` is missing
    pub alternates: Vec<PathBuf>,
    /// Archive attempts allowed in a bounded search
    pub max_bounded_tiers: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            base: PathBuf::from(DEFAULT_ARCHIVE_BASE),
            alternates: vec![PathBuf::from(DEFAULT_ARCHIVE_ALTERNATE)],
            max_bounded_tiers: DEFAULT_MAX_BOUNDED_TIERS,
        }
    }
}

/// Classification rules for retrieved text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Meaningful lines required for a valid plan
    pub min_meaningful_lines: usize,
    /// Substrings that mark output as a failure notice (case-insensitive)
    pub error_signatures: Vec<String>,
    /// Line prefixes that don't count as plan content (case-insensitive)
    pub noise_prefixes: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            min_meaningful_lines: DEFAULT_MIN_MEANINGFUL_LINES,
            error_signatures: DEFAULT_ERROR_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            noise_prefixes: DEFAULT_NOISE_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Capture and output locations
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Directory for per-attempt capture files (system temp dir when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    /// Directory a found plan is persisted to (not persisted when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl ArtifactConfig {
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl ResolverConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ResolverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from `PLAN_RESOLVER_CONFIG` (or defaults), then apply env overrides
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PLAN_RESOLVER_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tool) = lookup("PLAN_RESOLVER_TOOL") {
            self.tool.fallback = Some(PathBuf::from(tool));
        }
        if let Some(base) = lookup("PLAN_RESOLVER_ARCHIVE_BASE") {
            self.archive.base = PathBuf::from(base);
        }
        if let Some(dir) = lookup("PLAN_RESOLVER_OUTPUT_DIR") {
            self.artifacts.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = lookup("PLAN_RESOLVER_TIMEOUT_SECS") {
            self.tool.timeout_secs = parse_env_number("PLAN_RESOLVER_TIMEOUT_SECS", &secs)?;
        }
        if let Some(max) = lookup("PLAN_RESOLVER_MAX_TIERS") {
            self.archive.max_bounded_tiers = parse_env_number("PLAN_RESOLVER_MAX_TIERS", &max)?;
        }
        self.validate()
    }

    /// Reject values that would make every search fail or never stop
    pub fn validate(&self) -> Result<()> {
        if self.validator.min_meaningful_lines == 0 {
            return Err(ResolveError::InvalidConfig(
                "validator.min_meaningful_lines must be at least 1".to_string(),
            ));
        }
        if self.archive.max_bounded_tiers == 0 {
            return Err(ResolveError::InvalidConfig(
                "archive.max_bounded_tiers must be at least 1".to_string(),
            ));
        }
        if self.validator.error_signatures.iter().any(|s| s.trim().is_empty()) {
            return Err(ResolveError::InvalidConfig(
                "validator.error_signatures must not contain empty entries".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ResolveError::InvalidConfig(format!("{key} must be a number, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.validator.min_meaningful_lines, 5);
        assert_eq!(config.archive.max_bounded_tiers, 10);
        assert_eq!(config.tool.candidates.len(), DEFAULT_TOOL_CANDIDATES.len());
        assert_eq!(config.tool.timeout(), Some(Duration::from_secs(300)));
        assert!(config.artifacts.output_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ResolverConfig::from_toml_str(
            r#"
            [archive]
            base = "/srv/plans"
            max_bounded_tiers = 3

            [tool]
            timeout_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.archive.base, PathBuf::from("/srv/plans"));
        assert_eq!(config.archive.max_bounded_tiers, 3);
        assert_eq!(config.tool.timeout(), None);
        assert_eq!(config.validator, ValidatorConfig::default());
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let config = ResolverConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed = ResolverConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err = ResolverConfig::from_toml_str("[validator]\nmin_meaningful_lines = 0\n")
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = ResolverConfig::from_toml_str("[archive\nbase=").unwrap_err();
        assert!(matches!(err, ResolveError::ConfigParse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PLAN_RESOLVER_TOOL", "/opt/bin/nz_plan"),
            ("PLAN_RESOLVER_ARCHIVE_BASE", "/data/planshist"),
            ("PLAN_RESOLVER_OUTPUT_DIR", "/tmp/plans"),
            ("PLAN_RESOLVER_TIMEOUT_SECS", "45"),
            ("PLAN_RESOLVER_MAX_TIERS", "4"),
        ]
        .into_iter()
        .collect();

        let mut config = ResolverConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.tool.fallback, Some(PathBuf::from("/opt/bin/nz_plan")));
        assert_eq!(config.archive.base, PathBuf::from("/data/planshist"));
        assert_eq!(config.artifacts.output_dir, Some(PathBuf::from("/tmp/plans")));
        assert_eq!(config.tool.timeout_secs, 45);
        assert_eq!(config.archive.max_bounded_tiers, 4);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = ResolverConfig::default();
        let err = config
            .apply_env(|k| (k == "PLAN_RESOLVER_MAX_TIERS").then(|| "ten".to_string()))
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolver.toml");
        std::fs::write(&path, "[artifacts]\noutput_dir = \"/var/plans\"\n").unwrap();

        let config = ResolverConfig::from_file(&path).unwrap();
        assert_eq!(config.artifacts.output_dir, Some(PathBuf::from("/var/plans")));
    }
}
