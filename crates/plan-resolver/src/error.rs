//! Error types for plan-resolver

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving a plan artifact
///
/// Per-tier problems (a bad exit, a timeout, an output that looks like an
/// error notice) are verdict reasons, not errors. Only conditions that stop
/// the caller from searching at all live here.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Plan retrieval tool not found at any install location
    #[error("Plan retrieval tool not found (searched: {})", display_paths(.searched))]
    ToolNotFound { searched: Vec<PathBuf> },

    /// Archive base directory missing
    #[error("Archive base directory not found: {0}")]
    BaseNotFound(PathBuf),

    /// Plan identifier is not a positive integer
    #[error("Invalid plan identifier: {0:?}")]
    InvalidPlanId(String),

    /// Configuration values out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Winning artifact could not be moved into place
    #[error("Failed to persist plan artifact to {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file parsing error
    #[error("Config parsing error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "<none>".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
