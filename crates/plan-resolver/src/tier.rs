//! Plan identifiers and search tiers
//!
//! A tier is one place a plan can be retrieved from: the live plan store
//! (`Default`) or a numbered archive directory.

use crate::error::ResolveError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Positive integer naming one execution plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PlanId(u64);

impl PlanId {
    /// Create a plan id, rejecting zero
    pub fn new(value: u64) -> Result<Self, ResolveError> {
        if value == 0 {
            return Err(ResolveError::InvalidPlanId(value.to_string()));
        }
        Ok(PlanId(value))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlanId {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: u64 = trimmed
            .parse()
            .map_err(|_| ResolveError::InvalidPlanId(s.to_string()))?;
        PlanId::new(value)
    }
}

impl TryFrom<u64> for PlanId {
    type Error = ResolveError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        PlanId::new(value)
    }
}

impl From<PlanId> for u64 {
    fn from(id: PlanId) -> Self {
        id.0
    }
}

/// One numbered archive directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveTier {
    /// Bucket key taken from the directory name
    pub key: u64,
    /// Directory handed to the retrieval tool
    pub path: PathBuf,
}

impl ArchiveTier {
    pub fn new(key: u64, path: impl Into<PathBuf>) -> Self {
        ArchiveTier {
            key,
            path: path.into(),
        }
    }

    /// One-off tier for a caller-supplied directory.
    ///
    /// The key is the numeric directory name when there is one, 0 otherwise.
    pub fn manual(path: &Path) -> Self {
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_bucket_key)
            .unwrap_or(0);
        ArchiveTier::new(key, path)
    }
}

/// Newest first: a greater key sorts earlier.
impl Ord for ArchiveTier {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for ArchiveTier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A single search location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tier {
    /// Live plan store; the tool needs no path
    Default,
    /// Archive directory searched with the tool's archive mode
    Archive(ArchiveTier),
}

impl Tier {
    pub fn archive(&self) -> Option<&ArchiveTier> {
        match self {
            Tier::Default => None,
            Tier::Archive(a) => Some(a),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Tier::Default)
    }

    /// Short label used in logs and traces
    pub fn label(&self) -> String {
        match self {
            Tier::Default => "default".to_string(),
            Tier::Archive(a) => format!("archive:{}", a.key),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Default => write!(f, "default plan store"),
            Tier::Archive(a) => write!(f, "archive {} ({})", a.key, a.path.display()),
        }
    }
}

impl From<ArchiveTier> for Tier {
    fn from(tier: ArchiveTier) -> Self {
        Tier::Archive(tier)
    }
}

/// Parse a directory name made only of ASCII digits.
pub(crate) fn parse_bucket_key(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}
