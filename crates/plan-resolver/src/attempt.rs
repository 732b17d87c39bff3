//! Retrieval attempt records

use crate::tier::Tier;
use crate::validator::Verdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the retrieval process did, independent of what it printed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Process ran to completion
    Exited { success: bool, code: Option<i32> },
    /// Killed after exceeding the per-attempt limit
    TimedOut { limit_secs: u64 },
    /// Process could not be started or waited on
    ProcessError { message: String },
}

impl ProcessOutcome {
    /// The tool's own success signal. Advisory only.
    pub fn reported_success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited { success: true, .. })
    }
}

/// One (plan, tier) retrieval and its classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalAttempt {
    pub tier: Tier,
    /// Combined stdout and stderr
    #[serde(skip)]
    pub text: String,
    pub process: ProcessOutcome,
    pub verdict: Verdict,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RetrievalAttempt {
    pub fn is_valid(&self) -> bool {
        self.verdict.is_valid()
    }
}
