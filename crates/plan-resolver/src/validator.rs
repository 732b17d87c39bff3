//! Plan content classification
//!
//! The retrieval tool has no structured success signal: it can exit 0 and
//! print only a "not found" notice, or exit non-zero after printing a full
//! plan. Classification therefore looks at the text alone, using an ordered
//! list of rules. The first rule that rejects the text decides the verdict.
//!
//! This is a best-effort heuristic. A `Valid` verdict means the text looks
//! like a plan, not that the plan is correct.

use crate::attempt::ProcessOutcome;
use crate::config::ValidatorConfig;
use serde::{Deserialize, Serialize};

/// Why a retrieved text was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Output contains a known failure notice
    ErrorSignatureDetected { signature: String },
    /// Too few lines of real plan content
    InsufficientContent {
        meaningful_lines: usize,
        required: usize,
    },
    /// The tool could not be run
    ToolInvocationFailed { message: String },
    /// The tool was killed after the per-attempt limit
    TimedOut { limit_secs: u64 },
    /// Non-zero exit, recorded next to a content reason
    NonZeroExit { code: Option<i32> },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::ErrorSignatureDetected { signature } => {
                write!(f, "error signature detected ({signature:?})")
            }
            RejectReason::InsufficientContent {
                meaningful_lines,
                required,
            } => write!(
                f,
                "insufficient content ({meaningful_lines} meaningful lines, need {required})"
            ),
            RejectReason::ToolInvocationFailed { message } => {
                write!(f, "tool invocation failed: {message}")
            }
            RejectReason::TimedOut { limit_secs } => write!(f, "timed out after {limit_secs}s"),
            RejectReason::NonZeroExit { code: Some(code) } => write!(f, "exit code {code}"),
            RejectReason::NonZeroExit { code: None } => write!(f, "terminated by signal"),
        }
    }
}

/// Classification result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Valid { meaningful_lines: usize },
    /// Reasons are never empty
    Invalid { reasons: Vec<RejectReason> },
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid { .. })
    }

    pub fn reasons(&self) -> &[RejectReason] {
        match self {
            Verdict::Valid { .. } => &[],
            Verdict::Invalid { reasons } => reasons,
        }
    }

    fn invalid(reason: RejectReason) -> Self {
        Verdict::Invalid {
            reasons: vec![reason],
        }
    }
}

/// One entry in the ordered rule list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationRule {
    /// Reject when any signature occurs anywhere in the text
    ErrorSignatures(Vec<String>),
    /// Reject when fewer than `required` lines are meaningful
    MinimumContent { required: usize },
}

impl ValidationRule {
    /// Build a signature rule; matching is case-insensitive
    pub fn signatures<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ValidationRule::ErrorSignatures(
            signatures
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    fn check(&self, lowered: &str, meaningful_lines: usize) -> Option<RejectReason> {
        match self {
            ValidationRule::ErrorSignatures(signatures) => signatures
                .iter()
                .find(|sig| lowered.contains(sig.as_str()))
                .map(|sig| RejectReason::ErrorSignatureDetected {
                    signature: sig.clone(),
                }),
            ValidationRule::MinimumContent { required } => {
                (meaningful_lines < *required).then(|| RejectReason::InsufficientContent {
                    meaningful_lines,
                    required: *required,
                })
            }
        }
    }
}

/// Classifies retrieved text as a plan or as noise
#[derive(Debug, Clone)]
pub struct ContentValidator {
    rules: Vec<ValidationRule>,
    noise_prefixes: Vec<String>,
}

impl Default for ContentValidator {
    fn default() -> Self {
        Self::new(&ValidatorConfig::default())
    }
}

impl ContentValidator {
    /// Signature rule first, then the content threshold
    pub fn new(config: &ValidatorConfig) -> Self {
        ContentValidator {
            rules: vec![
                ValidationRule::signatures(&config.error_signatures),
                ValidationRule::MinimumContent {
                    required: config.min_meaningful_lines,
                },
            ],
            noise_prefixes: config
                .noise_prefixes
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// Append a rule after the built-in ones
    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    /// Classify text alone
    pub fn classify(&self, text: &str) -> Verdict {
        let lowered = text.to_lowercase();
        let meaningful_lines = self.count_meaningful_lines(text);

        for rule in &self.rules {
            if let Some(reason) = rule.check(&lowered, meaningful_lines) {
                return Verdict::invalid(reason);
            }
        }

        Verdict::Valid { meaningful_lines }
    }

    /// Classify text together with how the process ended.
    ///
    /// A non-zero exit never rejects text that classifies as valid. A timeout
    /// or a process that never ran is always invalid.
    pub fn judge(&self, text: &str, outcome: &ProcessOutcome) -> Verdict {
        let content = self.classify(text);

        let leading = match outcome {
            ProcessOutcome::Exited { success: true, .. } => return content,
            ProcessOutcome::Exited {
                success: false,
                code,
            } => {
                return match content {
                    Verdict::Valid { .. } => content,
                    Verdict::Invalid { mut reasons } => {
                        reasons.push(RejectReason::NonZeroExit { code: *code });
                        Verdict::Invalid { reasons }
                    }
                };
            }
            ProcessOutcome::TimedOut { limit_secs } => RejectReason::TimedOut {
                limit_secs: *limit_secs,
            },
            ProcessOutcome::ProcessError { message } => RejectReason::ToolInvocationFailed {
                message: message.clone(),
            },
        };

        let mut reasons = vec![leading];
        if let Verdict::Invalid { reasons: content_reasons } = content {
            reasons.extend(content_reasons);
        }
        Verdict::Invalid { reasons }
    }

    /// Lines that are neither blank nor start with a noise prefix
    pub fn count_meaningful_lines(&self, text: &str) -> usize {
        text.lines().filter(|line| self.is_meaningful(line)).count()
    }

    fn is_meaningful(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        if trimmed.trim_end().is_empty() {
            return false;
        }
        let lowered = trimmed.to_lowercase();
        !self
            .noise_prefixes
            .iter()
            .any(|prefix| lowered.starts_with(prefix.as_str()))
    }
}
