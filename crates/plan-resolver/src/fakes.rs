//! In-memory retriever fake (testing only)
//!
//! `ScriptedRetriever` answers each tier with canned output instead of
//! running the external tool, and records every tier it was asked for.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::attempt::ProcessOutcome;
use crate::error::ResolveError;
use crate::extractor::PlanRetriever;
use crate::tier::{PlanId, Tier};
use crate::Result;

/// Canned behaviour for one tier
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Write `text` and exit
    Output { text: String, success: bool },
    /// Write `partial` and report a timeout
    TimedOut { partial: String, limit_secs: u64 },
    /// Fail to start
    ProcessError(String),
}

impl ScriptedResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        ScriptedResponse::Output {
            text: text.into(),
            success: true,
        }
    }
}

/// Retriever that replays scripted output per tier
#[derive(Debug)]
pub struct ScriptedRetriever {
    default: ScriptedResponse,
    archives: HashMap<u64, ScriptedResponse>,
    unscripted: ScriptedResponse,
    tool_missing: bool,
    calls: Mutex<Vec<Tier>>,
}

impl Default for ScriptedRetriever {
    fn default() -> Self {
        ScriptedRetriever {
            default: ScriptedResponse::ok(""),
            archives: HashMap::new(),
            unscripted: ScriptedResponse::ok(""),
            tool_missing: false,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_text(mut self, text: impl Into<String>) -> Self {
        self.default = ScriptedResponse::ok(text);
        self
    }

    pub fn default_response(mut self, response: ScriptedResponse) -> Self {
        self.default = response;
        self
    }

    pub fn archive_text(mut self, key: u64, text: impl Into<String>) -> Self {
        self.archives.insert(key, ScriptedResponse::ok(text));
        self
    }

    pub fn archive_response(mut self, key: u64, response: ScriptedResponse) -> Self {
        self.archives.insert(key, response);
        self
    }

    /// Response for archive keys with no script (empty output by default)
    pub fn unscripted(mut self, response: ScriptedResponse) -> Self {
        self.unscripted = response;
        self
    }

    /// Every retrieval fails with `ToolNotFound`
    pub fn tool_missing(mut self) -> Self {
        self.tool_missing = true;
        self
    }

    /// Tiers asked for, in order
    pub fn calls(&self) -> Vec<Tier> {
        self.calls.lock().unwrap().clone()
    }

    /// Archive keys asked for, in order
    pub fn archive_calls(&self) -> Vec<u64> {
        self.calls()
            .iter()
            .filter_map(|t| t.archive().map(|a| a.key))
            .collect()
    }
}

#[async_trait]
impl PlanRetriever for ScriptedRetriever {
    async fn retrieve(
        &self,
        _plan_id: PlanId,
        tier: &Tier,
        mut capture: File,
    ) -> Result<ProcessOutcome> {
        if self.tool_missing {
            return Err(ResolveError::ToolNotFound { searched: vec![] });
        }
        self.calls.lock().unwrap().push(tier.clone());

        let response = match tier {
            Tier::Default => &self.default,
            Tier::Archive(a) => self.archives.get(&a.key).unwrap_or(&self.unscripted),
        };

        match response {
            ScriptedResponse::Output { text, success } => {
                capture.write_all(text.as_bytes())?;
                Ok(ProcessOutcome::Exited {
                    success: *success,
                    code: Some(if *success { 0 } else { 1 }),
                })
            }
            ScriptedResponse::TimedOut {
                partial,
                limit_secs,
            } => {
                capture.write_all(partial.as_bytes())?;
                Ok(ProcessOutcome::TimedOut {
                    limit_secs: *limit_secs,
                })
            }
            ScriptedResponse::ProcessError(message) => Ok(ProcessOutcome::ProcessError {
                message: message.clone(),
            }),
        }
    }

    fn reproducer(&self, plan_id: PlanId, tier: &Tier) -> String {
        match tier {
            Tier::Default => format!("nz_plan {plan_id}"),
            Tier::Archive(a) => format!("nz_plan -tar {plan_id} -tardir {}", a.path.display()),
        }
    }
}

/// Plan-shaped text with `lines` meaningful lines
pub fn sample_plan(lines: usize) -> String {
    let mut text = String::from("NOTICE: plan retrieved\n");
    for i in 0..lines {
        text.push_str(&format!(
            "Node {}. [SPU Sequential Scan table \"ORDERS_{}\" {{(ORDERS.O_ORDERKEY)}}]\n",
            i + 1,
            i
        ));
    }
    text
}

/// The notice the tool prints when it has no such plan
pub fn not_found_notice(plan_id: u64) -> String {
    format!("nz_plan: trying to access plan {plan_id}\nERROR: file not accessible\n")
}
