//! Agent roster
//!
//! Six role-specialised callers sharing one contract: `invoke(role, inputs,
//! bundle) → AgentResult`. Each role has a distinct output envelope, parsed
//! and validated here; the transport is the `LlmProvider` seam. Roles are
//! idempotent with respect to their inputs: identical inputs yield a
//! structurally identical envelope (wording may vary).

pub mod envelopes;
pub mod roster;

pub use roster::Roster;

use serde::{Deserialize, Serialize};

/// Proposal produced by the Proposer and reviewed at the first gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub scope: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    /// Must be a subset of the session's selected entities
    #[serde(default)]
    pub required_entities: Vec<String>,
}

/// One step of an ordered plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub intent: String,
    #[serde(default)]
    pub inputs: serde_json::Value,
    pub expected_output: String,
}

/// Ordered plan produced by the Planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Step ids in plan order
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }
}

/// One elaborated step from the Executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedStep {
    pub id: String,
    pub intent: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub output: String,
}

/// Execution detail; must preserve planner step ids and order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub steps: Vec<ExecutedStep>,
}

/// Verifier verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Issue severity; `Block` forces another iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Block,
}

/// One issue raised by the Verifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub step_ids: Vec<String>,
}

/// Verification outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verdict: Verdict,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl Verification {
    /// True when any issue carries blocking severity
    pub fn has_blocking_issue(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Block)
    }

    /// Failure report synthesised when an agent dies mid-iteration, so the
    /// user still sees a checkpoint instead of a silent crash.
    pub fn synthesized_failure(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            issues: vec![Issue {
                severity: Severity::Block,
                message: message.into(),
                step_ids: Vec::new(),
            }],
        }
    }
}
