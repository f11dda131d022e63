//! Wire types shared with external collaborators
//!
//! These types cross the boundary between the engine and its collaborators:
//! the chat UI consumes session snapshots and gate requests, the driving
//! language model consumes canonically-encoded tool results. Everything here
//! is plain serde data; no behaviour beyond encoding.

use serde::{Deserialize, Serialize};

/// Role of a specialised agent in the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Produces the proposal reviewed at the first gate
    Proposer,
    /// Produces the ordered step plan
    Planner,
    /// Elaborates each step into executable detail
    Executor,
    /// Checks the execution and returns a verdict
    Verifier,
    /// Synthesises the final user-facing artefact
    Generator,
    /// Summarises the iteration for the checkpoint gate
    Checkpoint,
}

impl AgentRole {
    /// Stable lowercase name used in logs and tool wire names
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Proposer => "proposer",
            AgentRole::Planner => "planner",
            AgentRole::Executor => "executor",
            AgentRole::Verifier => "verifier",
            AgentRole::Generator => "generator",
            AgentRole::Checkpoint => "checkpoint",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome class of an agent invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Structurally valid output
    Ok,
    /// Malformed or contract-violating output; identical inputs may be retried
    RetryableFail,
    /// Retries exhausted; the loop degrades to a checkpoint
    FatalFail,
}

/// Result envelope returned by every agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Which agent produced this
    pub role: AgentRole,
    /// Outcome class
    pub status: AgentStatus,
    /// Role-specific payload (proposal, plan, verdict, artefact, ...)
    pub content: serde_json::Value,
    /// Wall-clock duration of the call
    pub duration_ms: u64,
    /// Iteration the call belongs to (1-based; 0 for pre-loop calls)
    pub iteration: u32,
}

impl AgentResult {
    /// Create an `Ok` result
    pub fn ok(role: AgentRole, content: serde_json::Value, duration_ms: u64, iteration: u32) -> Self {
        Self {
            role,
            status: AgentStatus::Ok,
            content,
            duration_ms,
            iteration,
        }
    }

    /// Create a failure result with the given status and diagnostic message
    pub fn failed(
        role: AgentRole,
        status: AgentStatus,
        message: impl Into<String>,
        duration_ms: u64,
        iteration: u32,
    ) -> Self {
        Self {
            role,
            status,
            content: serde_json::json!({ "error": message.into() }),
            duration_ms,
            iteration,
        }
    }

    /// True when the invocation produced usable output
    pub fn is_ok(&self) -> bool {
        self.status == AgentStatus::Ok
    }
}

/// Outcome of a dispatched tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Tool ran; payload is its structured result
    Ok { payload: serde_json::Value },
    /// Tool did not run or failed; the model sees kind + message
    Error { kind: String, message: String },
}

/// Result of one tool dispatch, serialised to canonical text for the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool wire name
    pub name: String,
    /// Ok or error outcome
    pub outcome: ToolOutcome,
    /// Warnings attached during argument validation (e.g. filtered entities)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Set when the payload was cut at the byte ceiling
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl ToolResult {
    /// Successful result
    pub fn ok(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            outcome: ToolOutcome::Ok { payload },
            warnings: Vec::new(),
            truncated: false,
        }
    }

    /// Error result; `kind` is one of the documented error kinds
    pub fn error(
        name: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            outcome: ToolOutcome::Error {
                kind: kind.into(),
                message: message.into(),
            },
            warnings: Vec::new(),
            truncated: false,
        }
    }

    /// Attach a validation warning
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Canonical text form sent back to the driving model.
    ///
    /// Encoding then decoding yields a structurally equal value.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // A ToolResult is always representable; a failure here means a
            // non-serialisable payload slipped in, which we degrade to an
            // error envelope rather than panic.
            format!(
                r#"{{"name":{:?},"outcome":{{"status":"error","kind":"encoding","message":"unserialisable payload"}}}}"#,
                self.name
            )
        })
    }

    /// Decode the canonical text form
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Identifier of an approval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateId {
    /// Pre-planning proposal review
    Proposal,
    /// Per-iteration checkpoint review
    Checkpoint,
}

impl std::fmt::Display for GateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateId::Proposal => write!(f, "proposal"),
            GateId::Checkpoint => write!(f, "checkpoint"),
        }
    }
}

/// User decision at an approval gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Proceed
    Approve,
    /// Proposal gate only: merge edits and return to the proposer
    Edit { fields: serde_json::Value },
    /// Checkpoint gate only: run another iteration with these notes
    Revise { notes: String },
    /// Terminate the session
    Abort,
}

/// Point-in-time snapshot of a session, as returned by `poll`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session identifier
    pub session_id: String,
    /// Current state name (machine state, lowercase)
    pub state: String,
    /// Gate currently awaiting a decision, if any
    pub awaiting_gate: Option<GateId>,
    /// Most recent event line from the session log
    pub last_event: String,
    /// Current iteration index (0 before the loop starts)
    pub iteration: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_names_are_stable() {
        assert_eq!(AgentRole::Proposer.as_str(), "proposer");
        assert_eq!(AgentRole::Checkpoint.to_string(), "checkpoint");
    }

    #[test]
    fn test_tool_result_round_trip() {
        let result = ToolResult::ok("search_memory", json!({"coverage": 0.9}))
            .with_warning("filtered 1 entity");
        let encoded = result.encode();
        let decoded = ToolResult::decode(&encoded).unwrap();
        assert_eq!(result, decoded);
    }

    #[test]
    fn test_tool_result_error_round_trip() {
        let result = ToolResult::error("research", "constraint_violation", "memory-first");
        let decoded = ToolResult::decode(&result.encode()).unwrap();
        assert_eq!(result, decoded);
        match decoded.outcome {
            ToolOutcome::Error { kind, .. } => assert_eq!(kind, "constraint_violation"),
            ToolOutcome::Ok { .. } => panic!("expected error outcome"),
        }
    }

    #[test]
    fn test_truncated_marker_serialised_only_when_set() {
        let plain = ToolResult::ok("search_memory", json!({}));
        assert!(!plain.encode().contains("truncated"));

        let mut cut = plain.clone();
        cut.truncated = true;
        assert!(cut.encode().contains(r#""truncated":true"#));
    }

    #[test]
    fn test_gate_decision_wire_form() {
        let decision = GateDecision::Revise {
            notes: "tighten step 2".into(),
        };
        let text = serde_json::to_string(&decision).unwrap();
        assert!(text.contains(r#""decision":"revise"#));
        let back: GateDecision = serde_json::from_str(&text).unwrap();
        assert_eq!(decision, back);
    }

    #[test]
    fn test_agent_result_helpers() {
        let ok = AgentResult::ok(AgentRole::Planner, json!({"steps": []}), 12, 1);
        assert!(ok.is_ok());

        let failed = AgentResult::failed(
            AgentRole::Verifier,
            AgentStatus::FatalFail,
            "timeout",
            120_000,
            2,
        );
        assert!(!failed.is_ok());
        assert_eq!(failed.content["error"], "timeout");
    }
}
