//! Approval gates
//!
//! Two blocking user-decision points: proposal review before planning, and
//! the per-iteration checkpoint. The decision source is the `Gatekeeper`
//! trait: stdin for the CLI, a channel bridge for the session surface,
//! auto-approval for unattended runs and tests. The orchestrator wraps every
//! review in the gate timeout; silence becomes an abort with a `timed_out`
//! reason.

use async_trait::async_trait;
use sdk::types::{GateDecision, GateId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Payload presented to the user at a gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRequest {
    pub gate: GateId,
    pub session_id: String,
    pub iteration: u32,
    /// Gate-specific presentation: proposal + research summary at the first
    /// gate, plan/execution/verification/artefact at checkpoints
    pub payload: serde_json::Value,
}

/// Source of gate decisions
#[async_trait]
pub trait Gatekeeper: Send + Sync {
    /// Present the request and wait for a decision. The caller applies the
    /// gate timeout; implementations may block indefinitely.
    async fn review(&self, request: GateRequest) -> GateDecision;
}

/// Approves everything. Unattended runs and tests.
pub struct AutoApprove;

#[async_trait]
impl Gatekeeper for AutoApprove {
    async fn review(&self, _request: GateRequest) -> GateDecision {
        GateDecision::Approve
    }
}

/// Replays a fixed script of decisions; aborts once the script runs dry.
pub struct ScriptedGatekeeper {
    decisions: Mutex<VecDeque<GateDecision>>,
}

impl ScriptedGatekeeper {
    pub fn new(decisions: Vec<GateDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
        }
    }
}

#[async_trait]
impl Gatekeeper for ScriptedGatekeeper {
    async fn review(&self, request: GateRequest) -> GateDecision {
        let next = self
            .decisions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(decision) => decision,
            None => {
                warn!("gate script exhausted at {}; aborting", request.gate);
                GateDecision::Abort
            }
        }
    }
}

/// Interactive stdin gatekeeper for the CLI
pub struct StdinGatekeeper;

#[async_trait]
impl Gatekeeper for StdinGatekeeper {
    async fn review(&self, request: GateRequest) -> GateDecision {
        println!();
        println!("=== {} gate (iteration {}) ===", request.gate, request.iteration);
        if let Ok(pretty) = serde_json::to_string_pretty(&request.payload) {
            println!("{}", pretty);
        }
        let options = match request.gate {
            GateId::Proposal => "[a]pprove / [e]dit <notes> / a[b]ort",
            GateId::Checkpoint => "[a]pprove / [r]evise <notes> / a[b]ort",
        };
        println!("{}", options);

        // Reading stdin is blocking; keep it off the runtime workers.
        let line = tokio::task::spawn_blocking(|| {
            let mut input = String::new();
            std::io::stdin().read_line(&mut input).map(|_| input)
        })
        .await;

        let line = match line {
            Ok(Ok(line)) => line,
            _ => return GateDecision::Abort,
        };

        let trimmed = line.trim();
        let (verb, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((v, r)) => (v, r.trim()),
            None => (trimmed, ""),
        };

        match (request.gate, verb) {
            (_, "a" | "approve") => GateDecision::Approve,
            (GateId::Proposal, "e" | "edit") => GateDecision::Edit {
                fields: serde_json::json!({ "notes": rest }),
            },
            (GateId::Checkpoint, "r" | "revise") => GateDecision::Revise {
                notes: rest.to_string(),
            },
            _ => GateDecision::Abort,
        }
    }
}

/// A pending gate awaiting an external decision
#[derive(Debug)]
pub struct PendingGate {
    pub request: GateRequest,
    pub decision_tx: oneshot::Sender<GateDecision>,
}

/// Bridges gates to the session control surface.
///
/// `review` publishes a [`PendingGate`] on the channel and suspends until
/// `respond` delivers the decision through the oneshot. A closed channel in
/// either direction reads as an abort.
pub struct ChannelGatekeeper {
    pending_tx: mpsc::UnboundedSender<PendingGate>,
}

impl ChannelGatekeeper {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingGate>) {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        (Self { pending_tx }, pending_rx)
    }
}

#[async_trait]
impl Gatekeeper for ChannelGatekeeper {
    async fn review(&self, request: GateRequest) -> GateDecision {
        let (decision_tx, decision_rx) = oneshot::channel();
        if self
            .pending_tx
            .send(PendingGate {
                request,
                decision_tx,
            })
            .is_err()
        {
            return GateDecision::Abort;
        }
        decision_rx.await.unwrap_or(GateDecision::Abort)
    }
}
