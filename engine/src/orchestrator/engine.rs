//! Orchestrator loop
//!
//! Owns the session state machine and composes the searcher, research agent,
//! dispatcher, roster, gates and learning tracker. Every transition is
//! appended to the execution log (the source of truth for recovery) and
//! mirrored into the session snapshot for polling. The loop degrades, never
//! crashes: agent failures retry, then synthesise a failure report so the
//! user still reaches a checkpoint.

use crate::agents::roster::{InvokeArgs, ToolAccess};
use crate::agents::{Execution, Plan, Proposal, Roster, Verdict, Verification};
use crate::config::Limits;
use crate::dispatch::{CallLedger, Dispatcher, ToolHandler};
use crate::gates::{GateRequest, Gatekeeper};
use crate::learning::LearningTracker;
use crate::llm::ToolCall;
use crate::orchestrator::analysis::{analyse, GoalAnalysis};
use crate::orchestrator::context::ContextBundle;
use crate::orchestrator::state::{can_transition, AbortReason, SessionState};
use sdk::errors::exit_codes;
use sdk::types::{AgentResult, AgentRole, AgentStatus, GateDecision, GateId, SessionStatus};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Shared control surface between a running session and its owner
#[derive(Clone)]
pub struct SessionCtl {
    cancelled: Arc<AtomicBool>,
    status: Arc<Mutex<SessionStatus>>,
}

impl SessionCtl {
    pub fn new(session_id: &str) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionStatus {
                session_id: session_id.to_string(),
                state: SessionState::Init.as_str().to_string(),
                awaiting_gate: None,
                last_event: String::new(),
                iteration: 0,
            })),
        }
    }

    /// Request cancellation. Idempotent; the loop polls the flag before
    /// every suspension point.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Current snapshot for `poll`
    pub fn snapshot(&self) -> SessionStatus {
        self.lock_status().clone()
    }

    fn update(
        &self,
        state: SessionState,
        awaiting: Option<GateId>,
        last_event: &str,
        iteration: u32,
    ) {
        let mut status = self.lock_status();
        status.state = state.as_str().to_string();
        status.awaiting_gate = awaiting;
        status.last_event = last_event.to_string();
        status.iteration = iteration;
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, SessionStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Record of one pass through the iteration loop
#[derive(Debug, Clone, Default)]
pub struct IterationRecord {
    pub index: u32,
    pub plan: Option<Plan>,
    pub execution: Option<Execution>,
    pub verification: Option<Verification>,
    pub artefact: Option<String>,
    pub checkpoint_summary: Option<String>,
    pub decision: Option<GateDecision>,
    /// Learning-log keys written for this iteration
    pub lessons_written: Vec<String>,
}

/// Final outcome of a session run
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: String,
    pub final_state: SessionState,
    pub abort_reason: Option<AbortReason>,
    pub analysis: GoalAnalysis,
    pub proposal: Option<Proposal>,
    pub iterations: Vec<IterationRecord>,
    pub artefact: Option<String>,
}

impl SessionOutcome {
    /// Map the terminal state onto the CLI exit-code contract
    pub fn exit_code(&self) -> i32 {
        match (self.final_state, self.abort_reason) {
            (SessionState::Done, _) => exit_codes::DONE,
            (_, Some(AbortReason::IterationCap)) => exit_codes::ITERATION_CAP,
            (_, Some(AbortReason::Internal)) => exit_codes::INTERNAL_ERROR,
            _ => exit_codes::ABORTED,
        }
    }
}

/// Outcome of one gate, timeout included
enum GateOutcome {
    Decision(GateDecision),
    TimedOut,
}

/// The session driver
pub struct Orchestrator {
    session_id: String,
    roster: Arc<Roster>,
    dispatcher: Arc<Dispatcher>,
    tracker: Arc<LearningTracker>,
    gatekeeper: Arc<dyn Gatekeeper>,
    limits: Limits,
    ctl: SessionCtl,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        roster: Arc<Roster>,
        dispatcher: Arc<Dispatcher>,
        tracker: Arc<LearningTracker>,
        gatekeeper: Arc<dyn Gatekeeper>,
        limits: Limits,
        ctl: SessionCtl,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            roster,
            dispatcher,
            tracker,
            gatekeeper,
            limits,
            ctl,
        }
    }

    /// Drive one goal from submission to a terminal state.
    ///
    /// Never returns an error: every failure path ends in a logged terminal
    /// state the caller can map to an exit code.
    pub async fn run(&self, goal: &str, selected: Vec<String>) -> SessionOutcome {
        let mut state = SessionState::Init;

        // Analysis is lexical; no suspension point before it
        let analysis = analyse(goal, &selected);
        let mut outcome = SessionOutcome {
            session_id: self.session_id.clone(),
            final_state: SessionState::Aborted,
            abort_reason: None,
            analysis: analysis.clone(),
            proposal: None,
            iterations: Vec::new(),
            artefact: None,
        };

        self.transition(&mut state, SessionState::Analysed, None, 0);

        let mut bundle = ContextBundle::new(goal, self.limits.context_ceiling_bytes);
        bundle.set_analysis(json!(analysis));
        bundle.set_lessons(
            self.tracker
                .recall(&analysis.domain, self.limits.recall_limit),
        );

        // --- memory search, then research if gaps remain ---
        let prelude_ledger = CallLedger::new(self.limits.max_tool_calls_per_iteration);

        if self.cancelled() {
            return self.aborted(outcome, state, AbortReason::Cancelled);
        }
        let search_result = self
            .dispatcher
            .dispatch(
                &prelude_ledger,
                &ToolCall::new(
                    "prelude_search",
                    "search_memory",
                    json!({ "entities": selected, "query": goal }).to_string(),
                ),
                0,
            )
            .await;
        let (coverage, gaps) = match &search_result.outcome {
            sdk::types::ToolOutcome::Ok { payload } => {
                bundle.set_memory(payload.clone());
                let report: Option<crate::memory::MemorySearchReport> =
                    serde_json::from_value(payload.clone()).ok();
                (
                    payload["aggregate_coverage"].as_f64().unwrap_or(0.0),
                    report.map(|r| r.unresolved_gaps()).unwrap_or_default(),
                )
            }
            sdk::types::ToolOutcome::Error { message, .. } => {
                warn!("memory search failed: {}", message);
                (0.0, Vec::new())
            }
        };
        self.transition(&mut state, SessionState::MemorySearched, None, 0);

        let mut research_summary = json!({ "performed": false });
        if coverage < self.limits.coverage_threshold {
            if self.cancelled() {
                return self.aborted(outcome, state, AbortReason::Cancelled);
            }
            // Research what memory could not answer, not the goal verbatim
            let topic = if gaps.is_empty() {
                goal.to_string()
            } else {
                format!("{} ({})", goal, gaps.join(", "))
            };
            let research_result = self
                .dispatcher
                .dispatch(
                    &prelude_ledger,
                    &ToolCall::new(
                        "prelude_research",
                        "research",
                        json!({ "topic": topic }).to_string(),
                    ),
                    0,
                )
                .await;
            if let sdk::types::ToolOutcome::Ok { payload } = &research_result.outcome {
                research_summary = json!({
                    "performed": true,
                    "offline": payload["offline"],
                    "total_searches": payload["total_searches"],
                    "total_results": payload["total_results"],
                });
                bundle.set_research(payload.clone());
                self.transition(&mut state, SessionState::Researched, None, 0);
            }
        }

        // --- proposal and the first gate ---
        let mut proposer_inputs = json!({
            "goal": goal,
            "selected_entities": selected,
        });

        let proposal = loop {
            if self.cancelled() {
                return self.aborted(outcome, state, AbortReason::Cancelled);
            }

            let result = self
                .invoke_direct_with_retries(
                    AgentRole::Proposer,
                    &proposer_inputs,
                    &bundle,
                    0,
                    Some(&prelude_ledger),
                )
                .await;
            self.transition(&mut state, SessionState::Proposed, None, 0);

            if self.cancelled() {
                // result discarded
                return self.aborted(outcome, state, AbortReason::Cancelled);
            }

            let proposal: Option<Proposal> = if result.is_ok() {
                serde_json::from_value(result.content.clone()).ok()
            } else {
                None
            };

            self.transition(&mut state, SessionState::GateProposal, None, 0);
            let payload = json!({
                "proposal": proposal,
                "proposal_error": if result.is_ok() { Value::Null } else { result.content.clone() },
                "research_summary": research_summary,
                "selected_entities": self.dispatcher.selected(),
            });

            match self.gate(GateId::Proposal, payload, 0, state).await {
                GateOutcome::TimedOut => {
                    return self.aborted(outcome, state, AbortReason::TimedOut);
                }
                GateOutcome::Decision(GateDecision::Abort) => {
                    return self.aborted(outcome, state, AbortReason::UserAbort);
                }
                GateOutcome::Decision(GateDecision::Approve) => {
                    // Approving a failed proposal falls back to the bare goal
                    break proposal.unwrap_or(Proposal {
                        scope: goal.to_string(),
                        assumptions: Vec::new(),
                        risks: Vec::new(),
                        required_entities: Vec::new(),
                    });
                }
                GateOutcome::Decision(GateDecision::Edit { fields }) => {
                    bundle.push_note(format!("proposal edits: {}", fields));
                    proposer_inputs["user_edits"] = fields;
                    continue;
                }
                GateOutcome::Decision(GateDecision::Revise { notes }) => {
                    // A checkpoint-style reply at the first gate reads as an edit
                    bundle.push_note(format!("proposal edits: {}", notes));
                    proposer_inputs["user_edits"] = json!({ "notes": notes });
                    continue;
                }
            }
        };
        outcome.proposal = Some(proposal.clone());

        // --- iteration loop ---
        for index in 1..=self.limits.max_iterations {
            let ledger = CallLedger::new(self.limits.max_tool_calls_per_iteration);
            let mut record = IterationRecord {
                index,
                ..Default::default()
            };

            self.transition(&mut state, SessionState::Planning, None, index);
            if self.cancelled() {
                outcome.iterations.push(record);
                return self.aborted(outcome, state, AbortReason::Cancelled);
            }

            // Planner
            let plan_inputs = json!({
                "goal": goal,
                "proposal": proposal,
                "context": bundle.render().text,
            });
            let planner = self
                .dispatch_agent_with_retries("call_planner", &plan_inputs, index, &ledger)
                .await;
            if self.cancelled() {
                outcome.iterations.push(record);
                return self.aborted(outcome, state, AbortReason::Cancelled);
            }

            let plan: Option<Plan> = planner
                .as_ref()
                .filter(|r| r.is_ok())
                .and_then(|r| serde_json::from_value(r.content.clone()).ok());

            if let Some(plan) = &plan {
                record.plan = Some(plan.clone());
                bundle.push_transcript(index, "planner", format!("{} steps", plan.steps.len()));

                // Executor
                self.transition(&mut state, SessionState::Executing, None, index);
                let exec_inputs = json!({
                    "goal": goal,
                    "plan": plan,
                    "context": bundle.render().text,
                });
                let executor = self
                    .dispatch_agent_with_retries("call_executor", &exec_inputs, index, &ledger)
                    .await;
                if self.cancelled() {
                    outcome.iterations.push(record);
                    return self.aborted(outcome, state, AbortReason::Cancelled);
                }

                let execution: Option<Execution> = executor
                    .as_ref()
                    .filter(|r| r.is_ok())
                    .and_then(|r| serde_json::from_value(r.content.clone()).ok());

                self.transition(&mut state, SessionState::Verifying, None, index);
                if let Some(execution) = &execution {
                    record.execution = Some(execution.clone());
                    bundle.push_transcript(
                        index,
                        "executor",
                        format!("{} steps elaborated", execution.steps.len()),
                    );

                    // Verifier
                    let verify_inputs = json!({
                        "plan": plan,
                        "execution": execution,
                        "context": bundle.render().text,
                    });
                    let verifier = self
                        .dispatch_agent_with_retries("call_verifier", &verify_inputs, index, &ledger)
                        .await;
                    if self.cancelled() {
                        outcome.iterations.push(record);
                        return self.aborted(outcome, state, AbortReason::Cancelled);
                    }

                    record.verification = Some(match verifier {
                        Some(result) if result.is_ok() => {
                            serde_json::from_value(result.content.clone()).unwrap_or_else(|_| {
                                Verification::synthesized_failure("verifier envelope unreadable")
                            })
                        }
                        _ => Verification::synthesized_failure(
                            "verifier failed; execution unchecked",
                        ),
                    });
                } else {
                    record.verification = Some(Verification::synthesized_failure(
                        "executor failed repeatedly; no execution detail produced",
                    ));
                }
            } else {
                // Planner died: synthesise the verification and short-circuit
                self.transition(&mut state, SessionState::Verifying, None, index);
                record.verification = Some(Verification::synthesized_failure(
                    "planner failed repeatedly; no plan produced",
                ));
            }

            let verification = record
                .verification
                .clone()
                .unwrap_or_else(|| Verification::synthesized_failure("missing verification"));
            let passed = verification.verdict == Verdict::Pass && !verification.has_blocking_issue();

            // Generator runs only on a clean verification
            if passed {
                self.transition(&mut state, SessionState::Generating, None, index);
                if self.cancelled() {
                    outcome.iterations.push(record);
                    return self.aborted(outcome, state, AbortReason::Cancelled);
                }
                let gen_inputs = json!({
                    "goal": goal,
                    "plan": record.plan,
                    "execution": record.execution,
                    "context": bundle.render().text,
                });
                let generator = self
                    .dispatch_agent_with_retries("call_generator", &gen_inputs, index, &ledger)
                    .await;
                match generator {
                    Some(result) if result.is_ok() => {
                        record.artefact = result.content["artefact"]
                            .as_str()
                            .map(String::from);
                    }
                    _ => {
                        // Partial artefact + failed verdict at the checkpoint
                        record.verification = Some(Verification::synthesized_failure(
                            "generator failed; no artefact produced",
                        ));
                    }
                }
            }

            // Checkpoint summary (direct roster call; failures are cosmetic)
            if self.cancelled() {
                outcome.iterations.push(record);
                return self.aborted(outcome, state, AbortReason::Cancelled);
            }
            let checkpoint_inputs = json!({
                "plan": record.plan,
                "execution": record.execution,
                "verification": record.verification,
                "artefact": record.artefact,
            });
            let checkpoint = self
                .invoke_direct_with_retries(
                    AgentRole::Checkpoint,
                    &checkpoint_inputs,
                    &bundle,
                    index,
                    None,
                )
                .await;
            if checkpoint.is_ok() {
                record.checkpoint_summary =
                    checkpoint.content["summary"].as_str().map(String::from);
            }

            // --- the checkpoint gate ---
            self.transition(&mut state, SessionState::GateCheckpoint, None, index);
            let verification = record
                .verification
                .clone()
                .unwrap_or_else(|| Verification::synthesized_failure("missing verification"));
            let gate_payload = json!({
                "plan": record.plan,
                "execution": record.execution,
                "verification": verification,
                "generated_artefact": record.artefact,
                "checkpoint_summary": record.checkpoint_summary,
            });

            let decision = match self
                .gate(GateId::Checkpoint, gate_payload, index, state)
                .await
            {
                GateOutcome::TimedOut => {
                    outcome.iterations.push(record);
                    return self.aborted(outcome, state, AbortReason::TimedOut);
                }
                GateOutcome::Decision(decision) => decision,
            };
            record.decision = Some(decision.clone());

            let verified_ok =
                verification.verdict == Verdict::Pass && !verification.has_blocking_issue();

            match decision {
                GateDecision::Approve => {
                    if verified_ok {
                        match self.tracker.record_success(
                            &analysis.domain,
                            goal,
                            index,
                            &success_summary(&proposal, &record),
                            &evidence_refs(&record),
                        ) {
                            Ok(key) => record.lessons_written.push(key),
                            Err(e) => warn!("failed to record success pattern: {}", e),
                        }
                    } else {
                        // Approved despite a failed verification still logs
                        // the error pattern
                        match self.tracker.record_error(
                            &analysis.domain,
                            goal,
                            index,
                            &error_summary(&verification),
                            &offending_steps(&verification),
                        ) {
                            Ok(key) => record.lessons_written.push(key),
                            Err(e) => warn!("failed to record error pattern: {}", e),
                        }
                    }
                    outcome.artefact = record.artefact.clone();
                    outcome.iterations.push(record);
                    self.transition(&mut state, SessionState::Done, None, index);
                    outcome.final_state = SessionState::Done;
                    return outcome;
                }
                GateDecision::Revise { notes } => {
                    match self.tracker.record_error(
                        &analysis.domain,
                        goal,
                        index,
                        &error_summary(&verification),
                        &offending_steps(&verification),
                    ) {
                        Ok(key) => record.lessons_written.push(key),
                        Err(e) => warn!("failed to record error pattern: {}", e),
                    }
                    bundle.push_note(format!("revision notes (iteration {}): {}", index, notes));
                    outcome.iterations.push(record);

                    if index == self.limits.max_iterations {
                        return self.aborted(outcome, state, AbortReason::IterationCap);
                    }
                    // next iteration transitions GateCheckpoint → Planning
                }
                GateDecision::Edit { fields } => {
                    // Structured edits at the checkpoint read as revise notes
                    match self.tracker.record_error(
                        &analysis.domain,
                        goal,
                        index,
                        &error_summary(&verification),
                        &offending_steps(&verification),
                    ) {
                        Ok(key) => record.lessons_written.push(key),
                        Err(e) => warn!("failed to record error pattern: {}", e),
                    }
                    bundle.push_note(format!("revision notes (iteration {}): {}", index, fields));
                    outcome.iterations.push(record);

                    if index == self.limits.max_iterations {
                        return self.aborted(outcome, state, AbortReason::IterationCap);
                    }
                }
                GateDecision::Abort => {
                    outcome.iterations.push(record);
                    return self.aborted(outcome, state, AbortReason::UserAbort);
                }
            }
        }

        self.aborted(outcome, state, AbortReason::IterationCap)
    }

    /// Dispatch one of the `call_*` tools, retrying retryable failures with
    /// identical inputs. Returns `None` when even dispatch-level errors made
    /// the result unusable.
    async fn dispatch_agent_with_retries(
        &self,
        tool: &str,
        inputs: &Value,
        iteration: u32,
        ledger: &CallLedger,
    ) -> Option<AgentResult> {
        let arguments = json!({ "inputs": inputs, "iteration": iteration }).to_string();
        let mut last: Option<AgentResult> = None;

        for attempt in 0..=self.limits.agent_retries {
            let call = ToolCall::new(format!("{}_{}", tool, attempt), tool, arguments.clone());
            let result = self.dispatcher.dispatch(ledger, &call, iteration).await;

            let agent_result = match &result.outcome {
                sdk::types::ToolOutcome::Ok { payload } => {
                    serde_json::from_value::<AgentResult>(payload.clone()).ok()
                }
                sdk::types::ToolOutcome::Error { message, .. } => {
                    warn!("{} dispatch failed: {}", tool, message);
                    None
                }
            };

            match agent_result {
                Some(result) if result.is_ok() => return Some(result),
                Some(result) if result.status == AgentStatus::RetryableFail => {
                    warn!(
                        "{} retryable failure (attempt {}/{})",
                        tool,
                        attempt + 1,
                        self.limits.agent_retries + 1
                    );
                    last = Some(result);
                }
                other => {
                    last = other;
                    break;
                }
            }
        }

        // Retries exhausted: escalate to fatal
        last.map(|mut result| {
            result.status = AgentStatus::FatalFail;
            result
        })
    }

    /// Invoke a role directly on the roster (Proposer and Checkpoint are not
    /// in the tool registry), with the same retry discipline.
    async fn invoke_direct_with_retries(
        &self,
        role: AgentRole,
        inputs: &Value,
        bundle: &ContextBundle,
        iteration: u32,
        ledger: Option<&CallLedger>,
    ) -> AgentResult {
        let rendered = bundle.render();
        let mut last = None;

        for attempt in 0..=self.limits.agent_retries {
            let result = self
                .roster
                .invoke(InvokeArgs {
                    role,
                    inputs,
                    bundle: &rendered.text,
                    iteration,
                    selected: self.dispatcher.selected(),
                    tools: ledger.map(|ledger| ToolAccess {
                        handler: self.dispatcher.as_ref() as &dyn ToolHandler,
                        ledger,
                    }),
                })
                .await;

            match result.status {
                AgentStatus::Ok => return result,
                AgentStatus::RetryableFail => {
                    warn!(
                        "{} retryable failure (attempt {}/{})",
                        role,
                        attempt + 1,
                        self.limits.agent_retries + 1
                    );
                    last = Some(result);
                }
                AgentStatus::FatalFail => return result,
            }
        }

        let mut result = last.unwrap_or_else(|| {
            AgentResult::failed(role, AgentStatus::FatalFail, "no attempts made", 0, iteration)
        });
        result.status = AgentStatus::FatalFail;
        result
    }

    /// Run a gate under the configured timeout
    async fn gate(
        &self,
        gate_id: GateId,
        payload: Value,
        iteration: u32,
        state: SessionState,
    ) -> GateOutcome {
        self.ctl.update(
            state,
            Some(gate_id),
            &format!("awaiting {} gate", gate_id),
            iteration,
        );

        let request = GateRequest {
            gate: gate_id,
            session_id: self.session_id.clone(),
            iteration,
            payload,
        };

        let outcome =
            match tokio::time::timeout(self.limits.gate_timeout(), self.gatekeeper.review(request))
                .await
            {
                Ok(decision) => GateOutcome::Decision(decision),
                Err(_) => {
                    warn!("{} gate timed out", gate_id);
                    GateOutcome::TimedOut
                }
            };

        self.ctl
            .update(state, None, &format!("{} gate resolved", gate_id), iteration);
        outcome
    }

    /// Poll the cancellation flag (called before every suspension point,
    /// and again after an in-flight call completes so its result can be
    /// discarded)
    fn cancelled(&self) -> bool {
        self.ctl.is_cancelled()
    }

    /// Write one transition to the execution log and the session snapshot
    fn transition(
        &self,
        state: &mut SessionState,
        to: SessionState,
        reason: Option<&str>,
        iteration: u32,
    ) {
        debug_assert!(
            can_transition(*state, to),
            "illegal transition {} -> {}",
            state,
            to
        );
        info!(session = %self.session_id, from = %state, to = %to, "transition");
        if let Err(e) = self
            .tracker
            .log_transition(&self.session_id, to.as_str(), reason)
        {
            warn!("failed to log transition: {}", e);
        }
        *state = to;
        self.ctl
            .update(to, None, &format!("entered {}", to), iteration);
    }

    /// Terminal abort path: single transition, single log entry
    fn aborted(
        &self,
        mut outcome: SessionOutcome,
        mut state: SessionState,
        reason: AbortReason,
    ) -> SessionOutcome {
        // An abort decision delivered on behalf of a cancelled session
        // records as a cancellation
        let reason = if reason == AbortReason::UserAbort && self.ctl.is_cancelled() {
            AbortReason::Cancelled
        } else {
            reason
        };
        if !state.is_terminal() {
            self.transition(
                &mut state,
                SessionState::Aborted,
                Some(reason.as_str()),
                outcome.iterations.len() as u32,
            );
        }
        outcome.final_state = SessionState::Aborted;
        outcome.abort_reason = Some(reason);
        outcome
    }
}

/// Summary line for a success pattern
fn success_summary(proposal: &Proposal, record: &IterationRecord) -> String {
    let steps = record
        .plan
        .as_ref()
        .map(|p| p.steps.len())
        .unwrap_or_default();
    format!(
        "approved in iteration {}: {} ({} steps planned)",
        record.index, proposal.scope, steps
    )
}

/// Summary line for an error pattern
fn error_summary(verification: &Verification) -> String {
    if verification.issues.is_empty() {
        "revision requested without verifier issues".to_string()
    } else {
        verification
            .issues
            .iter()
            .map(|issue| issue.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Evidence references for a success entry: planned step ids
fn evidence_refs(record: &IterationRecord) -> Vec<String> {
    record
        .plan
        .as_ref()
        .map(|plan| plan.steps.iter().map(|s| s.id.clone()).collect())
        .unwrap_or_default()
}

/// Offending step ids collected from verifier issues
fn offending_steps(verification: &Verification) -> Vec<String> {
    let mut steps: Vec<String> = verification
        .issues
        .iter()
        .flat_map(|issue| issue.step_ids.iter().cloned())
        .collect();
    steps.dedup();
    steps
}
