//! Session control surface
//!
//! The API the chat UI consumes: `start` spawns a session task around the
//! orchestrator, `poll` reads its snapshot, `respond` resolves the gate it
//! is blocked on, `cancel` raises the cancellation flag. Sessions share
//! nothing mutable except the learning tracker, whose appends are
//! lock-guarded.

use crate::agents::Roster;
use crate::config::Limits;
use crate::dispatch::Dispatcher;
use crate::gates::{ChannelGatekeeper, PendingGate};
use crate::learning::LearningTracker;
use crate::llm::LlmProvider;
use crate::memory::{MemorySearcher, MemoryStore};
use crate::orchestrator::{Orchestrator, SessionCtl, SessionOutcome};
use crate::research::{ResearchAgent, SearchProvider};
use sdk::errors::CoreError;
use sdk::types::{GateDecision, GateId, SessionStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Everything a session needs that outlives any one session
pub struct SessionDeps {
    pub store: MemoryStore,
    pub llm: Arc<dyn LlmProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub tracker: Arc<LearningTracker>,
    pub limits: Limits,
}

struct SessionEntry {
    ctl: SessionCtl,
    pending: Arc<Mutex<Option<PendingGate>>>,
    outcome: Arc<Mutex<Option<SessionOutcome>>>,
}

/// Owns all running and finished sessions in this process
pub struct SessionManager {
    deps: SessionDeps,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a session for the goal and return its id.
    ///
    /// The session runs as a tokio task; gates surface through `poll` as
    /// `awaiting_gate` and are resolved with `respond`.
    pub fn start(&self, goal: &str, selected_entities: Vec<String>) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        let ctl = SessionCtl::new(&session_id);

        let (gatekeeper, mut pending_rx) = ChannelGatekeeper::new();
        let pending: Arc<Mutex<Option<PendingGate>>> = Arc::new(Mutex::new(None));
        let outcome: Arc<Mutex<Option<SessionOutcome>>> = Arc::new(Mutex::new(None));

        // Forward published gates into the pollable slot
        let pending_slot = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(gate) = pending_rx.recv().await {
                *lock_ignore_poison(&pending_slot) = Some(gate);
            }
        });

        let searcher = Arc::new(MemorySearcher::new(self.deps.store.clone()));
        let research = Arc::new(ResearchAgent::new(
            Arc::clone(&self.deps.search),
            self.deps.limits.max_research_queries,
            self.deps.limits.research_timeout(),
        ));
        let roster = Arc::new(Roster::new(
            Arc::clone(&self.deps.llm),
            self.deps.limits.agent_timeout(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            searcher,
            research,
            Arc::clone(&roster),
            selected_entities.iter().cloned().collect(),
            self.deps.limits.context_ceiling_bytes,
        ));

        let orchestrator = Orchestrator::new(
            session_id.clone(),
            roster,
            dispatcher,
            Arc::clone(&self.deps.tracker),
            Arc::new(gatekeeper),
            self.deps.limits.clone(),
            ctl.clone(),
        );

        let goal = goal.to_string();
        let outcome_slot = Arc::clone(&outcome);
        let id_for_task = session_id.clone();
        tokio::spawn(async move {
            let result = orchestrator.run(&goal, selected_entities).await;
            info!(
                "session {} finished: {}",
                id_for_task,
                result.final_state.as_str()
            );
            *lock_ignore_poison(&outcome_slot) = Some(result);
        });

        lock_ignore_poison(&self.sessions).insert(
            session_id.clone(),
            SessionEntry {
                ctl,
                pending,
                outcome,
            },
        );
        session_id
    }

    /// Snapshot of a session's state
    pub fn poll(&self, session_id: &str) -> Result<SessionStatus, CoreError> {
        let sessions = lock_ignore_poison(&self.sessions);
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
        Ok(entry.ctl.snapshot())
    }

    /// Resolve the gate a session is blocked on.
    ///
    /// `decision` is one of `approve`, `edit`, `revise`, `abort`; `notes`
    /// feeds the edit/revise payload.
    pub fn respond(
        &self,
        session_id: &str,
        gate_id: GateId,
        decision: &str,
        notes: Option<String>,
    ) -> Result<(), CoreError> {
        let decision = match decision {
            "approve" => GateDecision::Approve,
            "edit" => GateDecision::Edit {
                fields: serde_json::json!({ "notes": notes.unwrap_or_default() }),
            },
            "revise" => GateDecision::Revise {
                notes: notes.unwrap_or_default(),
            },
            "abort" => GateDecision::Abort,
            other => {
                return Err(CoreError::ConstraintViolation(format!(
                    "unknown gate decision '{}'",
                    other
                )))
            }
        };

        let pending_slot = {
            let sessions = lock_ignore_poison(&self.sessions);
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
            Arc::clone(&entry.pending)
        };

        let mut pending = lock_ignore_poison(&pending_slot);
        let gate = pending
            .take()
            .ok_or_else(|| CoreError::ConstraintViolation("no gate awaiting decision".into()))?;

        if gate.request.gate != gate_id {
            let actual = gate.request.gate;
            *pending = Some(gate);
            return Err(CoreError::ConstraintViolation(format!(
                "session is awaiting the {} gate, not {}",
                actual, gate_id
            )));
        }

        // A closed receiver means the session already terminated; that is
        // not an error the caller can act on.
        let _ = gate.decision_tx.send(decision);
        Ok(())
    }

    /// Cancel a session. Idempotent. If the session is parked at a gate,
    /// the gate resolves to abort so the task can wind down.
    pub fn cancel(&self, session_id: &str) -> Result<(), CoreError> {
        let sessions = lock_ignore_poison(&self.sessions);
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;

        entry.ctl.cancel();
        if let Some(gate) = lock_ignore_poison(&entry.pending).take() {
            let _ = gate.decision_tx.send(GateDecision::Abort);
        }
        Ok(())
    }

    /// Terminal outcome, once the session task has finished
    pub fn outcome(&self, session_id: &str) -> Result<Option<SessionOutcome>, CoreError> {
        let sessions = lock_ignore_poison(&self.sessions);
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
        let outcome = lock_ignore_poison(&entry.outcome).clone();
        Ok(outcome)
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FinalAnswer, LlmResponse, Message};
    use crate::memory::store::ENTITIES_DIR;
    use crate::research::SearchHit;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct ScriptedLlm {
        script: Mutex<Vec<LlmResponse>>,
    }

    impl ScriptedLlm {
        fn new(mut responses: Vec<LlmResponse>) -> Self {
            responses.reverse();
            Self {
                script: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn generate(&self, _messages: &[Message]) -> crate::llm::Result<LlmResponse> {
            self.script
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| crate::llm::LlmError::ProviderUnavailable("script done".into()))
        }
    }

    struct OfflineSearch;

    #[async_trait]
    impl SearchProvider for OfflineSearch {
        fn name(&self) -> &str {
            "offline"
        }
        async fn search(&self, _q: &str, _m: u32) -> anyhow::Result<Vec<SearchHit>> {
            Ok(vec![])
        }
        async fn probe(&self) -> bool {
            false
        }
    }

    fn happy_path_script() -> Vec<LlmResponse> {
        vec![
            // Proposer
            LlmResponse::FinalAnswer(FinalAnswer::new(
                r#"{"scope": "set up the orchestrator", "assumptions": [], "risks": [], "required_entities": ["infra-notes"]}"#,
            )),
            // Planner
            LlmResponse::FinalAnswer(FinalAnswer::new(
                r#"[{"id": "s1", "intent": "prepare", "expected_output": "ready"}]"#,
            )),
            // Executor
            LlmResponse::FinalAnswer(FinalAnswer::new(
                r#"{"steps": [{"id": "s1", "intent": "prepare", "actions": ["do it"], "output": "ready"}]}"#,
            )),
            // Verifier
            LlmResponse::FinalAnswer(FinalAnswer::new(r#"{"verdict": "pass", "issues": []}"#)),
            // Generator
            LlmResponse::FinalAnswer(FinalAnswer::new("Final runbook artefact")),
            // Checkpoint
            LlmResponse::FinalAnswer(FinalAnswer::new("Iteration went cleanly")),
        ]
    }

    fn manager_with(script: Vec<LlmResponse>) -> (TempDir, SessionManager) {
        let dir = TempDir::new().unwrap();
        let entities = dir.path().join(ENTITIES_DIR);
        std::fs::create_dir_all(&entities).unwrap();
        std::fs::write(
            entities.join("infra-notes.md"),
            "Orchestrator infrastructure setup basics.",
        )
        .unwrap();

        let store = MemoryStore::open(dir.path()).unwrap();
        let tracker = Arc::new(LearningTracker::new(store.clone(), 8 * 1024));
        let deps = SessionDeps {
            store,
            llm: Arc::new(ScriptedLlm::new(script)),
            search: Arc::new(OfflineSearch),
            tracker,
            limits: Limits::default(),
        };
        (dir, SessionManager::new(deps))
    }

    async fn wait_for_gate(manager: &SessionManager, id: &str, gate: GateId) {
        for _ in 0..200 {
            let status = manager.poll(id).unwrap();
            if status.awaiting_gate == Some(gate) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached the {} gate", gate);
    }

    async fn wait_for_outcome(manager: &SessionManager, id: &str) -> SessionOutcome {
        for _ in 0..200 {
            if let Some(outcome) = manager.outcome(id).unwrap() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never finished");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_poll_respond_to_done() {
        let (_dir, manager) = manager_with(happy_path_script());
        let id = manager.start("Set up orchestrator", vec!["infra-notes".to_string()]);

        wait_for_gate(&manager, &id, GateId::Proposal).await;
        manager
            .respond(&id, GateId::Proposal, "approve", None)
            .unwrap();

        wait_for_gate(&manager, &id, GateId::Checkpoint).await;
        manager
            .respond(&id, GateId::Checkpoint, "approve", None)
            .unwrap();

        let outcome = wait_for_outcome(&manager, &id).await;
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.artefact.as_deref(), Some("Final runbook artefact"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_respond_wrong_gate_is_rejected() {
        let (_dir, manager) = manager_with(happy_path_script());
        let id = manager.start("Set up orchestrator", vec!["infra-notes".to_string()]);

        wait_for_gate(&manager, &id, GateId::Proposal).await;
        let err = manager.respond(&id, GateId::Checkpoint, "approve", None);
        assert!(err.is_err());

        // The gate is still pending and can be answered correctly
        manager
            .respond(&id, GateId::Proposal, "abort", None)
            .unwrap();
        let outcome = wait_for_outcome(&manager, &id).await;
        assert_eq!(outcome.exit_code(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_is_idempotent() {
        let (dir, manager) = manager_with(happy_path_script());
        let id = manager.start("Set up orchestrator", vec!["infra-notes".to_string()]);

        wait_for_gate(&manager, &id, GateId::Proposal).await;
        manager.cancel(&id).unwrap();
        manager.cancel(&id).unwrap();
        manager.cancel(&id).unwrap();

        let outcome = wait_for_outcome(&manager, &id).await;
        assert_eq!(
            outcome.final_state,
            crate::orchestrator::SessionState::Aborted
        );

        // exactly one terminal entry in the execution log
        let log = std::fs::read_to_string(
            dir.path().join(ENTITIES_DIR).join("execution_log.md"),
        )
        .unwrap();
        let terminal_lines = log
            .lines()
            .filter(|line| line.contains("\taborted"))
            .count();
        assert_eq!(terminal_lines, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_session_errors() {
        let (_dir, manager) = manager_with(vec![]);
        assert!(manager.poll("nope").is_err());
        assert!(manager.cancel("nope").is_err());
        assert!(manager
            .respond("nope", GateId::Proposal, "approve", None)
            .is_err());
    }
}
