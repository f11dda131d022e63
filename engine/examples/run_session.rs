//! Drive one scripted session end to end.
//!
//! Run with: cargo run --example run_session
//!
//! Uses a canned model provider and auto-approval, so it needs no network
//! and no credentials; it shows the full state-machine walk, the learning
//! log appends, and the final artefact.

use async_trait::async_trait;
use loom_engine::agents::Roster;
use loom_engine::config::Limits;
use loom_engine::dispatch::Dispatcher;
use loom_engine::gates::AutoApprove;
use loom_engine::learning::LearningTracker;
use loom_engine::llm::{FinalAnswer, LlmError, LlmProvider, LlmResponse, Message};
use loom_engine::memory::{MemorySearcher, MemoryStore};
use loom_engine::orchestrator::{Orchestrator, SessionCtl};
use loom_engine::research::{ResearchAgent, SearchHit, SearchProvider};
use std::sync::{Arc, Mutex};

struct CannedLlm {
    script: Mutex<Vec<LlmResponse>>,
}

#[async_trait]
impl LlmProvider for CannedLlm {
    fn name(&self) -> &str {
        "canned"
    }

    async fn generate(&self, _messages: &[Message]) -> Result<LlmResponse, LlmError> {
        self.script
            .lock()
            .expect("script lock")
            .pop()
            .ok_or_else(|| LlmError::ProviderUnavailable("script exhausted".into()))
    }
}

struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    fn name(&self) -> &str {
        "none"
    }
    async fn search(&self, _query: &str, _max: u32) -> anyhow::Result<Vec<SearchHit>> {
        Ok(vec![])
    }
    async fn probe(&self) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    loom_engine::telemetry::init(Some("info"));

    // A throwaway memory store with one entity
    let dir = tempfile::tempdir()?;
    let entities = dir.path().join("entities");
    std::fs::create_dir_all(&entities)?;
    std::fs::write(
        entities.join("infra-notes.md"),
        "Basic orchestrator infrastructure: start small, automate the checks.",
    )?;

    let mut script = vec![
        // Proposer
        LlmResponse::FinalAnswer(FinalAnswer::new(
            r#"{"scope": "stand up the orchestrator", "assumptions": ["single node"], "risks": ["scope creep"], "required_entities": ["infra-notes"]}"#,
        )),
        // Planner
        LlmResponse::FinalAnswer(FinalAnswer::new(
            r#"[{"id": "s1", "intent": "provision the host", "expected_output": "host ready"},
                {"id": "s2", "intent": "install the orchestrator", "expected_output": "service up"}]"#,
        )),
        // Executor
        LlmResponse::FinalAnswer(FinalAnswer::new(
            r#"{"steps": [
                {"id": "s1", "intent": "provision the host", "actions": ["create VM", "harden SSH"], "output": "host ready"},
                {"id": "s2", "intent": "install the orchestrator", "actions": ["install package", "enable service"], "output": "service up"}]}"#,
        )),
        // Verifier
        LlmResponse::FinalAnswer(FinalAnswer::new(r#"{"verdict": "pass", "issues": []}"#)),
        // Generator
        LlmResponse::FinalAnswer(FinalAnswer::new(
            "# Orchestrator setup runbook\n1. Provision the host\n2. Install the orchestrator",
        )),
        // Checkpoint
        LlmResponse::FinalAnswer(FinalAnswer::new("Both steps verified; runbook generated.")),
    ];
    script.reverse();

    let limits = Limits::default();
    let store = MemoryStore::open(dir.path())?;
    let tracker = Arc::new(LearningTracker::new(store.clone(), limits.learning_append_bytes));
    let searcher = Arc::new(MemorySearcher::new(store));
    let research = Arc::new(ResearchAgent::new(
        Arc::new(NoSearch),
        limits.max_research_queries,
        limits.research_timeout(),
    ));
    let roster = Arc::new(Roster::new(
        Arc::new(CannedLlm {
            script: Mutex::new(script),
        }),
        limits.agent_timeout(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        searcher,
        research,
        Arc::clone(&roster),
        ["infra-notes".to_string()].into_iter().collect(),
        limits.context_ceiling_bytes,
    ));

    let orchestrator = Orchestrator::new(
        "example-session",
        roster,
        dispatcher,
        tracker,
        Arc::new(AutoApprove),
        limits,
        SessionCtl::new("example-session"),
    );

    let outcome = orchestrator
        .run(
            "Set up basic orchestrator infrastructure",
            vec!["infra-notes".to_string()],
        )
        .await;

    println!("\nFinal state: {}", outcome.final_state.as_str());
    if let Some(artefact) = &outcome.artefact {
        println!("\n{}", artefact);
    }
    println!(
        "\nExecution log:\n{}",
        std::fs::read_to_string(entities.join("execution_log.md"))?
    );

    Ok(())
}
