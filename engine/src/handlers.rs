//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: drive one planning session to a terminal state
//! - entities: list addressable entities
//! - lessons: show recent learning-log entries
//! - doctor: validate configuration and the memory store
//!
//! Every handler returns the process exit code; the error taxonomy maps
//! configuration problems to exit code 4 in `main`.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::gates::{AutoApprove, Gatekeeper, StdinGatekeeper};
use crate::learning::LearningTracker;
use crate::llm::HttpProvider;
use crate::memory::{MemorySearcher, MemoryStore};
use crate::orchestrator::{Orchestrator, SessionCtl, SessionState};
use crate::research::{DuckDuckGoProvider, ResearchAgent};
use sdk::errors::{exit_codes, CoreError};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Run one planning session to completion and return its exit code
pub async fn handle_run(
    goal: String,
    entities: Vec<String>,
    max_iterations: Option<u32>,
    auto_approve: bool,
    config: &Config,
    memory_override: Option<&Path>,
    format: OutputFormat,
) -> Result<i32, CoreError> {
    let root = config.resolve_memory_root(memory_override)?;
    let store = MemoryStore::open(&root)?;

    let mut limits = config.limits.clone();
    if let Some(cap) = max_iterations {
        limits.max_iterations = cap.max(1);
    }

    let credential = config.credential()?;
    let llm = Arc::new(HttpProvider::new(config.llm.clone(), credential));

    let tracker = Arc::new(LearningTracker::new(store.clone(), limits.learning_append_bytes));
    let loaded = tracker.warm_from_disk();
    tracing::debug!("warmed {} learning entries from disk", loaded);

    let searcher = Arc::new(MemorySearcher::new(store.clone()));
    let research = Arc::new(ResearchAgent::new(
        Arc::new(DuckDuckGoProvider::new()),
        limits.max_research_queries,
        limits.research_timeout(),
    ));
    let roster = Arc::new(crate::agents::Roster::new(llm, limits.agent_timeout()));
    let dispatcher = Arc::new(Dispatcher::new(
        searcher,
        research,
        Arc::clone(&roster),
        entities.iter().cloned().collect(),
        limits.context_ceiling_bytes,
    ));

    let gatekeeper: Arc<dyn Gatekeeper> = if auto_approve {
        Arc::new(AutoApprove)
    } else {
        Arc::new(StdinGatekeeper)
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let ctl = SessionCtl::new(&session_id);
    let orchestrator = Orchestrator::new(
        session_id.clone(),
        roster,
        dispatcher,
        tracker,
        gatekeeper,
        limits,
        ctl,
    );

    let outcome = orchestrator.run(&goal, entities).await;

    match format {
        OutputFormat::Text => {
            println!();
            match outcome.final_state {
                SessionState::Done => {
                    println!("Session {} finished.", session_id);
                    if let Some(artefact) = &outcome.artefact {
                        println!("\n{}", artefact);
                    }
                }
                _ => {
                    let reason = outcome
                        .abort_reason
                        .map(|r| r.as_str())
                        .unwrap_or("unknown");
                    println!("Session {} aborted ({}).", session_id, reason);
                }
            }
            println!(
                "Iterations: {}  Lessons written: {}",
                outcome.iterations.len(),
                outcome
                    .iterations
                    .iter()
                    .map(|i| i.lessons_written.len())
                    .sum::<usize>()
            );
        }
        OutputFormat::Json => {
            let lessons: Vec<&String> = outcome
                .iterations
                .iter()
                .flat_map(|i| i.lessons_written.iter())
                .collect();
            println!(
                "{}",
                json!({
                    "session_id": session_id,
                    "state": outcome.final_state.as_str(),
                    "abort_reason": outcome.abort_reason.map(|r| r.as_str()),
                    "iterations": outcome.iterations.len(),
                    "artefact": outcome.artefact,
                    "lessons_written": lessons,
                })
            );
        }
    }

    Ok(outcome.exit_code())
}

/// List addressable entities
pub async fn handle_entities(
    config: &Config,
    memory_override: Option<&Path>,
    format: OutputFormat,
) -> Result<i32, CoreError> {
    let root = config.resolve_memory_root(memory_override)?;
    let store = MemoryStore::open(&root)?;
    let names = store
        .list_entities()
        .await
        .map_err(|e| CoreError::IoTransient {
            attempts: 1,
            message: e.to_string(),
        })?;

    match format {
        OutputFormat::Text => {
            if names.is_empty() {
                println!("No entities in {}", root.display());
            } else {
                println!("Entities in {}:", root.display());
                for name in &names {
                    println!("  {}", name);
                }
                println!("{} entities.", names.len());
            }
        }
        OutputFormat::Json => {
            println!("{}", json!({ "root": root, "entities": names }));
        }
    }
    Ok(exit_codes::DONE)
}

/// Show recent learning entries
pub async fn handle_lessons(
    domain: Option<String>,
    limit: usize,
    config: &Config,
    memory_override: Option<&Path>,
    format: OutputFormat,
) -> Result<i32, CoreError> {
    let root = config.resolve_memory_root(memory_override)?;
    let store = MemoryStore::open(&root)?;
    let tracker = LearningTracker::new(store, config.limits.learning_append_bytes);
    tracker.warm_from_disk();

    let entries = match &domain {
        Some(domain) => tracker.recall(domain, limit),
        None => tracker.recent(limit),
    };

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No learning entries recorded yet.");
            } else {
                for entry in &entries {
                    println!(
                        "[{}] {} ({}, iteration {})",
                        match entry.kind {
                            crate::learning::LessonKind::Pattern => "pattern",
                            crate::learning::LessonKind::Error => "error",
                        },
                        entry.summary,
                        entry.domain,
                        entry.iteration
                    );
                }
                println!("{} entries.", entries.len());
            }
        }
        OutputFormat::Json => {
            println!("{}", json!({ "entries": entries }));
        }
    }
    Ok(exit_codes::DONE)
}

/// Diagnose configuration and memory-store health
pub async fn handle_doctor(
    config: &Config,
    memory_override: Option<&Path>,
    format: OutputFormat,
) -> Result<i32, CoreError> {
    let mut checks: Vec<(&str, bool, String)> = Vec::new();

    let root = config.resolve_memory_root(memory_override);
    let root_ok = root.is_ok();
    checks.push((
        "memory_root",
        root_ok,
        match &root {
            Ok(path) => path.display().to_string(),
            Err(e) => e.to_string(),
        },
    ));

    let mut entity_count = 0usize;
    if let Ok(root) = &root {
        match MemoryStore::open(root) {
            Ok(store) => match store.list_entities().await {
                Ok(names) => {
                    entity_count = names.len();
                    checks.push(("entities", true, format!("{} addressable", names.len())));
                }
                Err(e) => checks.push(("entities", false, e.to_string())),
            },
            Err(e) => checks.push(("entities", false, e.to_string())),
        }
    }

    let credential_ok = config.credential().is_ok();
    checks.push((
        "credential",
        credential_ok,
        if credential_ok {
            format!("{} is set", crate::config::CREDENTIAL_ENV)
        } else {
            format!("{} is not set", crate::config::CREDENTIAL_ENV)
        },
    ));

    let all_ok = checks.iter().all(|(_, ok, _)| *ok);

    match format {
        OutputFormat::Text => {
            println!("Loom diagnostics:");
            for (name, ok, detail) in &checks {
                println!("  [{}] {:12} {}", if *ok { "ok" } else { "!!" }, name, detail);
            }
        }
        OutputFormat::Json => {
            let report: Vec<serde_json::Value> = checks
                .iter()
                .map(|(name, ok, detail)| json!({ "check": name, "ok": ok, "detail": detail }))
                .collect();
            println!(
                "{}",
                json!({ "ok": all_ok, "entity_count": entity_count, "checks": report })
            );
        }
    }

    Ok(if all_ok {
        exit_codes::DONE
    } else {
        exit_codes::CONFIG_ERROR
    })
}
