//! Tool dispatch
//!
//! The driving model selects tools by name; this module routes those calls
//! to the memory searcher, the research agent, and the agent roster. The
//! registry is a fixed table of name → argument spec, so unknown names and
//! missing fields become ordinary error results the model can read and
//! correct; nothing here raises through the orchestrator loop.
//!
//! Two rules are enforced at dispatch time:
//! - **memory-first**: `research` is rejected until a `search_memory` call
//!   has happened in the same iteration (tracked by the per-iteration
//!   ledger; research calls never outnumber memory searches).
//! - **entity constraint**: entity arguments are silently filtered to the
//!   session's selected set, with a warning recorded in the result.

use crate::agents::roster::{InvokeArgs, ToolAccess};
use crate::agents::Roster;
use crate::llm::ToolCall;
use crate::memory::MemorySearcher;
use crate::research::ResearchAgent;
use async_trait::async_trait;
use sdk::types::{AgentRole, ToolOutcome, ToolResult};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Byte ceiling for a serialised tool payload
pub const DEFAULT_PAYLOAD_CEILING: usize = 32 * 1024;

/// Argument specification for one registered tool
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

/// The fixed tool registry. Wire names are a stable contract.
pub const REGISTRY: &[ToolSpec] = &[
    ToolSpec {
        name: "search_memory",
        required: &["entities", "query"],
        optional: &[],
    },
    ToolSpec {
        name: "research",
        required: &["topic"],
        optional: &["max_queries"],
    },
    ToolSpec {
        name: "call_planner",
        required: &["inputs", "iteration"],
        optional: &[],
    },
    ToolSpec {
        name: "call_executor",
        required: &["inputs", "iteration"],
        optional: &[],
    },
    ToolSpec {
        name: "call_verifier",
        required: &["inputs", "iteration"],
        optional: &[],
    },
    ToolSpec {
        name: "call_generator",
        required: &["inputs", "iteration"],
        optional: &[],
    },
];

/// Look up a tool spec by wire name
pub fn lookup(name: &str) -> Option<&'static ToolSpec> {
    REGISTRY.iter().find(|spec| spec.name == name)
}

/// Per-iteration call ledger
///
/// Counts accepted calls to enforce the per-iteration cap and the
/// memory-first ordering. Interior mutability keeps it shareable across the
/// roster's tool rounds without locks.
#[derive(Debug)]
pub struct CallLedger {
    searches: AtomicU32,
    researches: AtomicU32,
    research_queries: AtomicU32,
    total: AtomicU32,
    cap: u32,
}

impl CallLedger {
    pub fn new(cap: u32) -> Self {
        Self {
            searches: AtomicU32::new(0),
            researches: AtomicU32::new(0),
            research_queries: AtomicU32::new(0),
            total: AtomicU32::new(0),
            cap,
        }
    }

    /// Reserve a call slot; false when the iteration cap is spent
    fn begin_call(&self) -> bool {
        let before = self.total.fetch_add(1, Ordering::SeqCst);
        before < self.cap
    }

    fn note_search(&self) {
        self.searches.fetch_add(1, Ordering::SeqCst);
    }

    fn note_research(&self) {
        self.researches.fetch_add(1, Ordering::SeqCst);
    }

    fn note_research_queries(&self, count: u32) {
        self.research_queries.fetch_add(count, Ordering::SeqCst);
    }

    fn research_queries_used(&self) -> u32 {
        self.research_queries.load(Ordering::SeqCst)
    }

    /// Memory-first rule: research calls stay below memory searches
    fn research_allowed(&self) -> bool {
        self.researches.load(Ordering::SeqCst) < self.searches.load(Ordering::SeqCst)
    }

    pub fn search_count(&self) -> u32 {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn research_count(&self) -> u32 {
        self.researches.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }
}

/// Tool execution surface handed to agents during their invocation.
///
/// Only the data tools are reachable through this path; agent-to-agent
/// calls are rejected so a roster call can never recurse into the roster.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, ledger: &CallLedger, call: &ToolCall, iteration: u32) -> ToolResult;
}

/// Routes validated tool calls to the owning component
pub struct Dispatcher {
    searcher: Arc<MemorySearcher>,
    research: Arc<ResearchAgent>,
    roster: Arc<Roster>,
    selected: BTreeSet<String>,
    payload_ceiling: usize,
}

impl Dispatcher {
    pub fn new(
        searcher: Arc<MemorySearcher>,
        research: Arc<ResearchAgent>,
        roster: Arc<Roster>,
        selected: BTreeSet<String>,
        payload_ceiling: usize,
    ) -> Self {
        Self {
            searcher,
            research,
            roster,
            selected,
            payload_ceiling,
        }
    }

    /// The session's selected entity set
    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    /// Dispatch one tool call against the full registry.
    ///
    /// Every outcome is a `ToolResult`; errors are data, not panics.
    pub async fn dispatch(
        &self,
        ledger: &CallLedger,
        call: &ToolCall,
        iteration: u32,
    ) -> ToolResult {
        debug!("dispatching {} (iteration {})", call.name, iteration);

        let Some(spec) = lookup(&call.name) else {
            warn!("unknown tool requested: {}", call.name);
            let known: Vec<&str> = REGISTRY.iter().map(|s| s.name).collect();
            return ToolResult::error(
                &call.name,
                "dispatch_invalid_tool",
                format!("unknown tool '{}'; available: {}", call.name, known.join(", ")),
            );
        };

        if !ledger.begin_call() {
            return ToolResult::error(
                &call.name,
                "cap_exceeded",
                format!("tool-call cap reached for this iteration ({})", ledger.cap),
            );
        }

        let args: Value = match serde_json::from_str(&call.arguments) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) | Err(_) => {
                return ToolResult::error(
                    &call.name,
                    "dispatch_missing_arguments",
                    "arguments must be a JSON object",
                );
            }
        };

        let missing: Vec<String> = spec
            .required
            .iter()
            .filter(|field| args.get(**field).is_none())
            .map(|field| field.to_string())
            .collect();
        if !missing.is_empty() {
            return ToolResult::error(
                &call.name,
                "dispatch_missing_arguments",
                format!("missing required fields: {}", missing.join(", ")),
            );
        }

        let mut result = match call.name.as_str() {
            "search_memory" => self.run_search(ledger, &args).await,
            "research" => self.run_research(ledger, &args).await,
            "call_planner" => self.run_agent(AgentRole::Planner, ledger, &args).await,
            "call_executor" => self.run_agent(AgentRole::Executor, ledger, &args).await,
            "call_verifier" => self.run_agent(AgentRole::Verifier, ledger, &args).await,
            "call_generator" => self.run_agent(AgentRole::Generator, ledger, &args).await,
            _ => unreachable!("registry and router disagree on {}", call.name),
        };

        self.truncate_payload(&mut result);
        result
    }

    async fn run_search(&self, ledger: &CallLedger, args: &Value) -> ToolResult {
        let Some(raw_entities) = args["entities"].as_array() else {
            return ToolResult::error(
                "search_memory",
                "dispatch_missing_arguments",
                "entities must be an array of strings",
            );
        };
        let Some(query) = args["query"].as_str() else {
            return ToolResult::error(
                "search_memory",
                "dispatch_missing_arguments",
                "query must be a string",
            );
        };

        let requested: Vec<String> = raw_entities
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect();
        let (allowed, filtered): (Vec<String>, Vec<String>) = requested
            .into_iter()
            .partition(|name| self.selected.contains(name));

        ledger.note_search();
        let report = self.searcher.search(&allowed, query).await;

        let mut result = match serde_json::to_value(&report) {
            Ok(payload) => ToolResult::ok("search_memory", payload),
            Err(e) => ToolResult::error("search_memory", "internal", e.to_string()),
        };
        if !filtered.is_empty() {
            result = result.with_warning(format!(
                "filtered {} entities outside the selected set: {}",
                filtered.len(),
                filtered.join(", ")
            ));
        }
        result
    }

    async fn run_research(&self, ledger: &CallLedger, args: &Value) -> ToolResult {
        if !ledger.research_allowed() {
            return ToolResult::error(
                "research",
                "constraint_violation",
                "memory-first: call search_memory before research in this iteration",
            );
        }
        let Some(topic) = args["topic"].as_str() else {
            return ToolResult::error(
                "research",
                "dispatch_missing_arguments",
                "topic must be a string",
            );
        };

        // The query budget holds for the whole iteration, not per call
        let budget_left = self
            .research
            .query_budget()
            .saturating_sub(ledger.research_queries_used());
        if budget_left == 0 {
            return ToolResult::error(
                "research",
                "cap_exceeded",
                "research query budget for this iteration is spent",
            );
        }
        let max_queries = args
            .get("max_queries")
            .and_then(|v| v.as_u64())
            .map(|v| (v as u32).min(budget_left))
            .or(Some(budget_left));

        ledger.note_research();
        let report = self.research.research(topic, max_queries).await;
        ledger.note_research_queries(report.total_searches);
        match serde_json::to_value(&report) {
            Ok(payload) => ToolResult::ok("research", payload),
            Err(e) => ToolResult::error("research", "internal", e.to_string()),
        }
    }

    async fn run_agent(&self, role: AgentRole, ledger: &CallLedger, args: &Value) -> ToolResult {
        let name = format!("call_{}", role.as_str());
        let Some(iteration) = args["iteration"].as_u64() else {
            return ToolResult::error(
                &name,
                "dispatch_missing_arguments",
                "iteration must be an integer",
            );
        };
        let inputs = args["inputs"].clone();
        if !inputs.is_object() {
            return ToolResult::error(
                &name,
                "dispatch_missing_arguments",
                "inputs must be an object",
            );
        }
        let bundle = args
            .get("inputs")
            .and_then(|i| i.get("context"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        let agent_result = self
            .roster
            .invoke(InvokeArgs {
                role,
                inputs: &inputs,
                bundle: &bundle,
                iteration: iteration as u32,
                selected: &self.selected,
                tools: Some(ToolAccess {
                    handler: self,
                    ledger,
                }),
            })
            .await;

        match serde_json::to_value(&agent_result) {
            Ok(payload) => ToolResult::ok(name, payload),
            Err(e) => ToolResult::error(name, "internal", e.to_string()),
        }
    }

    /// Replace an oversized payload with a bounded preview plus marker
    fn truncate_payload(&self, result: &mut ToolResult) {
        let ToolOutcome::Ok { payload } = &result.outcome else {
            return;
        };
        let text = payload.to_string();
        if text.len() <= self.payload_ceiling {
            return;
        }

        let mut cut = self.payload_ceiling;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        result.outcome = ToolOutcome::Ok {
            payload: json!({ "preview": &text[..cut] }),
        };
        result.truncated = true;
    }
}

#[async_trait]
impl ToolHandler for Dispatcher {
    /// Data-tool path used inside agent invocations. Agent-to-agent calls
    /// are rejected here; only the orchestrator issues those.
    async fn execute(&self, ledger: &CallLedger, call: &ToolCall, _iteration: u32) -> ToolResult {
        match call.name.as_str() {
            "search_memory" | "research" => self.dispatch(ledger, call, _iteration).await,
            _ => ToolResult::error(
                &call.name,
                "constraint_violation",
                "agent calls cannot be issued from inside an agent",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FinalAnswer, LlmProvider, LlmResponse, Message};
    use crate::memory::store::ENTITIES_DIR;
    use crate::memory::MemoryStore;
    use crate::research::{SearchHit, SearchProvider};
    use std::time::Duration;
    use tempfile::TempDir;

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

    struct OneAnswerProvider(String);

    #[async_trait]
    impl LlmProvider for OneAnswerProvider {
        fn name(&self) -> &str {
            "one"
        }
        async fn generate(&self, _m: &[Message]) -> crate::llm::Result<LlmResponse> {
            Ok(LlmResponse::FinalAnswer(FinalAnswer::new(self.0.clone())))
        }
    }

    async fn dispatcher_with(
        entities: &[(&str, &str)],
        selected: &[&str],
        answer: &str,
        ceiling: usize,
    ) -> (TempDir, Dispatcher) {
        let dir = TempDir::new().unwrap();
        let entities_dir = dir.path().join(ENTITIES_DIR);
        tokio::fs::create_dir_all(&entities_dir).await.unwrap();
        for (name, body) in entities {
            tokio::fs::write(entities_dir.join(format!("{}.md", name)), body)
                .await
                .unwrap();
        }

        let searcher = Arc::new(MemorySearcher::new(MemoryStore::open(dir.path()).unwrap()));
        let research = Arc::new(ResearchAgent::new(
            Arc::new(OfflineSearch),
            8,
            Duration::from_secs(20),
        ));
        let roster = Arc::new(Roster::new(
            Arc::new(OneAnswerProvider(answer.to_string())),
            Duration::from_secs(120),
        ));

        let dispatcher = Dispatcher::new(
            searcher,
            research,
            roster,
            selected.iter().map(|s| s.to_string()).collect(),
            ceiling,
        );
        (dir, dispatcher)
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall::new("c1", name, arguments.to_string())
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let (_dir, dispatcher) =
            dispatcher_with(&[], &[], "", DEFAULT_PAYLOAD_CEILING).await;
        let ledger = CallLedger::new(40);

        let result = dispatcher
            .dispatch(&ledger, &call("summon_demon", json!({})), 1)
            .await;
        match result.outcome {
            ToolOutcome::Error { kind, .. } => assert_eq!(kind, "dispatch_invalid_tool"),
            ToolOutcome::Ok { .. } => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn test_missing_fields_are_listed() {
        let (_dir, dispatcher) =
            dispatcher_with(&[], &[], "", DEFAULT_PAYLOAD_CEILING).await;
        let ledger = CallLedger::new(40);

        let result = dispatcher
            .dispatch(&ledger, &call("search_memory", json!({})), 1)
            .await;
        match result.outcome {
            ToolOutcome::Error { kind, message } => {
                assert_eq!(kind, "dispatch_missing_arguments");
                assert!(message.contains("entities"));
                assert!(message.contains("query"));
            }
            ToolOutcome::Ok { .. } => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn test_memory_first_rule() {
        let (_dir, dispatcher) =
            dispatcher_with(&[("a", "text")], &["a"], "", DEFAULT_PAYLOAD_CEILING).await;
        let ledger = CallLedger::new(40);

        // research before any search_memory is a constraint violation
        let early = dispatcher
            .dispatch(&ledger, &call("research", json!({"topic": "x"})), 1)
            .await;
        assert!(matches!(
            early.outcome,
            ToolOutcome::Error { ref kind, .. } if kind == "constraint_violation"
        ));

        // search then research succeeds (offline provider → sentinel report)
        let search = dispatcher
            .dispatch(
                &ledger,
                &call("search_memory", json!({"entities": ["a"], "query": "text"})),
                1,
            )
            .await;
        assert!(matches!(search.outcome, ToolOutcome::Ok { .. }));

        let late = dispatcher
            .dispatch(&ledger, &call("research", json!({"topic": "x"})), 1)
            .await;
        match late.outcome {
            ToolOutcome::Ok { payload } => assert_eq!(payload["offline"], true),
            ToolOutcome::Error { .. } => panic!("expected research to run"),
        }

        // the rule is a running ratio, not a one-shot flag
        let again = dispatcher
            .dispatch(&ledger, &call("research", json!({"topic": "y"})), 1)
            .await;
        assert!(matches!(
            again.outcome,
            ToolOutcome::Error { ref kind, .. } if kind == "constraint_violation"
        ));
    }

    struct AlwaysOnlineSearch;

    #[async_trait]
    impl SearchProvider for AlwaysOnlineSearch {
        fn name(&self) -> &str {
            "online"
        }
        async fn search(&self, query: &str, _m: u32) -> anyhow::Result<Vec<SearchHit>> {
            Ok(vec![SearchHit {
                title: query.to_string(),
                url: format!("https://example.test/{}", query.replace(' ', "-")),
                snippet: "snippet".to_string(),
                source: "online".to_string(),
            }])
        }
        async fn probe(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_research_query_budget_spans_the_iteration() {
        let dir = TempDir::new().unwrap();
        let entities_dir = dir.path().join(ENTITIES_DIR);
        tokio::fs::create_dir_all(&entities_dir).await.unwrap();
        tokio::fs::write(entities_dir.join("a.md"), "alpha").await.unwrap();

        let searcher = Arc::new(MemorySearcher::new(MemoryStore::open(dir.path()).unwrap()));
        let research = Arc::new(ResearchAgent::new(
            Arc::new(AlwaysOnlineSearch),
            4,
            Duration::from_secs(20),
        ));
        let roster = Arc::new(Roster::new(
            Arc::new(OneAnswerProvider(String::new())),
            Duration::from_secs(120),
        ));
        let dispatcher = Dispatcher::new(
            searcher,
            research,
            roster,
            ["a".to_string()].into_iter().collect(),
            DEFAULT_PAYLOAD_CEILING,
        );
        let ledger = CallLedger::new(40);

        let search_args = json!({"entities": ["a"], "query": "alpha"});

        // First pass spends the whole 4-query budget
        dispatcher
            .dispatch(&ledger, &call("search_memory", search_args.clone()), 1)
            .await;
        let first = dispatcher
            .dispatch(&ledger, &call("research", json!({"topic": "alpha"})), 1)
            .await;
        match first.outcome {
            ToolOutcome::Ok { ref payload } => {
                assert_eq!(payload["total_searches"], 4);
            }
            ToolOutcome::Error { .. } => panic!("expected first research to run"),
        }

        // A second research in the same iteration finds the budget spent,
        // even after another memory search
        dispatcher
            .dispatch(&ledger, &call("search_memory", search_args), 1)
            .await;
        let second = dispatcher
            .dispatch(&ledger, &call("research", json!({"topic": "beta"})), 1)
            .await;
        assert!(matches!(
            second.outcome,
            ToolOutcome::Error { ref kind, .. } if kind == "cap_exceeded"
        ));
    }

    #[tokio::test]
    async fn test_entity_filtering_warns() {
        let (_dir, dispatcher) = dispatcher_with(
            &[("inside", "alpha"), ("outside", "alpha")],
            &["inside"],
            "",
            DEFAULT_PAYLOAD_CEILING,
        )
        .await;
        let ledger = CallLedger::new(40);

        let result = dispatcher
            .dispatch(
                &ledger,
                &call(
                    "search_memory",
                    json!({"entities": ["inside", "outside"], "query": "alpha"}),
                ),
                1,
            )
            .await;

        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("outside"));
        match result.outcome {
            ToolOutcome::Ok { payload } => {
                // only the selected entity was consulted
                assert!(payload["per_entity"].get("inside").is_some());
                assert!(payload["per_entity"].get("outside").is_none());
            }
            ToolOutcome::Error { .. } => panic!("expected ok"),
        }
    }

    #[tokio::test]
    async fn test_call_cap() {
        let (_dir, dispatcher) =
            dispatcher_with(&[("a", "x")], &["a"], "", DEFAULT_PAYLOAD_CEILING).await;
        let ledger = CallLedger::new(2);

        let args = json!({"entities": ["a"], "query": "x"});
        for _ in 0..2 {
            let ok = dispatcher
                .dispatch(&ledger, &call("search_memory", args.clone()), 1)
                .await;
            assert!(matches!(ok.outcome, ToolOutcome::Ok { .. }));
        }
        let over = dispatcher
            .dispatch(&ledger, &call("search_memory", args), 1)
            .await;
        assert!(matches!(
            over.outcome,
            ToolOutcome::Error { ref kind, .. } if kind == "cap_exceeded"
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_truncated_with_marker() {
        let big_body = "lorem ipsum dolor ".repeat(4000); // ~72 KiB
        let (_dir, dispatcher) = dispatcher_with(&[("big", &big_body)], &["big"], "", 1024).await;
        let ledger = CallLedger::new(40);

        let result = dispatcher
            .dispatch(
                &ledger,
                &call("search_memory", json!({"entities": ["big"], "query": "lorem"})),
                1,
            )
            .await;

        assert!(result.truncated);
        assert!(result.encode().contains(r#""truncated":true"#));
    }

    #[tokio::test]
    async fn test_call_planner_routes_to_roster() {
        let (_dir, dispatcher) = dispatcher_with(
            &[],
            &[],
            r#"[{"id": "s1", "intent": "do it", "expected_output": "done"}]"#,
            DEFAULT_PAYLOAD_CEILING,
        )
        .await;
        let ledger = CallLedger::new(40);

        let result = dispatcher
            .dispatch(
                &ledger,
                &call("call_planner", json!({"inputs": {"goal": "g"}, "iteration": 1})),
                1,
            )
            .await;

        match result.outcome {
            ToolOutcome::Ok { payload } => {
                assert_eq!(payload["status"], "ok");
                assert_eq!(payload["content"]["steps"][0]["id"], "s1");
            }
            ToolOutcome::Error { .. } => panic!("expected ok"),
        }
    }

    #[tokio::test]
    async fn test_repeated_searches_are_identical() {
        let (_dir, dispatcher) =
            dispatcher_with(&[("a", "alpha beta")], &["a"], "", DEFAULT_PAYLOAD_CEILING).await;
        let ledger = CallLedger::new(40);

        let args = json!({"entities": ["a"], "query": "alpha"});
        let first = dispatcher
            .dispatch(&ledger, &call("search_memory", args.clone()), 1)
            .await;
        let second = dispatcher
            .dispatch(&ledger, &call("search_memory", args), 1)
            .await;
        assert_eq!(first.encode(), second.encode());
    }
}
