//! Roster invocation
//!
//! One entry point for all six roles. Each invocation runs a short
//! tool-call loop against the driving model (memory search and research are
//! the only tools agents may use mid-call; agent-to-agent calls are the
//! orchestrator's business), then parses and validates the role envelope.

use crate::agents::envelopes;
use crate::dispatch::{CallLedger, ToolHandler};
use crate::llm::{LlmProvider, LlmResponse, Message};
use sdk::types::{AgentResult, AgentRole, AgentStatus};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tool-call rounds allowed inside a single agent invocation
const MAX_TOOL_ROUNDS: usize = 6;

/// Access to the dispatcher granted for one invocation
pub struct ToolAccess<'a> {
    pub handler: &'a dyn ToolHandler,
    pub ledger: &'a CallLedger,
}

/// Arguments for one roster invocation
pub struct InvokeArgs<'a> {
    pub role: AgentRole,
    pub inputs: &'a serde_json::Value,
    /// Rendered context bundle (already size-bounded by the assembler)
    pub bundle: &'a str,
    pub iteration: u32,
    pub selected: &'a BTreeSet<String>,
    pub tools: Option<ToolAccess<'a>>,
}

/// The six role-specialised callers behind one contract
pub struct Roster {
    llm: Arc<dyn LlmProvider>,
    call_timeout: Duration,
}

impl Roster {
    pub fn new(llm: Arc<dyn LlmProvider>, call_timeout: Duration) -> Self {
        Self { llm, call_timeout }
    }

    /// Invoke a role. Never returns `Err`: transport failures, timeouts and
    /// malformed envelopes all map onto the `AgentStatus` taxonomy so the
    /// orchestrator can retry or degrade.
    pub async fn invoke(&self, args: InvokeArgs<'_>) -> AgentResult {
        let start = Instant::now();
        let role = args.role;

        let mut messages = vec![
            Message::system(role_system_prompt(role, args.tools.is_some())),
            Message::user(format!(
                "Inputs:\n{}\n\nContext:\n{}",
                args.inputs, args.bundle
            )),
        ];

        for round in 0..MAX_TOOL_ROUNDS {
            debug!("{} round {}/{}", role, round + 1, MAX_TOOL_ROUNDS);

            let response =
                match tokio::time::timeout(self.call_timeout, self.llm.generate(&messages)).await
                {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        warn!("{} call failed: {}", role, e);
                        return self.failed(args, AgentStatus::RetryableFail, e.to_string(), start);
                    }
                    Err(_) => {
                        warn!("{} call timed out after {:?}", role, self.call_timeout);
                        return self.failed(
                            args,
                            AgentStatus::RetryableFail,
                            format!("timed out after {}s", self.call_timeout.as_secs()),
                            start,
                        );
                    }
                };

            match response {
                LlmResponse::ToolCall(tool_call) => {
                    messages.push(Message::assistant(
                        json!({"tool": tool_call.name, "arguments":
                            serde_json::from_str::<serde_json::Value>(&tool_call.arguments)
                                .unwrap_or_default()})
                        .to_string(),
                    ));

                    let result_text = match &args.tools {
                        Some(access) => {
                            info!("{} calling tool {}", role, tool_call.name);
                            access
                                .handler
                                .execute(access.ledger, &tool_call, args.iteration)
                                .await
                                .encode()
                        }
                        None => sdk::types::ToolResult::error(
                            &tool_call.name,
                            "dispatch_invalid_tool",
                            "no tools are available to this role; answer directly",
                        )
                        .encode(),
                    };
                    messages.push(Message::tool_result(result_text, &tool_call.id));
                }
                LlmResponse::FinalAnswer(answer) => {
                    return match self.parse_envelope(&args, &answer.content) {
                        Ok(content) => {
                            info!(
                                "{} completed in {:.1}s after {} rounds",
                                role,
                                start.elapsed().as_secs_f64(),
                                round + 1
                            );
                            AgentResult::ok(
                                role,
                                content,
                                start.elapsed().as_millis() as u64,
                                args.iteration,
                            )
                        }
                        Err(message) => {
                            warn!("{} envelope rejected: {}", role, message);
                            self.failed(args, AgentStatus::RetryableFail, message, start)
                        }
                    };
                }
            }
        }

        self.failed(
            args,
            AgentStatus::RetryableFail,
            format!("no final answer within {} tool rounds", MAX_TOOL_ROUNDS),
            start,
        )
    }

    /// Parse and validate the role-specific envelope
    fn parse_envelope(
        &self,
        args: &InvokeArgs<'_>,
        text: &str,
    ) -> Result<serde_json::Value, String> {
        match args.role {
            AgentRole::Proposer => {
                let proposal = envelopes::parse_proposal(text)?;
                envelopes::validate_proposal(&proposal, args.selected)?;
                serde_json::to_value(proposal).map_err(|e| e.to_string())
            }
            AgentRole::Planner => {
                let plan = envelopes::parse_plan(text)?;
                serde_json::to_value(plan).map_err(|e| e.to_string())
            }
            AgentRole::Executor => {
                let execution = envelopes::parse_execution(text)?;
                let expected = expected_step_ids(args.inputs);
                envelopes::validate_execution(&execution, &expected)?;
                serde_json::to_value(execution).map_err(|e| e.to_string())
            }
            AgentRole::Verifier => {
                let verification = envelopes::parse_verification(text)?;
                serde_json::to_value(verification).map_err(|e| e.to_string())
            }
            AgentRole::Generator => {
                if text.trim().is_empty() {
                    return Err("generator produced no artefact".to_string());
                }
                Ok(json!({ "artefact": text.trim() }))
            }
            AgentRole::Checkpoint => {
                if text.trim().is_empty() {
                    return Err("checkpoint produced no summary".to_string());
                }
                Ok(json!({ "summary": text.trim() }))
            }
        }
    }

    fn failed(
        &self,
        args: InvokeArgs<'_>,
        status: AgentStatus,
        message: String,
        start: Instant,
    ) -> AgentResult {
        AgentResult::failed(
            args.role,
            status,
            message,
            start.elapsed().as_millis() as u64,
            args.iteration,
        )
    }
}

/// Step ids the executor must echo, read from the plan in its inputs
fn expected_step_ids(inputs: &serde_json::Value) -> Vec<String> {
    inputs
        .get("plan")
        .and_then(|p| p.get("steps"))
        .and_then(|s| s.as_array())
        .map(|steps| {
            steps
                .iter()
                .filter_map(|s| s.get("id").and_then(|id| id.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// System prompt fixing each role's output envelope
fn role_system_prompt(role: AgentRole, has_tools: bool) -> String {
    let contract = match role {
        AgentRole::Proposer => {
            "You are the Proposer. Produce a proposal for the user's goal.\n\
             Output ONLY a JSON object:\n\
             {\"scope\": str, \"assumptions\": [str], \"risks\": [str], \"required_entities\": [str]}\n\
             required_entities may only name entities listed in the context."
        }
        AgentRole::Planner => {
            "You are the Planner. Break the approved proposal into ordered steps.\n\
             Output ONLY a JSON array of steps, each:\n\
             {\"id\": str, \"intent\": str, \"inputs\": obj, \"expected_output\": str}"
        }
        AgentRole::Executor => {
            "You are the Executor. Elaborate every plan step into executable detail.\n\
             Keep step ids and their order exactly as planned.\n\
             Output ONLY a JSON object: {\"steps\": [{\"id\": str, \"intent\": str, \"actions\": [str], \"output\": str}]}"
        }
        AgentRole::Verifier => {
            "You are the Verifier. Check the execution against the plan.\n\
             Output ONLY a JSON object:\n\
             {\"verdict\": \"pass\"|\"fail\", \"issues\": [{\"severity\": \"info\"|\"warn\"|\"block\", \"message\": str, \"step_ids\": [str]}]}"
        }
        AgentRole::Generator => {
            "You are the Generator. Synthesise the final user-facing artefact from\n\
             the verified plan and execution. Respond with the artefact as plain text."
        }
        AgentRole::Checkpoint => {
            "You are the Checkpoint summariser. Summarise this iteration's plan,\n\
             execution and verification for user review. Respond with plain text."
        }
    };

    if has_tools {
        format!(
            "{}\n\nYou may call tools before answering. To call one, respond with ONLY:\n\
             {{\"tool\": \"search_memory\"|\"research\", \"arguments\": {{...}}}}\n\
             search_memory arguments: {{\"entities\": [str], \"query\": str}}\n\
             research arguments: {{\"topic\": str, \"max_queries\": int}}\n\
             Search memory before researching.",
            contract
        )
    } else {
        contract.to_string()
    }
}
