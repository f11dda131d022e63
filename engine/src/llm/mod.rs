//! LM transport seam
//!
//! The raw language-model client is an external collaborator; this module
//! fixes the contract the rest of the engine sees. The `LlmProvider` trait
//! hides transport details (the implementation may stream internally);
//! callers always receive a completed `LlmResponse`. Also home to the
//! tolerant tool-call parsing used on raw model output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod http;

pub use http::HttpProvider;

/// Result type for LM operations
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur during LM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: String,

    /// Tool call ID, present on tool result messages only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// Create a new tool result message
    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Completed response from the driving model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmResponse {
    /// The model selected a tool by name
    ToolCall(ToolCall),

    /// The model produced its final answer for this turn
    FinalAnswer(FinalAnswer),
}

/// Tool call request from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,

    /// Wire name of the tool
    pub name: String,

    /// Arguments as a JSON text
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Final answer from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    /// The answer content
    pub content: String,
}

impl FinalAnswer {
    /// Create a new final answer
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// LM provider contract
///
/// Implementations may stream internally; `generate` resolves only once the
/// full response is assembled.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Generate a response for the given conversation
    async fn generate(&self, messages: &[Message]) -> Result<LlmResponse>;

    /// Cheap availability check; default is optimistic
    async fn check_health(&self) -> bool {
        true
    }
}

/// Parse a tool call out of raw model text.
///
/// Models drift between output shapes; all of these are accepted:
/// 1. Raw JSON: `{"tool": "...", "arguments": {...}}`
/// 2. The same object inside a markdown code fence, with or without
///    trailing prose
/// 3. The object embedded mid-prose; scans for `{"tool"` and takes the
///    balanced braces from there
///
/// Anything else is treated as a final answer by the caller.
pub fn parse_tool_call(content: &str) -> Option<ToolCall> {
    let trimmed = content.trim();

    if let Some(tc) = try_parse_tool_json(trimmed) {
        return Some(tc);
    }

    if let Some(inner) = extract_fenced_block(trimmed) {
        if let Some(tc) = try_parse_tool_json(inner.trim()) {
            return Some(tc);
        }
    }

    if let Some(pos) = trimmed.find("{\"tool\"") {
        if let Some(json_str) = extract_balanced_object(&trimmed[pos..]) {
            if let Some(tc) = try_parse_tool_json(json_str) {
                return Some(tc);
            }
        }
    }

    None
}

/// Try to parse a string as a `{"tool": "...", "arguments": {...}}` call
fn try_parse_tool_json(s: &str) -> Option<ToolCall> {
    let json: serde_json::Value = serde_json::from_str(s).ok()?;
    let tool = json.get("tool")?.as_str()?;
    let arguments = json.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));
    Some(ToolCall::new(
        format!("call_{}", uuid::Uuid::new_v4()),
        tool,
        arguments.to_string(),
    ))
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing fence.
fn extract_fenced_block(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the matching
/// close brace.
fn extract_balanced_object(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.tool_call_id, None);

        let tool_msg = Message::tool_result("result", "call_123");
        assert_eq!(tool_msg.role, MessageRole::Tool);
        assert_eq!(tool_msg.tool_call_id, Some("call_123".to_string()));
    }

    #[test]
    fn test_parse_raw_tool_json() {
        let content = r#"{"tool": "search_memory", "arguments": {"entities": ["a"], "query": "vat"}}"#;
        let tc = parse_tool_call(content).unwrap();
        assert_eq!(tc.name, "search_memory");
        let args: serde_json::Value = serde_json::from_str(&tc.arguments).unwrap();
        assert_eq!(args["query"], "vat");
    }

    #[test]
    fn test_parse_fenced_tool_json_with_trailing_prose() {
        let content = "Sure, I'll search first.\n```json\n{\"tool\": \"research\", \"arguments\": {\"topic\": \"vat rates\"}}\n```\nLet me know.";
        let tc = parse_tool_call(content).unwrap();
        assert_eq!(tc.name, "research");
    }

    #[test]
    fn test_parse_embedded_tool_json() {
        let content = r#"I think the right move is {"tool": "call_planner", "arguments": {"iteration": 1}} here."#;
        let tc = parse_tool_call(content).unwrap();
        assert_eq!(tc.name, "call_planner");
    }

    #[test]
    fn test_parse_missing_arguments_defaults_to_empty_object() {
        let tc = parse_tool_call(r#"{"tool": "search_memory"}"#).unwrap();
        let args: serde_json::Value = serde_json::from_str(&tc.arguments).unwrap();
        assert!(args.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_prose_is_not_a_tool_call() {
        assert!(parse_tool_call("The plan looks complete to me.").is_none());
        assert!(parse_tool_call("{\"verdict\": \"pass\"}").is_none());
    }

    #[test]
    fn test_balanced_object_respects_strings() {
        let s = r#"{"tool": "x", "arguments": {"q": "brace } in string"}} trailing"#;
        let extracted = extract_balanced_object(s).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(extracted).is_ok());
    }

    #[test]
    fn test_llm_response_serialization() {
        let tool_call = LlmResponse::ToolCall(ToolCall::new("id", "name", "{}"));
        let json = serde_json::to_string(&tool_call).unwrap();
        assert!(json.contains(r#""type":"tool_call"#));

        let final_answer = LlmResponse::FinalAnswer(FinalAnswer::new("answer"));
        let json = serde_json::to_string(&final_answer).unwrap();
        assert!(json.contains(r#""type":"final_answer"#));
    }
}
