//! HTTP chat-completions provider
//!
//! Thin client for any OpenAI-compatible chat endpoint. Authentication is a
//! single bearer credential read once at construction; the engine never
//! stores it anywhere else.

use super::{FinalAnswer, LlmError, LlmProvider, LlmResponse, Message};
use crate::config::LlmConfig;
use async_trait::async_trait;
use serde_json::json;

pub struct HttpProvider {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Self {
        Self {
            config,
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn check_health(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(&self, messages: &[Message]) -> super::Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let payload = json!({
            "model": self.config.model,
            "messages": api_messages,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return if status.as_u16() == 401 || status.as_u16() == 403 {
                Err(LlmError::AuthenticationFailed(text))
            } else {
                Err(LlmError::InvalidRequest(text))
            };
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::ParseError("no content in response".to_string()))?;

        if let Some(tool_call) = super::parse_tool_call(content) {
            return Ok(LlmResponse::ToolCall(tool_call));
        }
        Ok(LlmResponse::FinalAnswer(FinalAnswer::new(content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> HttpProvider {
        HttpProvider::new(
            LlmConfig {
                base_url: server.uri(),
                model: "test-model".to_string(),
            },
            "test-key",
        )
    }

    #[tokio::test]
    async fn test_final_answer_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "All done."}}]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider.generate(&[Message::user("hi")]).await.unwrap();
        match response {
            LlmResponse::FinalAnswer(answer) => assert_eq!(answer.content, "All done."),
            LlmResponse::ToolCall(_) => panic!("expected final answer"),
        }
    }

    #[tokio::test]
    async fn test_tool_call_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant",
                    "content": "{\"tool\": \"search_memory\", \"arguments\": {\"query\": \"q\"}}"}}]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider.generate(&[Message::user("hi")]).await.unwrap();
        match response {
            LlmResponse::ToolCall(tc) => assert_eq!(tc.name, "search_memory"),
            LlmResponse::FinalAnswer(_) => panic!("expected tool call"),
        }
    }

    #[tokio::test]
    async fn test_auth_failure_maps_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider.generate(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed(_)));
    }
}
