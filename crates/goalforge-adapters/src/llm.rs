//! Language model collaborator.
//!
//! The response text is returned untouched; callers own all parsing.

use crate::http::ApiClient;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerateRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
            max_tokens: 4096,
            temperature: 0.2,
        }
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Content of the first system message.
    pub fn system_prompt(&self) -> &str {
        self.messages
            .iter()
            .find(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }

    /// Content of the last user message.
    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    api: ApiClient,
}

impl HttpLlmClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

/// Pull the generated text out of `{response}` or `{content}`.
fn response_text(body: &Value) -> Option<String> {
    ["response", "content"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let url = self.api.endpoint(["llm", "generate"])?;
        let body = serde_json::to_value(&request)?;
        let response = self.api.post(url, &body).await?;
        if !response.is_success() {
            return Err(response.error_for("LLM generate"));
        }
        let text = response_text(&response.json_or_null())
            .ok_or_else(|| anyhow!("LLM response had neither `response` nor `content` text"))?;
        tracing::debug!(chars = text.len(), "llm generate returned");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use serde_json::json;

    fn client(server: &mockito::ServerGuard) -> HttpLlmClient {
        HttpLlmClient::new(
            ApiClient::new(&format!("{}/api", server.url()), 5)
                .unwrap()
                .with_retry_policy(RetryPolicy::immediate(1)),
        )
    }

    #[test]
    fn test_request_wire_shape() {
        let request = GenerateRequest::new("sys", "usr").with_limits(100, 0.0);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "usr"}
                ],
                "max_tokens": 100,
                "temperature": 0.0
            })
        );
        assert_eq!(request.system_prompt(), "sys");
        assert_eq!(request.user_prompt(), "usr");
    }

    #[tokio::test]
    async fn test_generate_reads_response_or_content() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/llm/generate")
            .match_body(mockito::Matcher::PartialJson(json!({"max_tokens": 10})))
            .with_status(200)
            .with_body(r#"{"response": "{\"edits\": []}"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/api/llm/generate")
            .match_body(mockito::Matcher::PartialJson(json!({"max_tokens": 20})))
            .with_status(200)
            .with_body(r#"{"content": "plain text"}"#)
            .create_async()
            .await;

        let llm = client(&server);
        let first = llm
            .generate(GenerateRequest::new("s", "u").with_limits(10, 0.1))
            .await
            .unwrap();
        assert_eq!(first, "{\"edits\": []}");
        let second = llm
            .generate(GenerateRequest::new("s", "u").with_limits(20, 0.1))
            .await
            .unwrap();
        assert_eq!(second, "plain text");
    }

    #[tokio::test]
    async fn test_generate_retries_rate_limits() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/llm/generate")
            .with_status(429)
            .with_header("retry-after", "1")
            .expect(2)
            .create_async()
            .await;

        let err = client(&server)
            .generate(GenerateRequest::new("s", "u"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
        mock.assert_async().await;
    }
}
