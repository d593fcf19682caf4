use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::error::AnthropicError;
use super::types::{Message, MessagesRequest, MessagesResponse};
use crate::workflow::state::Turn;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Reply of one conversation turn plus the history including it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    pub text: String,
    pub history: Vec<Turn>,
}

/// The language-model collaborator handed to LLM steps.
#[async_trait]
pub trait ConversationModel: Send + Sync {
    /// Sends `history` followed by `prompt` as a new user turn.
    async fn run_turn(&self, prompt: &str, history: &[Turn]) -> Result<TurnResult, AnthropicError>;
}

pub struct AnthropicClient {
    api_key: String,
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    system: Option<String>,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Result<Self, AnthropicError> {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, AnthropicError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: None,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn send_message(&self, req: &MessagesRequest) -> Result<MessagesResponse, AnthropicError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(AnthropicError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AnthropicError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<MessagesResponse>().await?)
    }
}

#[async_trait]
impl ConversationModel for AnthropicClient {
    async fn run_turn(&self, prompt: &str, history: &[Turn]) -> Result<TurnResult, AnthropicError> {
        let mut turns = history.to_vec();
        turns.push(Turn::user(prompt));

        let req = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: self.system.clone(),
            messages: turns.iter().map(Message::from).collect(),
        };
        let response = self.send_message(&req).await?;
        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "model turn completed"
        );

        let text = response.text();
        if text.is_empty() {
            return Err(AnthropicError::EmptyResponse);
        }
        turns.push(Turn::assistant(text.clone()));
        Ok(TurnResult { text, history: turns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(text: &str) -> serde_json::Value {
        json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": text}],
            "model": DEFAULT_MODEL,
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 4}
        })
    }

    #[tokio::test]
    async fn run_turn_sends_history_and_appends_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "sk-test"))
            .and(body_partial_json(json!({
                "system": "be brief",
                "messages": [
                    {"role": "user", "content": "first"},
                    {"role": "assistant", "content": "ok"},
                    {"role": "user", "content": "second"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("done")))
            .expect(1)
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("sk-test".into(), server.uri())
            .unwrap()
            .with_system("be brief");
        let history = vec![Turn::user("first"), Turn::assistant("ok")];
        let result = client.run_turn("second", &history).await.unwrap();

        assert_eq!(result.text, "done");
        assert_eq!(result.history.len(), 4);
        assert_eq!(result.history[3], Turn::assistant("done"));
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("k".into(), server.uri()).unwrap();
        let err = client.run_turn("hi", &[]).await.unwrap_err();
        assert!(matches!(err, AnthropicError::RateLimited { retry_after_ms: 7000 }));
    }

    #[tokio::test]
    async fn api_errors_and_empty_replies_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "bad"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_2",
                "content": [],
                "model": DEFAULT_MODEL,
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 1, "output_tokens": 0}
            })))
            .mount(&server)
            .await;

        let bad = AnthropicClient::with_base_url("bad".into(), server.uri()).unwrap();
        match bad.run_turn("hi", &[]).await.unwrap_err() {
            AnthropicError::ApiError { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("invalid"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let good = AnthropicClient::with_base_url("good".into(), server.uri()).unwrap();
        assert!(matches!(
            good.run_turn("hi", &[]).await.unwrap_err(),
            AnthropicError::EmptyResponse
        ));
    }
}
