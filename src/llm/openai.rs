use super::traits::{ChatProvider, ChatTurn};
use crate::config::LlmConfig;
use crate::error::LlmError;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenAI-compatible chat-completions client. Any backend that speaks the
/// same wire format works by pointing `api_base` elsewhere.
pub struct OpenAiProvider {
    /// Pre-computed `"Bearer <key>"` header value (avoids `format!` per request).
    cached_auth_header: Option<String>,
    endpoint: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            cached_auth_header: config
                .api_key
                .as_deref()
                .filter(|k| !k.trim().is_empty())
                .map(|k| format!("Bearer {k}")),
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Whether a credential is configured. Callers skip the LLM path
    /// entirely when this is false.
    pub fn has_credential(&self) -> bool {
        self.cached_auth_header.is_some()
    }

    fn build_request(&self, turns: &[ChatTurn]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: turns
                .iter()
                .map(|t| Message {
                    role: t.role.as_str(),
                    content: t.content.clone(),
                })
                .collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, turns: &[ChatTurn]) -> anyhow::Result<String> {
        let auth_header = self.cached_auth_header.as_ref().ok_or(
            LlmError::MissingCredential {
                provider: "openai".into(),
            },
        )?;

        let request = self.build_request(turns);
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", auth_header)
            .json(&request)
            .send()
            .await
            .context("OpenAI request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(LlmError::Request {
                provider: "openai".into(),
                message: format!("status {status}: {snippet}"),
            }
            .into());
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("OpenAI response JSON decode failed")?;
        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                LlmError::MalformedPayload {
                    provider: "openai".into(),
                    message: "empty choices".into(),
                }
                .into()
            })
    }
}
