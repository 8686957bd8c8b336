use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ComposeError;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub(super) struct AnthropicClient {
    pub client: reqwest::Client,
    pub api_key: SecretString,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl AnthropicClient {
    pub async fn generate(&self, instruction: &str, text: &str) -> Result<String, ComposeError> {
        let base = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{}/v1/messages", base.trim_end_matches('/'));

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: instruction,
            messages: [Message {
                role: "user",
                content: text,
            }],
        };

        tracing::debug!(model = %self.model, input_chars = text.len(), "Requesting digest from Anthropic");

        let request = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body);

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ComposeError::Timeout(self.timeout.as_secs()))??;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&raw)
                .map(|e| e.error.message)
                .unwrap_or(raw);
            return Err(ComposeError::HttpStatus {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = tokio::time::timeout(self.timeout, response.json())
            .await
            .map_err(|_| ComposeError::Timeout(self.timeout.as_secs()))??;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();

        if text.trim().is_empty() {
            return Err(ComposeError::EmptyResponse);
        }
        Ok(text)
    }
}
