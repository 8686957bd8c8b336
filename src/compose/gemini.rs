use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ComposeError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub(super) struct GeminiClient {
    pub client: reqwest::Client,
    pub api_key: SecretString,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
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

impl GeminiClient {
    pub async fn generate(&self, instruction: &str, text: &str) -> Result<String, ComposeError> {
        let base = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            base.trim_end_matches('/'),
            self.model
        );

        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part { text: instruction }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part { text }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_tokens,
            },
        };

        tracing::debug!(model = %self.model, input_chars = text.len(), "Requesting digest from Gemini");

        // Key goes in a header so it never shows up in URLs or error messages
        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
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

        let parsed: GenerateResponse = tokio::time::timeout(self.timeout, response.json())
            .await
            .map_err(|_| ComposeError::Timeout(self.timeout.as_secs()))??;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ComposeError::EmptyResponse);
        }
        Ok(text)
    }
}
