//! Digest composition: collected headlines in, HTML fragment out.
//!
//! Three backends are supported:
//!
//! - [`anthropic`] - Anthropic Messages API (`ANTHROPIC_API_KEY`)
//! - [`gemini`] - Google Gemini `generateContent` (`GEMINI_API_KEY`)
//! - [`listing`] - no model; each topic becomes a list of linked headlines
//!
//! [`Composer::compose`] never fails. A missing key or a provider error turns
//! into an HTML error fragment so the reader still receives an email
//! explaining what went wrong instead of silence.

mod anthropic;
mod gemini;
mod listing;

use chrono::Local;
use secrecy::SecretString;
use std::time::Duration;
use thiserror::Error;

use crate::config::{LlmBackend, LlmConfig};
use crate::digest::{dated_title, Digest, DEFAULT_TITLE};
use crate::util::escape_html;

pub use listing::render_listing;

/// Instruction sent alongside the collected headlines.
pub const DIGEST_INSTRUCTION: &str = "\
You are the editor of a personal daily news briefing. The user message contains raw \
headlines and snippets grouped under lines of the form '=== SOURCE: <topic> ==='. \
Each item has a Title, a Link and a Snippet.

Write the briefing as an HTML fragment:
1. Start with <h2>Executive Summary</h2> followed by a short paragraph covering the \
most important developments across all topics.
2. Then, for each topic, an <h2> with the topic name and one or more thematic deep \
dives (<h3> per theme) that connect related items into a narrative rather than \
listing them one by one.
3. Attribute every claim inline with a link to its source, e.g. \
<a href=\"LINK\">Publication</a>. Only use links that appear in the input.
4. Skip items that are duplicates, spam or clearly off-topic.

Output only the fragment: no <html>, <head> or <body> tags, no Markdown, no code fences.";

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("{0} is not set")]
    MissingApiKey(&'static str),

    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Provider returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Provider response contained no text")]
    EmptyResponse,
}

/// Result of composing: the HTML to send, and the failure if the HTML is an
/// error fragment.
#[derive(Debug)]
pub struct Composition {
    pub html: String,
    pub failure: Option<ComposeError>,
}

impl Composition {
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

enum Backend {
    Anthropic(anthropic::AnthropicClient),
    Gemini(gemini::GeminiClient),
    Listing,
    MissingKey(&'static str),
}

pub struct Composer {
    backend: Backend,
    /// Heading prefix for the listing backend; the run date is appended.
    title: String,
}

impl Composer {
    /// Builds the composer for the configured backend.
    ///
    /// `lookup` resolves environment variables; the backend's key variable
    /// wins over `api_key` from the config file.
    pub fn from_config<F>(config: &LlmConfig, client: reqwest::Client, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(key_var) = config.backend.key_var() else {
            return Self::listing();
        };

        let api_key = lookup(key_var)
            .or_else(|| config.api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let Some(api_key) = api_key else {
            tracing::warn!(var = key_var, "No LLM API key configured, digest will be an error notice");
            return Self::with_backend(Backend::MissingKey(key_var));
        };

        let model = config
            .model
            .clone()
            .unwrap_or_else(|| config.backend.default_model().to_string());
        let timeout = Duration::from_secs(config.timeout_secs);

        let backend = match config.backend {
            LlmBackend::Anthropic => Backend::Anthropic(anthropic::AnthropicClient {
                client,
                api_key,
                model,
                max_tokens: config.max_tokens,
                base_url: config.base_url.clone(),
                timeout,
            }),
            LlmBackend::Gemini => Backend::Gemini(gemini::GeminiClient {
                client,
                api_key,
                model,
                max_tokens: config.max_tokens,
                base_url: config.base_url.clone(),
                timeout,
            }),
            LlmBackend::Listing => Backend::Listing,
        };

        Self::with_backend(backend)
    }

    /// Composer that renders headlines locally without a model call.
    pub fn listing() -> Self {
        Self::with_backend(Backend::Listing)
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            title: DEFAULT_TITLE.to_string(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Produces the HTML fragment for `digest`. Never fails.
    pub async fn compose(&self, digest: &Digest) -> Composition {
        match self.try_compose(digest).await {
            Ok(html) => Composition {
                html,
                failure: None,
            },
            Err(e) => {
                tracing::error!(error = %e, "Digest composition failed, sending error notice");
                Composition {
                    html: error_fragment(&e),
                    failure: Some(e),
                }
            }
        }
    }

    pub async fn try_compose(&self, digest: &Digest) -> Result<String, ComposeError> {
        let raw = match &self.backend {
            Backend::Anthropic(client) => client.generate(DIGEST_INSTRUCTION, &digest.text()).await?,
            Backend::Gemini(client) => client.generate(DIGEST_INSTRUCTION, &digest.text()).await?,
            Backend::Listing => {
                let heading = dated_title(&self.title, Local::now().date_naive());
                return Ok(render_listing(digest, &heading));
            }
            Backend::MissingKey(var) => return Err(ComposeError::MissingApiKey(*var)),
        };

        let html = strip_code_fences(&raw);
        if html.is_empty() {
            return Err(ComposeError::EmptyResponse);
        }
        tracing::info!(chars = html.len(), "Composed digest");
        Ok(html.to_string())
    }
}

const FENCE: &str = "```";

/// Removes a Markdown code fence wrapped around model output.
///
/// The opening marker and its language tag go, the fenced content stays.
/// Prose the model puts before the opening fence is dropped.
///
/// ```
/// use newsbrief::compose::strip_code_fences;
///
/// assert_eq!(strip_code_fences("```html\n<p>hi</p>\n```"), "<p>hi</p>");
/// assert_eq!(strip_code_fences("```html<p>hi</p>```"), "<p>hi</p>");
/// assert_eq!(strip_code_fences("<p>hi</p>"), "<p>hi</p>");
/// ```
pub fn strip_code_fences(raw: &str) -> &str {
    let s = raw.trim();
    let Some(open) = s.find(FENCE) else {
        return s;
    };

    let after = &s[open + FENCE.len()..];
    let after = after.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let body = match after.rfind(FENCE) {
        Some(close) => &after[..close],
        None => after,
    };
    let body = body.trim();

    // A lone fence at the end closes content that was never opened
    if body.is_empty() {
        return s[..open].trim();
    }
    body
}

/// Minimal fragment telling the reader the digest could not be produced.
pub fn error_fragment(error: &ComposeError) -> String {
    format!(
        "<h2>Digest unavailable</h2>\n<p>Today's news digest could not be generated: {}</p>\n\
         <p>New items were not marked as read and will be retried on the next run.</p>",
        escape_html(&error.to_string())
    )
}
