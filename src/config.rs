//! Configuration file parser for ~/.config/newsbrief/config.toml.
//!
//! The config file is optional. A missing file yields `Config::default()`,
//! which carries the built-in topic list. Unknown keys are silently ignored by
//! serde, though we log a warning when the file contains potential typos.
//! Credentials are read from the environment (see [`crate::mail`] and
//! [`crate::compose`]); the API key may also be set here as a fallback.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::digest::DEFAULT_TITLE;
use crate::history::DEFAULT_HISTORY_CAP;
use crate::util::validate_feed_url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// One pollable topic: a label plus the feed URLs that can serve it.
///
/// `fallbacks` are consulted in order only when the primary `url` yields no
/// entries at all. Social-media mirrors come and go, so a topic backed by one
/// usually lists several.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FeedSource {
    pub label: String,
    pub url: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl FeedSource {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallbacks<I, S>(mut self, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallbacks = fallbacks.into_iter().map(Into::into).collect();
        self
    }

    /// Candidate URLs in the order they should be tried.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}

/// How a topic with no new entries is represented in the digest.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmptyTopicMode {
    /// Leave the topic out of the digest entirely.
    #[default]
    Omit,
    /// Emit the topic with a "No news found today." body.
    Placeholder,
}

/// Which service turns the collected headlines into HTML.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Anthropic,
    Gemini,
    /// No model call; each topic becomes a list of linked headlines.
    Listing,
}

impl LlmBackend {
    /// Environment variable holding this backend's API key, if it needs one.
    pub fn key_var(self) -> Option<&'static str> {
        match self {
            LlmBackend::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmBackend::Gemini => Some("GEMINI_API_KEY"),
            LlmBackend::Listing => None,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            LlmBackend::Anthropic => "claude-sonnet-4-5",
            LlmBackend::Gemini => "gemini-2.0-flash",
            LlmBackend::Listing => "",
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackend,

    /// Model name; `None` uses the backend's default.
    pub model: Option<String>,

    pub max_tokens: u32,

    /// Override for the provider endpoint (used by tests and proxies).
    pub base_url: Option<String>,

    pub timeout_secs: u64,

    /// API key fallback. The backend's env var takes precedence.
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::default(),
            model: None,
            max_tokens: 4096,
            base_url: None,
            timeout_secs: 120,
            api_key: None,
        }
    }
}

/// Mask api_key in Debug output to prevent secret leakage.
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: String,

    /// Implicit-TLS (SMTPS) port.
    pub smtp_port: u16,

    /// Subject prefix; the run date is appended.
    pub subject: String,

    /// Adds `X-Priority: 1` and `Importance: High`.
    pub high_priority: bool,

    pub timeout_secs: u64,

    /// Fallbacks for EMAIL_SENDER / EMAIL_RECEIVER. The password is env-only.
    pub sender: Option<String>,
    pub receiver: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 465,
            subject: DEFAULT_TITLE.to_string(),
            high_priority: true,
            timeout_secs: 60,
            sender: None,
            receiver: None,
        }
    }
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Note that specifying `[[topics]]` replaces the built-in topic list rather
/// than extending it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum entries taken from the head of each feed.
    pub entry_limit: usize,

    pub empty_topics: EmptyTopicMode,

    /// Sent with every feed request. Some hosts reject default agents.
    pub user_agent: String,

    pub request_timeout_secs: u64,

    /// Extra attempts after a failed feed fetch (0 = single attempt).
    pub fetch_retries: u32,

    pub retry_delay_ms: u64,

    /// History file; `None` resolves to `history.json` in the config dir.
    pub history_path: Option<PathBuf>,

    pub history_cap: usize,

    pub topics: Vec<FeedSource>,

    pub llm: LlmConfig,

    pub email: EmailConfig,
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

impl Default for Config {
    fn default() -> Self {
        Self {
            entry_limit: 10,
            empty_topics: EmptyTopicMode::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            fetch_retries: 1,
            retry_delay_ms: 0,
            history_path: None,
            history_cap: DEFAULT_HISTORY_CAP,
            topics: default_topics(),
            llm: LlmConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

fn default_topics() -> Vec<FeedSource> {
    vec![
        FeedSource::new(
            "Artificial Intelligence",
            "https://news.google.com/rss/search?q=Artificial+Intelligence",
        ),
        FeedSource::new(
            "Data Engineering",
            "https://news.google.com/rss/search?q=Data+Engineering",
        ),
        FeedSource::new(
            "Data Engineering (Reddit)",
            "https://www.reddit.com/r/dataengineering/.rss",
        ),
        FeedSource::new(
            "Galatasaray SK (Twitter/Nitter)",
            "https://nitter.net/GalatasaraySK/rss",
        )
        .with_fallbacks(["https://nitter.poast.org/GalatasaraySK/rss"]),
    ]
}

const KNOWN_KEYS: [&str; 11] = [
    "entry_limit",
    "empty_topics",
    "user_agent",
    "request_timeout_secs",
    "fetch_retries",
    "retry_delay_ms",
    "history_path",
    "history_cap",
    "topics",
    "llm",
    "email",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Default config directory (`~/.config/newsbrief`).
    pub fn default_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config").join("newsbrief"))
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted, logged as warning
    /// - Topics with no usable URL are dropped with a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text. Empty text yields the defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let mut config: Config = toml::from_str(content)?;
        config.sanitize();
        tracing::info!(
            topics = config.topics.len(),
            backend = ?config.llm.backend,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Drops unusable feed URLs and clamps nonsensical limits.
    fn sanitize(&mut self) {
        if self.entry_limit == 0 {
            tracing::warn!("entry_limit = 0 would skip every feed, using 10");
            self.entry_limit = 10;
        }
        if self.history_cap == 0 {
            tracing::warn!(fallback = DEFAULT_HISTORY_CAP, "history_cap = 0 would disable deduplication");
            self.history_cap = DEFAULT_HISTORY_CAP;
        }

        self.topics.retain_mut(|topic| {
            let mut urls: Vec<String> = topic
                .urls()
                .filter(|url| match validate_feed_url(url) {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(topic = %topic.label, url = %url, error = %e, "Skipping invalid feed URL");
                        false
                    }
                })
                .map(str::to_owned)
                .collect();

            if urls.is_empty() {
                tracing::warn!(topic = %topic.label, "Topic has no usable feed URL, dropping it");
                return false;
            }

            topic.url = urls.remove(0);
            topic.fallbacks = urls;
            true
        });
    }

    /// History file location, falling back to `<config dir>/history.json`.
    pub fn resolved_history_path(&self, config_dir: Option<&Path>) -> PathBuf {
        match (&self.history_path, config_dir) {
            (Some(path), _) => path.clone(),
            (None, Some(dir)) => dir.join("history.json"),
            (None, None) => PathBuf::from("history.json"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
