use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use crate::config::{Config, FeedSource};
use crate::feed::parser::{parse_feed, Entry, ParseResult};
use crate::history::History;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while fetching a single feed URL.
///
/// These never leave the fetcher's public API: [`FeedFetcher::fetch`] and
/// [`FeedFetcher::fetch_source`] log them and return an empty outcome.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed document could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// How many times a failed fetch is repeated and how long to wait between
/// attempts.
///
/// The default is one immediate retry. `delay_for` is the single place a
/// backoff curve would go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, _retry: u32) -> Duration {
        self.delay
    }
}

/// New, not-yet-delivered entries from one feed, in feed order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub entries: Vec<Entry>,
}

impl FetchOutcome {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Formatted three-line blocks, parallel to [`FetchOutcome::new_links`].
    pub fn records(&self) -> Vec<String> {
        self.entries.iter().map(Entry::to_record).collect()
    }

    pub fn new_links(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.link.clone()).collect()
    }
}

/// Fetches feeds one at a time and filters out already-delivered entries.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    limit: usize,
    retry: RetryPolicy,
    timeout: Duration,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, limit: usize) -> Self {
        Self {
            client,
            limit,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Builds a fetcher with the configured user agent, limit, retry policy
    /// and timeout.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self::new(client, config.entry_limit)
            .with_retry(RetryPolicy {
                max_retries: config.fetch_retries,
                delay: Duration::from_millis(config.retry_delay_ms),
            })
            .with_timeout(Duration::from_secs(config.request_timeout_secs)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetches one feed URL and returns its entries that are not in
    /// `history`.
    ///
    /// Never fails: any error is logged and yields an empty outcome.
    pub async fn fetch(&self, url: &str, topic: &str, history: &History) -> FetchOutcome {
        match self.fetch_entries(url).await {
            Ok(entries) => select_new(entries, history),
            Err(e) => {
                tracing::error!(topic = %topic, url = %url, error = %e, "Feed fetch failed");
                FetchOutcome::default()
            }
        }
    }

    /// Fetches a topic, walking its fallback URLs until one yields entries.
    ///
    /// A URL that parses but lists nothing counts as unavailable, which is how
    /// dead social-media mirrors typically present.
    pub async fn fetch_source(&self, source: &FeedSource, history: &History) -> FetchOutcome {
        for url in source.urls() {
            match self.fetch_entries(url).await {
                Ok(entries) if !entries.is_empty() => {
                    let outcome = select_new(entries, history);
                    tracing::info!(
                        topic = %source.label,
                        url = %url,
                        new = outcome.entries.len(),
                        "Fetched feed"
                    );
                    return outcome;
                }
                Ok(_) => {
                    tracing::warn!(topic = %source.label, url = %url, "Feed returned no entries");
                }
                Err(e) => {
                    tracing::error!(topic = %source.label, url = %url, error = %e, "Feed fetch failed");
                }
            }
        }

        tracing::warn!(topic = %source.label, "No feed URL produced entries");
        FetchOutcome::default()
    }

    /// Fetches and parses `url`, retrying per the policy, and returns at most
    /// `limit` entries in feed order.
    pub async fn fetch_entries(&self, url: &str) -> Result<Vec<Entry>, FetchError> {
        let mut retry = 0;

        let ParseResult { mut entries, skipped } = loop {
            match self.fetch_once(url).await {
                Ok(parsed) => break parsed,
                Err(e) if retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    tracing::warn!(
                        url = %url,
                        error = %e,
                        retry = retry,
                        delay_ms = delay.as_millis() as u64,
                        "Feed fetch failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        };

        if skipped > 0 {
            tracing::warn!(url = %url, skipped = skipped, "Feed items without a link skipped");
        }

        entries.truncate(self.limit);
        Ok(entries)
    }

    async fn fetch_once(&self, url: &str) -> Result<ParseResult, FetchError> {
        let bytes = tokio::time::timeout(self.timeout, self.download(url))
            .await
            .map_err(|_| FetchError::Timeout)??;

        parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, MAX_FEED_SIZE).await
    }
}

/// Drops entries already in `history` or repeated within the feed.
fn select_new(entries: Vec<Entry>, history: &History) -> FetchOutcome {
    let mut seen = HashSet::new();
    let entries = entries
        .into_iter()
        .filter(|entry| !history.contains(&entry.link) && seen.insert(entry.link.clone()))
        .collect();

    FetchOutcome { entries }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss_with(items: &[(&str, &str, &str)]) -> String {
        let body: String = items
            .iter()
            .map(|(title, link, summary)| {
                format!(
                    "<item><title>{title}</title><link>{link}</link><description>{summary}</description></item>"
                )
            })
            .collect();
        format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>{body}</channel></rss>"#)
    }

    async fn serve(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(server)
            .await;
    }

    fn fetcher(limit: usize) -> FeedFetcher {
        FeedFetcher::new(reqwest::Client::new(), limit).with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_single_new_entry() {
        let server = MockServer::start().await;
        serve(&server, "/a", rss_with(&[("X", "http://a/1", "s1")])).await;

        let outcome = fetcher(10)
            .fetch(&format!("{}/a", server.uri()), "Topic A", &History::new())
            .await;

        assert_eq!(outcome.records(), vec!["Title: X\nLink: http://a/1\nSnippet: s1\n"]);
        assert_eq!(outcome.new_links(), vec!["http://a/1"]);
    }

    #[tokio::test]
    async fn test_seen_entry_excluded() {
        let server = MockServer::start().await;
        serve(&server, "/a", rss_with(&[("X", "http://a/1", "s1")])).await;
        let history: History = ["http://a/1"].into_iter().collect();

        let outcome = fetcher(10)
            .fetch(&format!("{}/a", server.uri()), "Topic A", &history)
            .await;

        assert!(outcome.records().is_empty());
        assert!(outcome.new_links().is_empty());
    }

    #[tokio::test]
    async fn test_limit_keeps_feed_order() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/a",
            rss_with(&[
                ("One", "http://a/1", ""),
                ("Two", "http://a/2", ""),
                ("Three", "http://a/3", ""),
            ]),
        )
        .await;

        let outcome = fetcher(2)
            .fetch(&format!("{}/a", server.uri()), "t", &History::new())
            .await;
        assert_eq!(outcome.new_links(), vec!["http://a/1", "http://a/2"]);
    }

    #[tokio::test]
    async fn test_limit_applies_before_dedup() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/a",
            rss_with(&[("One", "http://a/1", ""), ("Two", "http://a/2", ""), ("Three", "http://a/3", "")]),
        )
        .await;
        let history: History = ["http://a/1"].into_iter().collect();

        let outcome = fetcher(2)
            .fetch(&format!("{}/a", server.uri()), "t", &history)
            .await;
        assert_eq!(outcome.new_links(), vec!["http://a/2"]);
    }

    #[tokio::test]
    async fn test_duplicate_link_within_feed_reported_once() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/a",
            rss_with(&[("One", "http://a/1", ""), ("One again", "http://a/1", "")]),
        )
        .await;

        let outcome = fetcher(10)
            .fetch(&format!("{}/a", server.uri()), "t", &History::new())
            .await;
        assert_eq!(outcome.new_links(), vec!["http://a/1"]);
        assert_eq!(outcome.records().len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_retried_once_then_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2) // Initial request + 1 retry
            .mount(&server)
            .await;

        let outcome = fetcher(10)
            .with_retry(RetryPolicy::default())
            .fetch(&format!("{}/a", server.uri()), "t", &History::new())
            .await;

        assert_eq!(outcome, FetchOutcome::default());
    }

    #[tokio::test]
    async fn test_connection_refused_yields_empty() {
        // Bind then drop a server so the port is closed
        let uri = {
            let server = MockServer::start().await;
            server.uri()
        };

        let outcome = fetcher(10)
            .fetch(&format!("{uri}/gone"), "t", &History::new())
            .await;
        assert!(outcome.is_empty());
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        serve(&server, "/a", rss_with(&[("X", "http://a/1", "")])).await;

        let outcome = fetcher(10)
            .fetch(&format!("{}/a", server.uri()), "t", &History::new())
            .await;
        assert_eq!(outcome.new_links(), vec!["http://a/1"]);
    }

    #[tokio::test]
    async fn test_no_retry_policy_makes_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(10)
            .with_retry(RetryPolicy::none())
            .fetch_entries(&format!("{}/a", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_malformed_feed_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&server)
            .await;

        let err = fetcher(10)
            .with_retry(RetryPolicy::none())
            .fetch_entries(&format!("{}/a", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn test_slow_feed_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss_with(&[]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = fetcher(10)
            .with_retry(RetryPolicy::none())
            .with_timeout(Duration::from_millis(50))
            .fetch_entries(&format!("{}/a", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout));
    }

    #[tokio::test]
    async fn test_user_agent_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "newsbrief-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_with(&[("X", "http://a/1", "")])))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config {
            user_agent: "newsbrief-test/1.0".to_string(),
            ..Config::default()
        };
        let fetcher = FeedFetcher::from_config(&config).unwrap();
        let entries = fetcher
            .fetch_entries(&format!("{}/a", server.uri()))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_is_empty() {
        let server = MockServer::start().await;
        serve(&server, "/primary", rss_with(&[])).await;
        serve(&server, "/mirror", rss_with(&[("Tweet", "http://m/1", "")])).await;

        let source = FeedSource::new("Mirrors", format!("{}/primary", server.uri()))
            .with_fallbacks([format!("{}/mirror", server.uri())]);

        let outcome = fetcher(10).fetch_source(&source, &History::new()).await;
        assert_eq!(outcome.new_links(), vec!["http://m/1"]);
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/primary"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        serve(&server, "/mirror", rss_with(&[("Tweet", "http://m/1", "")])).await;

        let source = FeedSource::new("Mirrors", format!("{}/primary", server.uri()))
            .with_fallbacks([format!("{}/mirror", server.uri())]);

        let outcome = fetcher(10)
            .with_retry(RetryPolicy::none())
            .fetch_source(&source, &History::new())
            .await;
        assert_eq!(outcome.new_links(), vec!["http://m/1"]);
    }

    #[tokio::test]
    async fn test_fallback_not_consulted_when_primary_has_only_seen_entries() {
        let server = MockServer::start().await;
        serve(&server, "/primary", rss_with(&[("Old", "http://p/1", "")])).await;
        Mock::given(method("GET"))
            .and(path("/mirror"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_with(&[("Other", "http://m/1", "")])))
            .expect(0)
            .mount(&server)
            .await;

        let source = FeedSource::new("Mirrors", format!("{}/primary", server.uri()))
            .with_fallbacks([format!("{}/mirror", server.uri())]);
        let history: History = ["http://p/1"].into_iter().collect();

        let outcome = fetcher(10).fetch_source(&source, &history).await;
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_select_new_keeps_parallel_lists() {
        let entries = vec![
            Entry { title: "A".into(), link: "l1".into(), summary: String::new() },
            Entry { title: "B".into(), link: "l2".into(), summary: String::new() },
        ];
        let history: History = ["l1"].into_iter().collect();
        let outcome = select_new(entries, &history);
        assert_eq!(outcome.new_links(), vec!["l2"]);
        assert_eq!(outcome.records(), vec!["Title: B\nLink: l2\nSnippet: \n"]);
    }

    proptest! {
        #[test]
        fn prop_select_new_excludes_history(n in 0usize..40, seen_every in 1usize..5) {
            let entries: Vec<Entry> = (0..n)
                .map(|i| Entry { title: format!("t{i}"), link: format!("l{i}"), summary: String::new() })
                .collect();
            let history: History = (0..n).step_by(seen_every).map(|i| format!("l{i}")).collect();

            let outcome = select_new(entries, &history);
            prop_assert_eq!(outcome.records().len(), outcome.new_links().len());
            for link in &outcome.new_links() {
                prop_assert!(!history.contains(link));
            }
            prop_assert_eq!(outcome.new_links().len() + history.len(), n);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_fetch_returns_feed_head_up_to_limit(n in 0usize..25, limit in 0usize..15) {
            let links: Vec<String> = (0..n).map(|i| format!("http://a/{i}")).collect();
            let items: Vec<(&str, &str, &str)> = links.iter().map(|l| ("t", l.as_str(), "")).collect();
            let body = rss_with(&items);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let outcome = runtime.block_on(async {
                let server = MockServer::start().await;
                serve(&server, "/a", body).await;
                fetcher(limit)
                    .fetch(&format!("{}/a", server.uri()), "t", &History::new())
                    .await
            });

            prop_assert_eq!(outcome.records().len(), n.min(limit));
            prop_assert_eq!(outcome.new_links(), links[..n.min(limit)].to_vec());
        }
    }
}
