//! Deduplicating collector: turns the configured topics into a [`Digest`].
//!
//! The digest is kept structured (ordered sections of feed entries) and
//! only flattened to text by [`Digest::text`], or to markup by the listing
//! renderer in [`crate::compose`].

use chrono::NaiveDate;

use crate::config::{EmptyTopicMode, FeedSource};
use crate::feed::{Entry, FeedFetcher};
use crate::history::History;

/// Body emitted for a topic with nothing new in placeholder mode.
pub const NO_NEWS_PLACEHOLDER: &str = "No news found today.";

/// Default title, used for the mail subject and the listing heading.
pub const DEFAULT_TITLE: &str = "Daily News Digest";

/// `"<prefix> - YYYY-MM-DD"`.
pub fn dated_title(prefix: &str, date: NaiveDate) -> String {
    format!("{} - {}", prefix, date.format("%Y-%m-%d"))
}

/// One topic's contribution to the digest.
///
/// A section with no entries is a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub label: String,
    pub entries: Vec<Entry>,
}

impl Section {
    pub fn is_placeholder(&self) -> bool {
        self.entries.is_empty()
    }

    fn write_text(&self, out: &mut String) {
        out.push_str("=== SOURCE: ");
        out.push_str(&self.label);
        out.push_str(" ===\n");
        if self.is_placeholder() {
            out.push_str(NO_NEWS_PLACEHOLDER);
            out.push('\n');
        } else {
            for entry in &self.entries {
                out.push_str(&entry.to_record());
                out.push('\n');
            }
        }
        out.push('\n');
    }
}

/// Everything new across all topics for this run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Digest {
    sections: Vec<Section>,
    new_links: Vec<String>,
}

impl Digest {
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Links of every new entry, in topic then feed order.
    pub fn new_links(&self) -> &[String] {
        &self.new_links
    }

    /// True when at least one topic produced a new entry. Placeholder
    /// sections do not count.
    pub fn has_news(&self) -> bool {
        self.sections.iter().any(|s| !s.is_placeholder())
    }

    pub fn entry_count(&self) -> usize {
        self.sections.iter().map(|s| s.entries.len()).sum()
    }

    /// Plain-text payload for the composer.
    ///
    /// Empty when there is no news, even if placeholder sections exist.
    pub fn text(&self) -> String {
        if !self.has_news() {
            return String::new();
        }

        let mut out = String::new();
        for section in &self.sections {
            section.write_text(&mut out);
        }
        out
    }
}

/// Fetches every source in declaration order and accumulates the entries not
/// yet in `history`.
///
/// An entry already collected under an earlier topic in this run is not
/// repeated under a later one.
pub async fn collect(
    fetcher: &FeedFetcher,
    sources: &[FeedSource],
    history: &History,
    empty_topics: EmptyTopicMode,
) -> Digest {
    let mut digest = Digest::default();
    let mut seen = history.clone();

    for source in sources {
        let outcome = fetcher.fetch_source(source, &seen).await;
        let new_links = outcome.new_links();
        seen.extend(new_links.iter().cloned());
        digest.new_links.extend(new_links);

        if !outcome.is_empty() || empty_topics == EmptyTopicMode::Placeholder {
            digest.sections.push(Section {
                label: source.label.clone(),
                entries: outcome.entries,
            });
        }
    }

    tracing::info!(
        topics = sources.len(),
        entries = digest.entry_count(),
        "Collected feeds"
    );
    digest
}
