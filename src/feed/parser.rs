use feed_rs::parser;

use crate::util::{flatten_snippet, strip_control_chars};

/// Placeholder used when a feed item has no title (common on social mirrors).
pub const UNTITLED: &str = "No Title";

/// One feed item, reduced to what the digest needs.
///
/// `link` doubles as the item's identity for deduplication across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub title: String,
    pub link: String,
    pub summary: String,
}

impl Entry {
    /// Fixed three-line text block handed to the composer.
    pub fn to_record(&self) -> String {
        let title = if self.title.is_empty() {
            UNTITLED
        } else {
            &self.title
        };
        format!(
            "Title: {}\nLink: {}\nSnippet: {}\n",
            title, self.link, self.summary
        )
    }
}

/// Entries recovered from a feed document.
///
/// `skipped` counts items that could not be used (no link to identify them
/// by). The feed is still usable when `skipped > 0`.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub entries: Vec<Entry>,
    pub skipped: usize,
}

/// Parses an RSS 0.9x/1.0/2.0, Atom or JSON Feed document.
///
/// Entries are returned in document order.
pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let mut result = ParseResult::default();
    for entry in feed.entries {
        let link = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .filter(|href| !href.is_empty())
            .or_else(|| {
                // Some RSS 2.0 feeds only carry a permalink <guid>
                let id = entry.id.trim();
                (id.starts_with("http://") || id.starts_with("https://")).then(|| id.to_string())
            });

        let Some(link) = link else {
            result.skipped += 1;
            continue;
        };

        let title = entry
            .title
            .map(|t| strip_control_chars(t.content.trim()).into_owned())
            .unwrap_or_default();

        let summary = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .map(|s| flatten_snippet(&s))
            .unwrap_or_default();

        result.entries.push(Entry {
            title,
            link,
            summary,
        });
    }

    Ok(result)
}
