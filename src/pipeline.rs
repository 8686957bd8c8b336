//! One run of the briefing: collect, compose, deliver, remember.
//!
//! Links are committed to history only after a real digest has been mailed.
//! An error notice or a failed delivery leaves history untouched so the same
//! items are offered again on the next run.

use chrono::Local;

use crate::compose::Composer;
use crate::config::Config;
use crate::digest::{self, dated_title};
use crate::feed::FeedFetcher;
use crate::history::HistoryStore;
use crate::mail::Deliver;

/// Where the composed digest goes.
pub enum Delivery<'a> {
    Mail(&'a dyn Deliver),
    /// Keep the HTML in the report instead of sending it.
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// No topic produced a new entry; nothing was composed or sent.
    NothingNew,
    /// Digest mailed and history updated.
    Delivered,
    /// Composition failed; the error notice was mailed instead.
    SentErrorNotice,
    DeliveryFailed,
    /// Digest mailed but the history file could not be written.
    HistoryNotSaved,
    DryRun,
}

#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub entries: usize,
    pub new_links: usize,
    /// Size of the history file after this run, when it was written.
    pub history_len: Option<usize>,
    /// Composed HTML, kept for dry runs.
    pub html: Option<String>,
}

impl RunReport {
    fn new(status: RunStatus, entries: usize, new_links: usize) -> Self {
        Self {
            status,
            entries,
            new_links,
            history_len: None,
            html: None,
        }
    }

    pub fn log(&self) {
        match self.status {
            RunStatus::NothingNew => tracing::info!("No new items found, nothing to send"),
            RunStatus::Delivered => tracing::info!(
                entries = self.entries,
                history = self.history_len.unwrap_or_default(),
                "Digest delivered"
            ),
            RunStatus::SentErrorNotice => tracing::warn!(
                entries = self.entries,
                "Sent error notice, new items will be retried next run"
            ),
            RunStatus::DeliveryFailed => tracing::warn!(
                entries = self.entries,
                "Digest not delivered, new items will be retried next run"
            ),
            RunStatus::HistoryNotSaved => tracing::warn!(
                entries = self.entries,
                "Digest delivered but history not saved, items may repeat next run"
            ),
            RunStatus::DryRun => tracing::info!(entries = self.entries, "Dry run complete, history untouched"),
        }
    }
}

pub async fn run(
    config: &Config,
    store: &HistoryStore,
    fetcher: &FeedFetcher,
    composer: &Composer,
    delivery: Delivery<'_>,
) -> RunReport {
    let history = store.load();
    tracing::info!(links = history.len(), path = %store.path().display(), "Loaded history");

    let digest = digest::collect(fetcher, &config.topics, &history, config.empty_topics).await;
    let entries = digest.entry_count();
    let new_links = digest.new_links().len();

    if !digest.has_news() {
        return RunReport::new(RunStatus::NothingNew, entries, new_links);
    }

    let composition = composer.compose(&digest).await;

    let outbox = match delivery {
        Delivery::Mail(outbox) => outbox,
        Delivery::DryRun => {
            let mut report = RunReport::new(RunStatus::DryRun, entries, new_links);
            report.html = Some(composition.html);
            return report;
        }
    };

    let subject = dated_title(&config.email.subject, Local::now().date_naive());
    if !outbox.deliver(&subject, &composition.html).await {
        return RunReport::new(RunStatus::DeliveryFailed, entries, new_links);
    }

    if composition.is_failure() {
        return RunReport::new(RunStatus::SentErrorNotice, entries, new_links);
    }

    match store.commit(&history, digest.new_links()) {
        Ok(saved) => {
            let mut report = RunReport::new(RunStatus::Delivered, entries, new_links);
            report.history_len = Some(saved.len());
            report
        }
        Err(e) => {
            tracing::error!(path = %store.path().display(), error = %e, "Failed to save history");
            RunReport::new(RunStatus::HistoryNotSaved, entries, new_links)
        }
    }
}
