//! Bounded record of links that have already been delivered.
//!
//! The history is an insertion-ordered set: [`History`] is an immutable
//! snapshot loaded once per run, and [`HistoryStore::commit`] persists that
//! snapshot plus the run's delta of newly seen links. When the set grows past
//! the cap, the oldest-inserted links are dropped first.
//!
//! On disk it is a plain JSON array of strings, rewritten in full each time.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum number of links retained across runs.
pub const DEFAULT_HISTORY_CAP: usize = 1000;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Failed to write history file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Insertion-ordered set of seen links.
#[derive(Debug, Clone, Default)]
pub struct History {
    order: Vec<String>,
    index: HashSet<String>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, link: &str) -> bool {
        self.index.contains(link)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Links from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Returns a new snapshot with `new_links` appended. Links already
    /// present keep their original position.
    pub fn merged<I, S>(&self, new_links: I) -> History
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.extend(new_links);
        next
    }

    /// Returns the newest `cap` links as a new snapshot.
    pub fn trimmed(&self, cap: usize) -> History {
        let skip = self.order.len().saturating_sub(cap);
        self.order[skip..].iter().cloned().collect()
    }

    fn push(&mut self, link: String) {
        if self.index.insert(link.clone()) {
            self.order.push(link);
        }
    }
}

impl<S: Into<String>> Extend<S> for History {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for link in iter {
            self.push(link.into());
        }
    }
}

impl<S: Into<String>> FromIterator<S> for History {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut history = History::new();
        history.extend(iter);
        history
    }
}

impl PartialEq for History {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for History {}

/// File-backed persistence for [`History`].
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    cap: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap: cap.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted history.
    ///
    /// A missing, unreadable or malformed file yields an empty history; the
    /// worst outcome is a digest that repeats items already sent.
    pub fn load(&self) -> History {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No history file, starting empty");
                return History::new();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read history, starting empty");
                return History::new();
            }
        };

        match serde_json::from_str::<Vec<String>>(&content) {
            Ok(links) => {
                let history: History = links.into_iter().collect();
                tracing::debug!(path = %self.path.display(), links = history.len(), "Loaded history");
                history
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "History file is malformed, starting empty");
                History::new()
            }
        }
    }

    /// Trims `history` to the newest `cap` links and overwrites the file.
    ///
    /// Returns the number of links written.
    pub fn save(&self, history: &History) -> Result<usize, HistoryError> {
        let trimmed = history.trimmed(self.cap);
        let links: Vec<&str> = trimmed.iter().collect();
        let json = serde_json::to_vec_pretty(&links)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| HistoryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        atomic_write(&self.path, &json)?;

        if trimmed.len() < history.len() {
            tracing::debug!(
                dropped = history.len() - trimmed.len(),
                cap = self.cap,
                "Evicted oldest history entries"
            );
        }
        tracing::info!(path = %self.path.display(), links = trimmed.len(), "Saved history");
        Ok(trimmed.len())
    }

    /// Persists `snapshot` plus `new_links` and returns what was written.
    pub fn commit(&self, snapshot: &History, new_links: &[String]) -> Result<History, HistoryError> {
        let next = snapshot.merged(new_links.iter().cloned()).trimmed(self.cap);
        self.save(&next)?;
        Ok(next)
    }
}

/// Write-to-temp-then-rename so a crash never leaves a truncated history.
fn atomic_write(dst: &Path, content: &[u8]) -> Result<(), HistoryError> {
    use std::time::{SystemTime, UNIX_EPOCH};
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{:016x}", random_suffix));

    let io_err = |source| HistoryError::Io {
        path: temp_path.clone(),
        source,
    };

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(io_err)?;

    let written = temp_file
        .write_all(content)
        .and_then(|_| temp_file.sync_all());
    drop(temp_file);

    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_err(e));
    }

    // On Windows, rename fails if destination exists
    #[cfg(windows)]
    if dst.exists() {
        if let Err(e) = std::fs::remove_file(dst) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(HistoryError::Io {
                path: dst.to_path_buf(),
                source: e,
            });
        }
    }

    std::fs::rename(&temp_path, dst).map_err(|source| {
        let _ = std::fs::remove_file(&temp_path);
        HistoryError::Io {
            path: dst.to_path_buf(),
            source,
        }
    })
}
