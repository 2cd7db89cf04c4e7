use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info};

use kitabite_curriculum::fsutil::write_json_atomic;

use crate::retrieval::{RankedEntry, rank_by_keyword, rank_by_vector};
use crate::schema::{EntryKey, MemoryEntry};

/// On-disk shapes accepted by [`MemoryStore::load`].  The store always writes
/// a bare array; the wrapped form is what older tooling produced.
#[derive(Deserialize)]
#[serde(untagged)]
enum IndexFile {
    Bare(Vec<MemoryEntry>),
    Wrapped { items: Vec<MemoryEntry> },
}

/// Ordered collection of lesson index entries, persisted as one JSON file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    entries: Vec<MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<MemoryEntry>) -> Self {
        Self { entries }
    }

    /// Read the index at `path`.  A missing file is an empty store; a file
    /// that exists but does not parse is an error.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "memory index absent; starting empty");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading memory index {}", path.display()));
            }
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let parsed: IndexFile = serde_json::from_str(&raw).map_err(|err| {
            anyhow!(
                "memory index {} is corrupt ({err}); rebuild it with `kitabite reindex-memory`",
                path.display()
            )
        })?;
        let entries = match parsed {
            IndexFile::Bare(entries) | IndexFile::Wrapped { items: entries } => entries,
        };
        debug!(path = %path.display(), count = entries.len(), "memory index loaded");
        Ok(Self { entries })
    }

    /// Persist all entries, replacing the previous file atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.entries)
            .await
            .with_context(|| format!("saving memory index {}", path.display()))?;
        info!(path = %path.display(), count = self.entries.len(), "memory index saved");
        Ok(())
    }

    /// Append unconditionally.
    pub fn add_item(&mut self, entry: MemoryEntry) {
        self.entries.push(entry);
    }

    /// Insert `entry`, replacing in place any entry with the same
    /// `(curriculum, module, slug)` key.  Returns `true` when an entry was
    /// replaced.
    pub fn upsert(&mut self, entry: MemoryEntry) -> bool {
        let key = entry.key();
        match self.entries.iter().position(|e| e.key() == key) {
            Some(idx) => {
                self.entries[idx] = entry;
                // Stale duplicates from earlier raw appends collapse onto the
                // replaced slot.
                let mut seen = false;
                self.entries.retain(|e| {
                    if e.key() != key {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
                true
            }
            None => {
                self.entries.push(entry);
                false
            }
        }
    }

    pub fn get(&self, key: &EntryKey) -> Option<&MemoryEntry> {
        self.entries.iter().find(|e| e.key() == *key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn all(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn vector_count(&self) -> usize {
        self.entries.iter().filter(|e| e.has_vector()).count()
    }

    /// Up to `k` entries most similar to the query.
    ///
    /// Uses cosine similarity when `query_vector` is present and at least one
    /// entry carries a vector; otherwise ranks by keyword match on
    /// `query_text`, then recency.
    pub fn search(&self, query_text: &str, query_vector: Option<&[f32]>, k: usize) -> Vec<RankedEntry<'_>> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }
        match query_vector {
            Some(q) if !q.is_empty() && self.vector_count() > 0 => rank_by_vector(&self.entries, q, k),
            _ => rank_by_keyword(&self.entries, query_text, k),
        }
    }
}
