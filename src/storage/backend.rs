// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Backing persistence primitive.
//!
//! A flat `String -> String` map with batched writes. The encrypted store
//! only ever hands it ciphertext; it knows nothing about types or keys.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no Tokio runtime available to run the background writer")]
    NoRuntime,

    #[error("background writer has shut down")]
    WriterClosed,

    #[error("persistence task failed: {0}")]
    Task(String),

    #[error("backing store lock poisoned")]
    Poisoned,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Staged puts and removes applied atomically by a backend.
///
/// The last staged operation for a key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    puts: BTreeMap<String, String>,
    removes: BTreeSet<String>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage_put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.removes.remove(&key);
        self.puts.insert(key, value.into());
    }

    pub fn stage_remove(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.puts.remove(&key);
        self.removes.insert(key);
    }

    pub fn puts(&self) -> &BTreeMap<String, String> {
        &self.puts
    }

    pub fn removes(&self) -> &BTreeSet<String> {
        &self.removes
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.removes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.puts.len() + self.removes.len()
    }

    /// Raw keys touched by this batch.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.removes.iter().chain(self.puts.keys())
    }

    /// Apply to an in-memory view.
    pub fn apply_to(&self, entries: &mut BTreeMap<String, String>) {
        for key in &self.removes {
            entries.remove(key);
        }
        for (key, value) in &self.puts {
            entries.insert(key.clone(), value.clone());
        }
    }
}

/// A string-keyed, string-valued persistent map.
///
/// Reads are served from an in-memory view. `commit` blocks until the batch
/// is durable and must be called from a blocking context; `apply` updates
/// the view immediately and persists in the background. Writes persist in
/// submission order, so a `commit` is durable only after every earlier
/// `apply`.
pub trait PreferenceBackend: Send + Sync {
    fn snapshot_all(&self) -> BackendResult<BTreeMap<String, String>>;

    fn get(&self, key: &str) -> BackendResult<Option<String>>;

    fn contains(&self, key: &str) -> BackendResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn commit(&self, batch: WriteBatch) -> BackendResult<bool>;

    fn apply(&self, batch: WriteBatch);

    /// Native change feed: one raw key per changed entry, after each write
    /// reaches the in-memory view.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_staged_operation_wins() {
        let mut batch = WriteBatch::new();
        batch.stage_put("a", "1");
        batch.stage_remove("a");
        batch.stage_remove("b");
        batch.stage_put("b", "2");

        assert!(batch.removes().contains("a"));
        assert!(!batch.puts().contains_key("a"));
        assert_eq!(batch.puts().get("b").map(String::as_str), Some("2"));
        assert!(!batch.removes().contains("b"));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn apply_to_updates_view() {
        let mut entries = BTreeMap::from([
            ("keep".to_string(), "k".to_string()),
            ("drop".to_string(), "d".to_string()),
        ]);
        let mut batch = WriteBatch::new();
        batch.stage_remove("drop");
        batch.stage_put("new", "n");
        batch.apply_to(&mut entries);

        assert_eq!(entries.len(), 2);
        assert!(entries.contains_key("keep"));
        assert!(entries.contains_key("new"));
        assert!(!entries.contains_key("drop"));
    }

    #[test]
    fn empty_batch_reports_empty() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.keys().count(), 0);
    }
}
