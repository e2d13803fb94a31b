// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory backend. Nothing survives the process; useful for tests and
//! ephemeral stores.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tokio::sync::broadcast;

use super::backend::{BackendError, BackendResult, PreferenceBackend, WriteBatch};

const CHANGE_FEED_CAPACITY: usize = 256;

pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
    changes: broadcast::Sender<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    fn write(&self, batch: &WriteBatch) -> BackendResult<()> {
        {
            let mut entries = self.entries.write().map_err(|_| BackendError::Poisoned)?;
            batch.apply_to(&mut entries);
        }
        for key in batch.keys() {
            // No subscribers is fine.
            let _ = self.changes.send(key.clone());
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PreferenceBackend for MemoryBackend {
    fn snapshot_all(&self) -> BackendResult<BTreeMap<String, String>> {
        let entries = self.entries.read().map_err(|_| BackendError::Poisoned)?;
        Ok(entries.clone())
    }

    fn get(&self, key: &str) -> BackendResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| BackendError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn commit(&self, batch: WriteBatch) -> BackendResult<bool> {
        self.write(&batch)?;
        Ok(true)
    }

    fn apply(&self, batch: WriteBatch) {
        if let Err(e) = self.write(&batch) {
            tracing::warn!(error = %e, "In-memory apply failed");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}
