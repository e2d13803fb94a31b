// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Write transactions.
//!
//! An [`Editor`] stages puts, removes and an optional clear, then hands the
//! whole change set to the backend as one [`WriteBatch`]. A clear always
//! runs first: it only drops entries that existed before this transaction,
//! so puts staged in the same transaction survive it regardless of the
//! order in which `clear` and `put_*` were called.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::key::PrefKey;
use super::store::StoreShared;
use crate::codec::{self, StringSet, TypedValue};
use crate::error::PrefsResult;
use crate::storage::{BackendError, WriteBatch};

enum StagedOp {
    Put(String),
    Remove,
}

/// A pending transaction against an [`EncryptedStore`](super::EncryptedStore).
///
/// Reusable: committing or applying resets the staged state.
pub struct Editor {
    shared: Arc<StoreShared>,
    staged: BTreeMap<String, StagedOp>,
    changed: Vec<Option<String>>,
    changed_stored: HashSet<String>,
    clear_requested: bool,
}

/// Staged state taken out of an editor, ready to be written.
struct Prepared {
    batch: WriteBatch,
    changed: Vec<Option<String>>,
}

impl Editor {
    pub(crate) fn new(shared: Arc<StoreShared>) -> Self {
        Self {
            shared,
            staged: BTreeMap::new(),
            changed: Vec::new(),
            changed_stored: HashSet::new(),
            clear_requested: false,
        }
    }

    pub fn put<'k>(
        &mut self,
        key: impl Into<PrefKey<'k>>,
        value: TypedValue,
    ) -> PrefsResult<&mut Self> {
        let key = key.into();
        let stored_key = self.shared.resolve(key)?;
        let stored_value = self
            .shared
            .suite
            .encrypt_value(&stored_key, &codec::encode(&value))?;

        self.mark_changed(key, &stored_key);
        self.staged.insert(stored_key, StagedOp::Put(stored_value));
        Ok(self)
    }

    pub fn put_string<'k>(
        &mut self,
        key: impl Into<PrefKey<'k>>,
        value: Option<&str>,
    ) -> PrefsResult<&mut Self> {
        self.put(key, TypedValue::String(value.map(str::to_string)))
    }

    pub fn put_string_set<'k>(
        &mut self,
        key: impl Into<PrefKey<'k>>,
        value: Option<StringSet>,
    ) -> PrefsResult<&mut Self> {
        self.put(key, TypedValue::StringSet(value))
    }

    pub fn put_int<'k>(&mut self, key: impl Into<PrefKey<'k>>, value: i32) -> PrefsResult<&mut Self> {
        self.put(key, TypedValue::Int(value))
    }

    pub fn put_long<'k>(&mut self, key: impl Into<PrefKey<'k>>, value: i64) -> PrefsResult<&mut Self> {
        self.put(key, TypedValue::Long(value))
    }

    pub fn put_float<'k>(&mut self, key: impl Into<PrefKey<'k>>, value: f32) -> PrefsResult<&mut Self> {
        self.put(key, TypedValue::Float(value))
    }

    pub fn put_boolean<'k>(
        &mut self,
        key: impl Into<PrefKey<'k>>,
        value: bool,
    ) -> PrefsResult<&mut Self> {
        self.put(key, TypedValue::Boolean(value))
    }

    /// Stage removal of `key`.
    ///
    /// Only reported to listeners if the key exists or was put earlier in
    /// this transaction.
    pub fn remove<'k>(&mut self, key: impl Into<PrefKey<'k>>) -> PrefsResult<&mut Self> {
        let key = key.into();
        let stored_key = self.shared.resolve(key)?;

        let staged_put = matches!(self.staged.get(&stored_key), Some(StagedOp::Put(_)));
        if staged_put || self.shared.backend.contains(&stored_key)? {
            self.mark_changed(key, &stored_key);
        }
        self.staged.insert(stored_key, StagedOp::Remove);
        Ok(self)
    }

    /// Stage removal of every entry that existed before this transaction.
    pub fn clear(&mut self) -> &mut Self {
        self.clear_requested = true;
        self
    }

    /// True if anything is staged.
    pub fn has_pending_changes(&self) -> bool {
        self.clear_requested || !self.staged.is_empty()
    }

    /// Persist the transaction and wait for it to be durable.
    ///
    /// Returns the backend's success flag. Listeners are notified after a
    /// successful write.
    pub async fn commit(&mut self) -> PrefsResult<bool> {
        let Prepared { batch, changed } = self.prepare()?;
        let operations = batch.len();

        let backend = self.shared.backend.clone();
        let written = tokio::task::spawn_blocking(move || backend.commit(batch))
            .await
            .map_err(|e| BackendError::Task(e.to_string()))??;

        tracing::debug!(
            store = %self.shared.name,
            operations,
            changed = changed.len(),
            written,
            "Committed preference transaction"
        );

        if written {
            self.shared.listeners.notify(changed);
        }
        Ok(written)
    }

    /// Make the transaction visible immediately and persist it in the
    /// background.
    ///
    /// Persistence failures are logged, not returned.
    pub fn apply(&mut self) -> PrefsResult<()> {
        let Prepared { batch, changed } = self.prepare()?;

        tracing::debug!(
            store = %self.shared.name,
            operations = batch.len(),
            changed = changed.len(),
            "Applied preference transaction"
        );

        self.shared.backend.apply(batch);
        self.shared.listeners.notify(changed);
        Ok(())
    }

    fn mark_changed(&mut self, key: PrefKey<'_>, stored_key: &str) {
        if self.changed_stored.insert(stored_key.to_string()) {
            self.changed.push(key.to_owned_key());
        }
    }

    /// Resolve a pending clear against the current contents and take the
    /// staged state, leaving the editor empty.
    fn prepare(&mut self) -> PrefsResult<Prepared> {
        if self.clear_requested {
            let existing = self.shared.backend.snapshot_all()?;
            for stored_key in existing.into_keys() {
                if self.shared.reserved.contains(&stored_key) {
                    continue;
                }
                self.staged.entry(stored_key).or_insert(StagedOp::Remove);
            }
        }

        let mut batch = WriteBatch::new();
        for (stored_key, op) in std::mem::take(&mut self.staged) {
            match op {
                StagedOp::Put(stored_value) => batch.stage_put(stored_key, stored_value),
                StagedOp::Remove => batch.stage_remove(stored_key),
            }
        }

        self.clear_requested = false;
        self.changed_stored.clear();
        Ok(Prepared {
            batch,
            changed: std::mem::take(&mut self.changed),
        })
    }
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("store", &self.shared.name)
            .field("staged", &self.staged.len())
            .field("clear_requested", &self.clear_requested)
            .finish()
    }
}
