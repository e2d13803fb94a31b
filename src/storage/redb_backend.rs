// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! File-backed preference map on redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `prefs`: raw (encrypted) key → raw (encrypted) value
//!
//! ## Write Path
//!
//! All entries are loaded into an in-memory view at open. Every batch is
//! applied to the view synchronously, then queued to a single background
//! writer task which persists batches one redb write transaction at a time,
//! in submission order.
//!
//! A `commit` whose write fails restores the keys it touched in the view,
//! unless a later write has replaced them. Its keys reach the change feed only
//! after the write succeeds.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::backend::{BackendError, BackendResult, PreferenceBackend, WriteBatch};

/// Raw key → raw value.
const PREFS: TableDefinition<&str, &str> = TableDefinition::new("prefs");

const CHANGE_FEED_CAPACITY: usize = 256;

/// Persists one batch durably. Runs on the blocking pool.
type Persist = Arc<dyn Fn(&WriteBatch) -> BackendResult<()> + Send + Sync>;

/// Values a batch replaced in the view, restored if its commit fails.
type Previous = Vec<(String, Option<String>)>;

struct WriteRequest {
    batch: WriteBatch,
    ack: Option<oneshot::Sender<BackendResult<()>>>,
}

pub struct RedbBackend {
    view: RwLock<BTreeMap<String, String>>,
    writer: Mutex<Option<mpsc::UnboundedSender<WriteRequest>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    changes: broadcast::Sender<String>,
}

impl RedbBackend {
    /// Open (or create) the store file at `path`.
    ///
    /// Must be called from within a Tokio runtime; the background writer is
    /// spawned on it.
    pub fn open(path: &Path) -> BackendResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BackendError::NoRuntime)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create the table so read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PREFS)?;
        }
        write_txn.commit()?;

        let entries = load_entries(&db)?;
        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            "Opened preference file"
        );

        let db = Arc::new(db);
        let persist: Persist = Arc::new(move |batch: &WriteBatch| write_batch(&db, batch));
        Ok(Self::start(&runtime, entries, persist))
    }

    fn start(
        runtime: &tokio::runtime::Handle,
        entries: BTreeMap<String, String>,
        persist: Persist,
    ) -> Self {
        let (writer, rx) = mpsc::unbounded_channel();
        let writer_task = runtime.spawn(run_writer(persist, rx));
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);

        Self {
            view: RwLock::new(entries),
            writer: Mutex::new(Some(writer)),
            writer_task: Mutex::new(Some(writer_task)),
            changes,
        }
    }

    /// Stop accepting writes and wait until every queued batch is persisted.
    ///
    /// The database file is released once this returns.
    pub async fn shutdown(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.take();
        }
        let task = self.writer_task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Preference writer task ended abnormally");
            }
        }
    }

    /// Apply `batch` to the view and queue it for the writer.
    ///
    /// Returns the values the batch replaced.
    fn submit(
        &self,
        batch: WriteBatch,
        ack: Option<oneshot::Sender<BackendResult<()>>>,
    ) -> BackendResult<Previous> {
        // View update and enqueue happen under one lock so the queue
        // order matches the order writes became visible.
        let mut view = self.view.write().map_err(|_| BackendError::Poisoned)?;
        let writer = self.writer.lock().map_err(|_| BackendError::Poisoned)?;
        let writer = writer.as_ref().ok_or(BackendError::WriterClosed)?;

        let previous = batch
            .keys()
            .map(|key| (key.clone(), view.get(key).cloned()))
            .collect();
        batch.apply_to(&mut view);
        writer
            .send(WriteRequest { batch, ack })
            .map_err(|_| BackendError::WriterClosed)?;
        Ok(previous)
    }

    fn publish(&self, batch: &WriteBatch) {
        for key in batch.keys() {
            let _ = self.changes.send(key.clone());
        }
    }

    /// Undo a failed commit in the view.
    ///
    /// Keys a later write has since changed are left alone.
    fn roll_back(&self, batch: &WriteBatch, previous: Previous) {
        let Ok(mut view) = self.view.write() else {
            return;
        };
        for (key, before) in previous {
            if view.get(&key) != batch.puts().get(&key) {
                continue;
            }
            match before {
                Some(value) => {
                    view.insert(key, value);
                }
                None => {
                    view.remove(&key);
                }
            }
        }
    }
}

impl PreferenceBackend for RedbBackend {
    fn snapshot_all(&self) -> BackendResult<BTreeMap<String, String>> {
        let view = self.view.read().map_err(|_| BackendError::Poisoned)?;
        Ok(view.clone())
    }

    fn get(&self, key: &str) -> BackendResult<Option<String>> {
        let view = self.view.read().map_err(|_| BackendError::Poisoned)?;
        Ok(view.get(key).cloned())
    }

    /// Durable write. The view and change feed only keep the batch once the
    /// writer has persisted it.
    fn commit(&self, batch: WriteBatch) -> BackendResult<bool> {
        let (ack, done) = oneshot::channel();
        let written = batch.clone();
        let previous = self.submit(batch, Some(ack))?;

        let result = done
            .blocking_recv()
            .map_err(|_| BackendError::WriterClosed)
            .and_then(|r| r);
        match result {
            Ok(()) => {
                self.publish(&written);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, entries = written.len(), "Commit failed to persist");
                self.roll_back(&written, previous);
                Err(e)
            }
        }
    }

    fn apply(&self, batch: WriteBatch) {
        let keys = batch.clone();
        match self.submit(batch, None) {
            Ok(_) => self.publish(&keys),
            Err(e) => tracing::warn!(error = %e, "Failed to queue preference write"),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

fn load_entries(db: &Database) -> BackendResult<BTreeMap<String, String>> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(PREFS)?;
    let mut entries = BTreeMap::new();
    for entry in table.iter()? {
        let (key, value) = entry?;
        entries.insert(key.value().to_string(), value.value().to_string());
    }
    Ok(entries)
}

fn write_batch(db: &Database, batch: &WriteBatch) -> BackendResult<()> {
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(PREFS)?;
        for key in batch.removes() {
            table.remove(key.as_str())?;
        }
        for (key, value) in batch.puts() {
            table.insert(key.as_str(), value.as_str())?;
        }
    }
    write_txn.commit()?;
    Ok(())
}

async fn run_writer(persist: Persist, mut rx: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(WriteRequest { batch, ack }) = rx.recv().await {
        let persist = persist.clone();
        let size = batch.len();
        let result = tokio::task::spawn_blocking(move || persist(&batch))
            .await
            .map_err(|e| BackendError::Task(e.to_string()))
            .and_then(|r| r);

        match ack {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, entries = size, "Background apply failed to persist");
                }
            }
        }
    }
    tracing::debug!("Preference writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.redb");
        (dir, path)
    }

    async fn commit_blocking(backend: &Arc<RedbBackend>, batch: WriteBatch) -> bool {
        let backend = backend.clone();
        tokio::task::spawn_blocking(move || backend.commit(batch))
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn open_outside_runtime_fails() {
        let (_dir, path) = temp_path();
        assert!(matches!(
            RedbBackend::open(&path),
            Err(BackendError::NoRuntime)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn committed_entries_survive_reopen() {
        let (_dir, path) = temp_path();
        let backend = Arc::new(RedbBackend::open(&path).unwrap());

        let mut batch = WriteBatch::new();
        batch.stage_put("k1", "v1");
        batch.stage_put("k2", "v2");
        assert!(commit_blocking(&backend, batch).await);
        backend.shutdown().await;

        let reopened = RedbBackend::open(&path).unwrap();
        let all = reopened.snapshot_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("k1").map(String::as_str), Some("v1"));
        reopened.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn applies_persist_in_order_before_commit() {
        let (_dir, path) = temp_path();
        let backend = Arc::new(RedbBackend::open(&path).unwrap());

        for i in 0..10 {
            let mut batch = WriteBatch::new();
            batch.stage_put("counter", i.to_string());
            backend.apply(batch);
        }
        // Visible before anything is durable
        assert_eq!(backend.get("counter").unwrap(), Some("9".to_string()));

        let mut batch = WriteBatch::new();
        batch.stage_remove("absent");
        assert!(commit_blocking(&backend, batch).await);
        backend.shutdown().await;

        let reopened = RedbBackend::open(&path).unwrap();
        assert_eq!(reopened.get("counter").unwrap(), Some("9".to_string()));
        reopened.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removes_are_persisted() {
        let (_dir, path) = temp_path();
        let backend = Arc::new(RedbBackend::open(&path).unwrap());

        let mut batch = WriteBatch::new();
        batch.stage_put("a", "1");
        batch.stage_put("b", "2");
        commit_blocking(&backend, batch).await;

        let mut batch = WriteBatch::new();
        batch.stage_remove("a");
        commit_blocking(&backend, batch).await;
        backend.shutdown().await;

        let reopened = RedbBackend::open(&path).unwrap();
        assert!(!reopened.contains("a").unwrap());
        assert!(reopened.contains("b").unwrap());
        reopened.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_after_shutdown_are_rejected() {
        let (_dir, path) = temp_path();
        let backend = Arc::new(RedbBackend::open(&path).unwrap());
        backend.shutdown().await;

        let mut batch = WriteBatch::new();
        batch.stage_put("a", "1");
        let result = {
            let backend = backend.clone();
            tokio::task::spawn_blocking(move || backend.commit(batch))
                .await
                .unwrap()
        };
        assert!(matches!(result, Err(BackendError::WriterClosed)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn change_feed_reports_raw_keys() {
        let (_dir, path) = temp_path();
        let backend = RedbBackend::open(&path).unwrap();
        let mut rx = backend.subscribe();

        let mut batch = WriteBatch::new();
        batch.stage_put("raw-key", "raw-value");
        backend.apply(batch);

        assert_eq!(rx.recv().await.unwrap(), "raw-key");
        backend.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_commit_restores_the_view() {
        // Batches touching "b" fail to persist
        let persist: Persist = Arc::new(|batch: &WriteBatch| {
            if batch.puts().contains_key("b") {
                Err(BackendError::Io(std::io::Error::other("disk full")))
            } else {
                Ok(())
            }
        });
        let backend = Arc::new(RedbBackend::start(
            &tokio::runtime::Handle::current(),
            BTreeMap::from([("gone".to_string(), "x".to_string())]),
            persist,
        ));
        let mut rx = backend.subscribe();

        let mut batch = WriteBatch::new();
        batch.stage_put("a", "1");
        backend.apply(batch);

        let mut batch = WriteBatch::new();
        batch.stage_put("a", "2");
        batch.stage_put("b", "new");
        batch.stage_remove("gone");
        let result = {
            let backend = backend.clone();
            tokio::task::spawn_blocking(move || backend.commit(batch))
                .await
                .unwrap()
        };
        assert!(matches!(result, Err(BackendError::Io(_))));

        assert_eq!(backend.get("a").unwrap(), Some("1".to_string()));
        assert!(!backend.contains("b").unwrap());
        assert_eq!(backend.get("gone").unwrap(), Some("x".to_string()));

        // Only the apply reached the change feed
        assert_eq!(rx.recv().await.unwrap(), "a");
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        backend.shutdown().await;
    }
}
