// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key provisioning.
//!
//! Produces one [`CipherSuite`] per store name, loading its keysets from the
//! reserved entries of the backing file or generating and persisting them on
//! first use. Suites are memoized: concurrent callers for the same store share
//! one initialization, so key material is generated at most once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use ring::rand::SystemRandom;
use tokio::sync::OnceCell;

use super::cipher::{CipherSuite, CryptoError, KEY_CIPHER_MATERIAL_LEN, VALUE_CIPHER_MATERIAL_LEN};
use super::keyset::Keyset;
use super::master_key::MasterKey;
use crate::config::{KeyEncryptionScheme, ValueEncryptionScheme};
use crate::prefs::ReservedKeySet;
use crate::storage::{BackendError, PreferenceBackend, WriteBatch};

#[derive(Debug, thiserror::Error)]
pub enum KeyProvisioningError {
    #[error("keyset {entry} could not be opened: {source}")]
    Keyset {
        entry: String,
        #[source]
        source: CryptoError,
    },

    #[error("keyset {entry} uses scheme {found}, expected {expected}")]
    SchemeMismatch {
        entry: String,
        expected: String,
        found: String,
    },

    #[error("cryptographic failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("backing store error: {0}")]
    Backend(#[from] BackendError),

    #[error("backing store did not persist new keysets")]
    NotPersisted,

    #[error("provisioning task failed: {0}")]
    Task(String),
}

type SuiteCell = Arc<OnceCell<Arc<CipherSuite>>>;

/// Memo key: store name plus the address of the backend holding its keysets.
type SuiteKey = (String, usize);

struct SuiteSlot {
    backend: Weak<dyn PreferenceBackend>,
    cell: SuiteCell,
}

fn backend_identity(backend: &Arc<dyn PreferenceBackend>) -> usize {
    Arc::as_ptr(backend) as *const () as usize
}

pub struct KeyProvisioner {
    master_key: Arc<MasterKey>,
    reserved: ReservedKeySet,
    suites: Mutex<HashMap<SuiteKey, SuiteSlot>>,
}

impl KeyProvisioner {
    pub fn new(master_key: MasterKey) -> Self {
        Self {
            master_key: Arc::new(master_key),
            reserved: ReservedKeySet::default(),
            suites: Mutex::new(HashMap::new()),
        }
    }

    /// Use custom entry names for the persisted keysets.
    pub fn with_reserved_keys(mut self, reserved: ReservedKeySet) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn reserved_keys(&self) -> &ReservedKeySet {
        &self.reserved
    }

    /// Get the cipher suite for `store_name` over `backend`, creating it on
    /// first use.
    ///
    /// Memoized per store name and backend instance: the keysets live in the
    /// backend, so a different backend under the same name is provisioned
    /// from its own entries. Later calls for the same pair return the first
    /// suite regardless of the schemes they pass.
    pub async fn get_or_create_cipher_suite(
        &self,
        store_name: &str,
        backend: Arc<dyn PreferenceBackend>,
        key_scheme: KeyEncryptionScheme,
        value_scheme: ValueEncryptionScheme,
    ) -> Result<Arc<CipherSuite>, KeyProvisioningError> {
        let cell = {
            let mut suites = self.suites.lock().unwrap_or_else(PoisonError::into_inner);
            // A dropped backend's address may be reused by a new one.
            suites.retain(|_, slot| slot.backend.strong_count() > 0);
            suites
                .entry((store_name.to_string(), backend_identity(&backend)))
                .or_insert_with(|| SuiteSlot {
                    backend: Arc::downgrade(&backend),
                    cell: SuiteCell::default(),
                })
                .cell
                .clone()
        };

        let suite = cell
            .get_or_try_init(|| async {
                let master_key = self.master_key.clone();
                let reserved = self.reserved.clone();
                let name = store_name.to_string();
                tokio::task::spawn_blocking(move || {
                    load_or_create(
                        &master_key,
                        &reserved,
                        &name,
                        backend.as_ref(),
                        key_scheme,
                        value_scheme,
                    )
                })
                .await
                .map_err(|e| KeyProvisioningError::Task(e.to_string()))?
            })
            .await?;

        Ok(suite.clone())
    }
}

impl std::fmt::Debug for KeyProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyProvisioner")
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

fn wrap_context(store_name: &str, entry: &str) -> Vec<u8> {
    let mut context = Vec::with_capacity(store_name.len() + 1 + entry.len());
    context.extend_from_slice(store_name.as_bytes());
    context.push(0);
    context.extend_from_slice(entry.as_bytes());
    context
}

/// Blocking: may commit to the backend.
fn load_or_create(
    master_key: &MasterKey,
    reserved: &ReservedKeySet,
    store_name: &str,
    backend: &dyn PreferenceBackend,
    key_scheme: KeyEncryptionScheme,
    value_scheme: ValueEncryptionScheme,
) -> Result<Arc<CipherSuite>, KeyProvisioningError> {
    let rng = SystemRandom::new();
    let mut batch = WriteBatch::new();

    let key_keyset = load_or_generate(
        master_key,
        backend,
        store_name,
        reserved.key_keyset(),
        key_scheme.as_str(),
        KEY_CIPHER_MATERIAL_LEN,
        &rng,
        &mut batch,
    )?;
    let value_keyset = load_or_generate(
        master_key,
        backend,
        store_name,
        reserved.value_keyset(),
        value_scheme.as_str(),
        VALUE_CIPHER_MATERIAL_LEN,
        &rng,
        &mut batch,
    )?;

    if batch.is_empty() {
        tracing::debug!(store = store_name, "Loaded existing keysets");
    } else {
        let generated = batch.len();
        if !backend.commit(batch)? {
            return Err(KeyProvisioningError::NotPersisted);
        }
        tracing::info!(store = store_name, generated, "Generated and persisted new keysets");
    }

    Ok(Arc::new(CipherSuite::new(
        store_name,
        &key_keyset,
        &value_keyset,
    )?))
}

#[allow(clippy::too_many_arguments)]
fn load_or_generate(
    master_key: &MasterKey,
    backend: &dyn PreferenceBackend,
    store_name: &str,
    entry: &str,
    scheme: &str,
    material_len: usize,
    rng: &SystemRandom,
    batch: &mut WriteBatch,
) -> Result<Keyset, KeyProvisioningError> {
    let context = wrap_context(store_name, entry);
    let keyset_error = |source: CryptoError| KeyProvisioningError::Keyset {
        entry: entry.to_string(),
        source,
    };

    match backend.get(entry)? {
        Some(wrapped) => {
            let keyset = master_key
                .open_keyset(&wrapped, &context)
                .map_err(keyset_error)?;
            if keyset.scheme != scheme {
                return Err(KeyProvisioningError::SchemeMismatch {
                    entry: entry.to_string(),
                    expected: scheme.to_string(),
                    found: keyset.scheme,
                });
            }
            keyset.validate(material_len).map_err(keyset_error)?;
            Ok(keyset)
        }
        None => {
            let keyset = Keyset::generate(scheme, material_len, rng)?;
            batch.stage_put(entry, master_key.seal_keyset(&keyset, &context)?);
            Ok(keyset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::{KEY_KEYSET_ENTRY, VALUE_KEYSET_ENTRY};
    use crate::storage::MemoryBackend;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    const MASTER: [u8; 32] = [7u8; 32];

    fn provisioner() -> KeyProvisioner {
        KeyProvisioner::new(MasterKey::from_bytes(&MASTER).unwrap())
    }

    #[derive(Default)]
    struct CountingBackend {
        inner: MemoryBackend,
        commits: AtomicUsize,
    }

    impl PreferenceBackend for CountingBackend {
        fn snapshot_all(&self) -> Result<BTreeMap<String, String>, BackendError> {
            self.inner.snapshot_all()
        }

        fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
            self.inner.get(key)
        }

        fn commit(&self, batch: WriteBatch) -> Result<bool, BackendError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            self.inner.commit(batch)
        }

        fn apply(&self, batch: WriteBatch) {
            self.inner.apply(batch)
        }

        fn subscribe(&self) -> broadcast::Receiver<String> {
            self.inner.subscribe()
        }
    }

    async fn suite_for(
        provisioner: &KeyProvisioner,
        name: &str,
        backend: Arc<dyn PreferenceBackend>,
    ) -> Result<Arc<CipherSuite>, KeyProvisioningError> {
        provisioner
            .get_or_create_cipher_suite(
                name,
                backend,
                KeyEncryptionScheme::default(),
                ValueEncryptionScheme::default(),
            )
            .await
    }

    #[tokio::test]
    async fn first_use_persists_both_keysets() {
        let backend = Arc::new(MemoryBackend::new());
        suite_for(&provisioner(), "prefs", backend.clone()).await.unwrap();

        let all = backend.snapshot_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key(KEY_KEYSET_ENTRY));
        assert!(all.contains_key(VALUE_KEYSET_ENTRY));
    }

    #[tokio::test]
    async fn suites_are_memoized_per_store_and_backend() {
        let provisioner = provisioner();
        let backend: Arc<dyn PreferenceBackend> = Arc::new(MemoryBackend::new());
        let a = suite_for(&provisioner, "prefs", backend.clone()).await.unwrap();
        let b = suite_for(&provisioner, "prefs", backend.clone()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_generate_keys_once() {
        let provisioner = Arc::new(provisioner());
        let backend = Arc::new(CountingBackend::default());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let provisioner = provisioner.clone();
            let backend: Arc<dyn PreferenceBackend> = backend.clone();
            handles.push(tokio::spawn(async move {
                suite_for(&provisioner, "shared", backend).await.unwrap()
            }));
        }

        let mut suites = Vec::new();
        for handle in handles {
            suites.push(handle.await.unwrap());
        }

        assert_eq!(backend.commits.load(Ordering::SeqCst), 1);
        assert!(suites.iter().all(|s| Arc::ptr_eq(s, &suites[0])));
    }

    #[tokio::test]
    async fn each_backend_gets_its_own_keysets() {
        let shared = provisioner();
        let first = Arc::new(MemoryBackend::new());
        let second = Arc::new(MemoryBackend::new());
        let a = suite_for(&shared, "prefs", first.clone()).await.unwrap();
        let b = suite_for(&shared, "prefs", second.clone()).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(second.get(KEY_KEYSET_ENTRY).unwrap().is_some());
        assert!(second.get(VALUE_KEYSET_ENTRY).unwrap().is_some());

        // The second backend's keys are the ones a restart will load.
        let stored = b.encrypt_key("k").unwrap();
        let reloaded = suite_for(&provisioner(), "prefs", second)
            .await
            .unwrap();
        assert_eq!(reloaded.decrypt_key(&stored).unwrap(), "k");
    }

    #[tokio::test]
    async fn dropped_backend_is_not_reused() {
        let provisioner = provisioner();
        let backend: Arc<dyn PreferenceBackend> = Arc::new(MemoryBackend::new());
        suite_for(&provisioner, "prefs", backend.clone()).await.unwrap();
        drop(backend);

        let fresh = Arc::new(MemoryBackend::new());
        suite_for(&provisioner, "prefs", fresh.clone()).await.unwrap();
        assert!(fresh.get(KEY_KEYSET_ENTRY).unwrap().is_some());
    }

    #[tokio::test]
    async fn keysets_are_reloaded_by_a_new_provisioner() {
        let backend: Arc<dyn PreferenceBackend> = Arc::new(MemoryBackend::new());
        let first = suite_for(&provisioner(), "prefs", backend.clone()).await.unwrap();
        let second = suite_for(&provisioner(), "prefs", backend.clone()).await.unwrap();

        let stored = first.encrypt_key("k").unwrap();
        assert_eq!(second.encrypt_key("k").unwrap(), stored);
        assert_eq!(second.decrypt_key(&stored).unwrap(), "k");
    }

    #[tokio::test]
    async fn wrong_master_key_is_rejected() {
        let backend: Arc<dyn PreferenceBackend> = Arc::new(MemoryBackend::new());
        suite_for(&provisioner(), "prefs", backend.clone()).await.unwrap();

        let other = KeyProvisioner::new(MasterKey::from_bytes(&[9u8; 32]).unwrap());
        let err = suite_for(&other, "prefs", backend).await.unwrap_err();
        assert!(matches!(
            err,
            KeyProvisioningError::Keyset { source: CryptoError::Decrypt, .. }
        ));
    }

    #[tokio::test]
    async fn keysets_are_bound_to_store_name() {
        let backend: Arc<dyn PreferenceBackend> = Arc::new(MemoryBackend::new());
        suite_for(&provisioner(), "one", backend.clone()).await.unwrap();

        let err = suite_for(&provisioner(), "two", backend).await.unwrap_err();
        assert!(matches!(err, KeyProvisioningError::Keyset { .. }));
    }

    #[tokio::test]
    async fn scheme_mismatch_is_rejected() {
        let master = MasterKey::from_bytes(&MASTER).unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let keyset = Keyset::generate("OTHER", VALUE_CIPHER_MATERIAL_LEN, &SystemRandom::new()).unwrap();
        let wrapped = master
            .seal_keyset(&keyset, &wrap_context("prefs", VALUE_KEYSET_ENTRY))
            .unwrap();
        let mut batch = WriteBatch::new();
        batch.stage_put(VALUE_KEYSET_ENTRY, wrapped);
        backend.commit(batch).unwrap();

        let err = suite_for(&provisioner(), "prefs", backend).await.unwrap_err();
        assert!(matches!(err, KeyProvisioningError::SchemeMismatch { .. }));
    }
}
