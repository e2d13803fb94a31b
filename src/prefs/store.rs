// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read side of the encrypted store.
//!
//! Every lookup encrypts the requested key deterministically and reads the
//! matching ciphertext from the backend, so no full decryption pass is
//! needed. Values are decrypted and decoded on each read; nothing plaintext
//! is cached.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::editor::Editor;
use super::key::{self, PrefKey};
use super::listeners::{ListenerRegistry, StoreListener};
use super::reserved::ReservedKeySet;
use crate::codec::{self, StringSet, TypedValue, ValueType};
use crate::config::StoreConfig;
use crate::crypto::{CipherSuite, KeyProvisioner};
use crate::error::{PrefsError, PrefsResult};
use crate::storage::{PreferenceBackend, RedbBackend};

/// State shared by a store and all of its editors.
pub(crate) struct StoreShared {
    pub(crate) name: String,
    pub(crate) backend: Arc<dyn PreferenceBackend>,
    pub(crate) suite: Arc<CipherSuite>,
    pub(crate) reserved: ReservedKeySet,
    pub(crate) listeners: ListenerRegistry,
}

impl StoreShared {
    /// Map a logical key to its stored form, refusing reserved keys.
    pub(crate) fn resolve(&self, key: PrefKey<'_>) -> PrefsResult<String> {
        let plaintext = key.plaintext();
        if self.reserved.contains(plaintext) {
            return Err(PrefsError::ReservedKey(plaintext.to_string()));
        }
        let stored = self.suite.encrypt_key(plaintext)?;
        if self.reserved.contains(&stored) {
            return Err(PrefsError::ReservedKey(plaintext.to_string()));
        }
        Ok(stored)
    }

    fn read(&self, key: PrefKey<'_>) -> PrefsResult<Option<TypedValue>> {
        let stored_key = self.resolve(key)?;
        let Some(stored_value) = self.backend.get(&stored_key)? else {
            return Ok(None);
        };
        let encoded = self.suite.decrypt_value(&stored_key, &stored_value)?;
        Ok(Some(codec::decode(&encoded)?))
    }
}

/// Typed, encrypted preference store.
///
/// Cheap to clone; clones share the backend, cipher suite and listeners.
#[derive(Clone)]
pub struct EncryptedStore {
    shared: Arc<StoreShared>,
}

impl EncryptedStore {
    /// Open a store over `backend`, provisioning its keys on first use.
    ///
    /// Must be called from within a Tokio runtime: listener callbacks are
    /// dispatched from a task spawned here.
    pub async fn open(
        config: &StoreConfig,
        backend: Arc<dyn PreferenceBackend>,
        provisioner: &KeyProvisioner,
    ) -> PrefsResult<Self> {
        let suite = provisioner
            .get_or_create_cipher_suite(
                &config.name,
                backend.clone(),
                config.key_scheme,
                config.value_scheme,
            )
            .await?;

        tracing::debug!(store = %config.name, "Opened encrypted store");

        Ok(Self {
            shared: Arc::new(StoreShared {
                name: config.name.clone(),
                backend,
                suite,
                reserved: provisioner.reserved_keys().clone(),
                listeners: ListenerRegistry::spawn(),
            }),
        })
    }

    /// Open a redb-backed store at `{data_dir}/{name}.redb`.
    pub async fn open_file(
        config: &StoreConfig,
        data_dir: impl AsRef<Path>,
        provisioner: &KeyProvisioner,
    ) -> PrefsResult<Self> {
        let backend = RedbBackend::open(&config.file_path(data_dir))?;
        Self::open(config, Arc::new(backend), provisioner).await
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Decrypt every entry. Reserved entries are skipped.
    pub fn get_all(&self) -> PrefsResult<BTreeMap<Option<String>, TypedValue>> {
        let entries = self.shared.backend.snapshot_all()?;
        let mut all = BTreeMap::new();

        for (stored_key, stored_value) in entries {
            if self.shared.reserved.contains(&stored_key) {
                continue;
            }
            let key = key::from_plaintext(self.shared.suite.decrypt_key(&stored_key)?);
            let encoded = self.shared.suite.decrypt_value(&stored_key, &stored_value)?;
            all.insert(key, codec::decode(&encoded)?);
        }

        Ok(all)
    }

    /// Read a value of any type, `None` if absent.
    pub fn get<'k>(&self, key: impl Into<PrefKey<'k>>) -> PrefsResult<Option<TypedValue>> {
        self.shared.read(key.into())
    }

    pub fn get_string<'k>(
        &self,
        key: impl Into<PrefKey<'k>>,
        default: Option<&str>,
    ) -> PrefsResult<Option<String>> {
        self.get_typed(
            key.into(),
            ValueType::String,
            default.map(str::to_string),
            |value| match value {
                TypedValue::String(s) => Some(s),
                _ => None,
            },
        )
    }

    pub fn get_string_set<'k>(
        &self,
        key: impl Into<PrefKey<'k>>,
        default: Option<StringSet>,
    ) -> PrefsResult<Option<StringSet>> {
        self.get_typed(key.into(), ValueType::StringSet, default, |value| match value {
            TypedValue::StringSet(set) => Some(set),
            _ => None,
        })
    }

    pub fn get_int<'k>(&self, key: impl Into<PrefKey<'k>>, default: i32) -> PrefsResult<i32> {
        self.get_typed(key.into(), ValueType::Int, default, |value| match value {
            TypedValue::Int(v) => Some(v),
            _ => None,
        })
    }

    pub fn get_long<'k>(&self, key: impl Into<PrefKey<'k>>, default: i64) -> PrefsResult<i64> {
        self.get_typed(key.into(), ValueType::Long, default, |value| match value {
            TypedValue::Long(v) => Some(v),
            _ => None,
        })
    }

    pub fn get_float<'k>(&self, key: impl Into<PrefKey<'k>>, default: f32) -> PrefsResult<f32> {
        self.get_typed(key.into(), ValueType::Float, default, |value| match value {
            TypedValue::Float(v) => Some(v),
            _ => None,
        })
    }

    pub fn get_boolean<'k>(
        &self,
        key: impl Into<PrefKey<'k>>,
        default: bool,
    ) -> PrefsResult<bool> {
        self.get_typed(key.into(), ValueType::Boolean, default, |value| match value {
            TypedValue::Boolean(v) => Some(v),
            _ => None,
        })
    }

    pub fn contains<'k>(&self, key: impl Into<PrefKey<'k>>) -> PrefsResult<bool> {
        let stored_key = self.shared.resolve(key.into())?;
        Ok(self.shared.backend.contains(&stored_key)?)
    }

    /// Start a new transaction.
    pub fn edit(&self) -> Editor {
        Editor::new(self.shared.clone())
    }

    pub fn register_listener(&self, listener: &Arc<dyn StoreListener>) {
        self.shared.listeners.register(listener);
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn StoreListener>) {
        self.shared.listeners.unregister(listener);
    }

    /// Resolves once every notification queued so far has been delivered.
    pub async fn flush_notifications(&self) {
        self.shared.listeners.flush().await;
    }

    fn get_typed<T>(
        &self,
        key: PrefKey<'_>,
        expected: ValueType,
        default: T,
        extract: impl FnOnce(TypedValue) -> Option<T>,
    ) -> PrefsResult<T> {
        let Some(value) = self.shared.read(key)? else {
            return Ok(default);
        };
        let found = value.value_type();
        extract(value).ok_or_else(|| PrefsError::TypeMismatch {
            key: key.to_owned_key(),
            expected,
            found,
        })
    }

    #[cfg(test)]
    pub(crate) fn suite(&self) -> &CipherSuite {
        &self.shared.suite
    }
}

impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStore")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}
