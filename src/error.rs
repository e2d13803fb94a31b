// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::codec::{EncodingError, ValueType};
use crate::crypto::{CryptoError, KeyProvisioningError};
use crate::storage::BackendError;

/// Errors surfaced by [`EncryptedStore`](crate::EncryptedStore) and
/// [`Editor`](crate::Editor).
///
/// Nothing is retried internally; every error reaches the immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    /// A stored value has an unknown type tag or a corrupt payload.
    #[error("stored value could not be decoded: {0}")]
    Encoding(#[from] EncodingError),

    /// Decryption or encryption failed. The cipher error is kept as source.
    #[error("security error: could not process encrypted entry")]
    Security(#[from] CryptoError),

    /// The stored value has a different type than the getter asked for.
    #[error("type mismatch for key {key:?}: expected {expected}, found {found}")]
    TypeMismatch {
        key: Option<String>,
        expected: ValueType,
        found: ValueType,
    },

    /// The key is used by the store for its own key material.
    #[error("{0} is a reserved key and cannot be read or modified")]
    ReservedKey(String),

    #[error("key provisioning failed: {0}")]
    KeyProvisioning(#[from] KeyProvisioningError),

    #[error("persistence error: {0}")]
    Backend(#[from] BackendError),
}

pub type PrefsResult<T> = Result<T, PrefsError>;
