// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Crypto Module
//!
//! Key and value encryption for preference stores.
//!
//! ## Layout
//!
//! - `keyset` - Serializable keysets (key id + raw material)
//! - `cipher` - Deterministic key cipher, randomized value cipher, and the
//!   per-store [`CipherSuite`] pairing them
//! - `master_key` - Wraps keysets before they are persisted
//! - `provisioning` - Loads or creates a store's keysets, once per store name
//!
//! ## Ciphertext Format
//!
//! ```text
//! 0x01 | key_id (u32 BE) | nonce (12) | ciphertext | tag (16)
//! ```
//!
//! Stored keys and values are the Base64 encoding of the above.

pub mod cipher;
pub mod keyset;
pub mod master_key;
pub mod provisioning;

pub use cipher::{
    CipherSuite, CryptoError, KeyCipher, ValueCipher, AES_KEY_LEN, KEY_CIPHER_MATERIAL_LEN,
    VALUE_CIPHER_MATERIAL_LEN,
};
pub use keyset::{KeyMaterial, Keyset, KeysetEntry};
pub use master_key::MasterKey;
pub use provisioning::{KeyProvisioner, KeyProvisioningError};
