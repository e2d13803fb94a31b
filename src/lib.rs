// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted Prefs - Transactional Encrypted Key-Value Store
//!
//! This crate provides preference-style typed storage (strings, string sets,
//! integers, longs, floats, booleans) where every key and value is encrypted
//! before it reaches the persistence layer.
//!
//! ## Modules
//!
//! - `codec` - Self-describing binary encoding of typed values
//! - `crypto` - Key/value ciphers, keysets and key provisioning
//! - `storage` - Raw persistence primitives (redb, in-memory)
//! - `prefs` - Store, transactional editor and change listeners
//! - `config` - Store settings and environment variables
//! - `logging` - Tracing subscriber setup
//!
//! ## Usage
//!
//! ```no_run
//! use encrypted_prefs::{EncryptedStore, KeyProvisioner, MasterKey, StoreConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (master_key, _bytes) = MasterKey::generate()?;
//! let provisioner = KeyProvisioner::new(master_key);
//! let store = EncryptedStore::open_file(
//!     &StoreConfig::new("settings"),
//!     encrypted_prefs::config::data_dir_from_env(),
//!     &provisioner,
//! )
//! .await?;
//!
//! store.edit().put_string("user", Some("alice"))?.commit().await?;
//! assert_eq!(store.get_string("user", None)?, Some("alice".to_string()));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod prefs;
pub mod storage;

pub use codec::{StringSet, TypedValue, ValueType};
pub use config::{KeyEncryptionScheme, StoreConfig, ValueEncryptionScheme};
pub use crypto::{KeyProvisioner, MasterKey};
pub use error::{PrefsError, PrefsResult};
pub use prefs::{EncryptedStore, Editor, PrefKey, StoreListener};
