// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Store Configuration
//!
//! Per-store settings plus the environment variables read by the file-backed
//! helpers.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `PREFS_DATA_DIR` | Directory holding store files | `./data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable name for the store data directory.
pub const DATA_DIR_ENV: &str = "PREFS_DATA_DIR";

/// Data directory used when `PREFS_DATA_DIR` is unset.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Environment variable name for the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// File extension of redb-backed store files.
pub const STORE_FILE_EXTENSION: &str = "redb";

/// Resolve the data directory from the environment.
pub fn data_dir_from_env() -> PathBuf {
    env::var(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown encryption scheme: {0}")]
pub struct UnknownScheme(pub String);

/// Deterministic scheme used to encrypt keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyEncryptionScheme {
    /// AES-256-GCM with an HMAC-SHA256 synthetic IV.
    #[default]
    #[serde(rename = "AES256_SIV_HMAC")]
    Aes256SivHmac,
}

impl KeyEncryptionScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyEncryptionScheme::Aes256SivHmac => "AES256_SIV_HMAC",
        }
    }
}

impl fmt::Display for KeyEncryptionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyEncryptionScheme {
    type Err = UnknownScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES256_SIV_HMAC" => Ok(KeyEncryptionScheme::Aes256SivHmac),
            other => Err(UnknownScheme(other.to_string())),
        }
    }
}

/// Authenticated scheme used to encrypt values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueEncryptionScheme {
    #[default]
    #[serde(rename = "AES256_GCM")]
    Aes256Gcm,
}

impl ValueEncryptionScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueEncryptionScheme::Aes256Gcm => "AES256_GCM",
        }
    }
}

impl fmt::Display for ValueEncryptionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueEncryptionScheme {
    type Err = UnknownScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES256_GCM" => Ok(ValueEncryptionScheme::Aes256Gcm),
            other => Err(UnknownScheme(other.to_string())),
        }
    }
}

/// Settings for one encrypted store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store identifier. Bound into every key ciphertext, so renaming a
    /// store makes its existing entries unreadable.
    pub name: String,
    #[serde(default)]
    pub key_scheme: KeyEncryptionScheme,
    #[serde(default)]
    pub value_scheme: ValueEncryptionScheme,
}

impl StoreConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_scheme: KeyEncryptionScheme::default(),
            value_scheme: ValueEncryptionScheme::default(),
        }
    }

    /// Path of the redb file for this store under `data_dir`.
    pub fn file_path(&self, data_dir: impl AsRef<Path>) -> PathBuf {
        data_dir
            .as_ref()
            .join(format!("{}.{STORE_FILE_EXTENSION}", self.name))
    }
}
