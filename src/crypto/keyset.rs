// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Keyset data model.
//!
//! A keyset is an ordered list of keys for one cipher, each with a random
//! 32-bit id, plus the id of the primary key used for new encryptions. Every
//! ciphertext carries the id of the key that produced it, so older keys keep
//! decrypting after a new primary is added.

use std::fmt;

use base64ct::{Base64, Encoding};
use ring::rand::SecureRandom;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use super::cipher::CryptoError;

/// Raw key bytes. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED; {}])", self.0.len())
    }
}

impl Serialize for KeyMaterial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(&self.0))
    }
}

impl<'de> Deserialize<'de> for KeyMaterial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let decoded = Base64::decode_vec(&encoded).map_err(D::Error::custom)?;
        Ok(Self(decoded))
    }
}

/// One key inside a keyset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeysetEntry {
    pub id: u32,
    pub material: KeyMaterial,
}

/// Keys for a single cipher, tagged with the scheme they belong to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Keyset {
    pub scheme: String,
    pub primary_id: u32,
    pub keys: Vec<KeysetEntry>,
}

impl Keyset {
    /// Generate a keyset with one fresh primary key.
    pub fn generate(
        scheme: &str,
        material_len: usize,
        rng: &dyn SecureRandom,
    ) -> Result<Self, CryptoError> {
        let mut keyset = Self {
            scheme: scheme.to_string(),
            primary_id: 0,
            keys: Vec::new(),
        };
        keyset.add_primary(material_len, rng)?;
        Ok(keyset)
    }

    /// Add a fresh key and make it primary. Returns the new key id.
    pub fn add_primary(
        &mut self,
        material_len: usize,
        rng: &dyn SecureRandom,
    ) -> Result<u32, CryptoError> {
        let id = loop {
            let mut id_bytes = [0u8; 4];
            rng.fill(&mut id_bytes)
                .map_err(|_| CryptoError::KeyGeneration)?;
            let id = u32::from_be_bytes(id_bytes);
            if id != 0 && self.find(id).is_none() {
                break id;
            }
        };

        let mut material = vec![0u8; material_len];
        rng.fill(&mut material)
            .map_err(|_| CryptoError::KeyGeneration)?;

        self.keys.push(KeysetEntry {
            id,
            material: KeyMaterial::new(material),
        });
        self.primary_id = id;
        Ok(id)
    }

    pub fn find(&self, id: u32) -> Option<&KeysetEntry> {
        self.keys.iter().find(|k| k.id == id)
    }

    pub fn primary(&self) -> Result<&KeysetEntry, CryptoError> {
        self.find(self.primary_id)
            .ok_or(CryptoError::UnknownKeyId(self.primary_id))
    }

    /// Check that every key has the expected length and the primary exists.
    pub fn validate(&self, material_len: usize) -> Result<(), CryptoError> {
        self.primary()?;
        if self.keys.iter().any(|k| k.material.len() != material_len) {
            return Err(CryptoError::InvalidKeyMaterial);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    #[test]
    fn generate_creates_single_primary_key() {
        let keyset = Keyset::generate("TEST", 32, &SystemRandom::new()).unwrap();
        assert_eq!(keyset.keys.len(), 1);
        assert_eq!(keyset.primary().unwrap().material.len(), 32);
        assert_ne!(keyset.primary_id, 0);
        keyset.validate(32).unwrap();
    }

    #[test]
    fn add_primary_keeps_old_keys() {
        let rng = SystemRandom::new();
        let mut keyset = Keyset::generate("TEST", 32, &rng).unwrap();
        let first = keyset.primary_id;
        let second = keyset.add_primary(32, &rng).unwrap();

        assert_ne!(first, second);
        assert_eq!(keyset.primary_id, second);
        assert!(keyset.find(first).is_some());
    }

    #[test]
    fn validate_rejects_wrong_length() {
        let keyset = Keyset::generate("TEST", 16, &SystemRandom::new()).unwrap();
        assert!(matches!(
            keyset.validate(32),
            Err(CryptoError::InvalidKeyMaterial)
        ));
    }

    #[test]
    fn serde_round_trip_uses_base64_material() {
        let keyset = Keyset::generate("TEST", 32, &SystemRandom::new()).unwrap();
        let json = serde_json::to_string(&keyset).unwrap();
        assert!(json.contains("\"primaryId\""));

        let parsed: Keyset = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, keyset);
    }

    #[test]
    fn debug_output_redacts_material() {
        let keyset = Keyset::generate("TEST", 32, &SystemRandom::new()).unwrap();
        let debug = format!("{keyset:?}");
        assert!(debug.contains("REDACTED"));
    }
}
