// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Master key used to wrap keysets at rest.
//!
//! Keysets live in the same backing file as the data they protect, so they
//! are sealed with AES-256-GCM under a master key held outside that file.
//! Where the master key itself is kept (OS keychain, hardware keystore) is up
//! to the caller.

use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use super::cipher::{CryptoError, AES_KEY_LEN};
use super::keyset::Keyset;

pub struct MasterKey {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl MasterKey {
    pub fn from_bytes(bytes: &[u8; AES_KEY_LEN]) -> Result<Self, CryptoError> {
        let unbound =
            UnboundKey::new(&AES_256_GCM, bytes).map_err(|_| CryptoError::InvalidKeyMaterial)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Generate a random master key. Returns the key and its raw bytes so the
    /// caller can store them.
    pub fn generate() -> Result<(Self, [u8; AES_KEY_LEN]), CryptoError> {
        let mut bytes = [0u8; AES_KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| CryptoError::KeyGeneration)?;
        Ok((Self::from_bytes(&bytes)?, bytes))
    }

    /// Seal a keyset into Base64 text (`nonce | ciphertext | tag`).
    pub fn seal_keyset(&self, keyset: &Keyset, context: &[u8]) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| CryptoError::KeyGeneration)?;

        let mut in_out = serde_json::to_vec(keyset)?;
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::from(context),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Malformed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&in_out);
        Ok(Base64::encode_string(&out))
    }

    pub fn open_keyset(&self, wrapped: &str, context: &[u8]) -> Result<Keyset, CryptoError> {
        let raw = Base64::decode_vec(wrapped)?;
        if raw.len() < NONCE_LEN {
            return Err(CryptoError::Malformed);
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce).map_err(|_| CryptoError::Malformed)?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(context), &mut in_out)
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(serde_json::from_slice(plaintext)?)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}
