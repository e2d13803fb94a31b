// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key and value ciphers.
//!
//! ## Ciphertext Format
//!
//! ```text
//! 0x01 | key_id: u32 (BE) | nonce (12) | AES-256-GCM ciphertext + tag (16)
//! ```
//!
//! - **Key cipher** is deterministic: the nonce is a synthetic IV, the first
//!   12 bytes of HMAC-SHA256 over the associated data and plaintext. Equal
//!   plaintexts encrypt to equal ciphertexts, so entries can be looked up by
//!   encrypted key. The synthetic IV is re-derived and checked on decryption.
//! - **Value cipher** is randomized AES-256-GCM bound to the stored key as
//!   associated data, so a value cannot be replayed under another key.
//!
//! Ciphertexts are persisted as standard padded Base64.

use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;

use super::keyset::Keyset;

type HmacSha256 = Hmac<Sha256>;

const FORMAT_VERSION: u8 = 0x01;
const PREFIX_LEN: usize = 1 + 4;
const TAG_LEN: usize = 16;

/// AES-256 key length.
pub const AES_KEY_LEN: usize = 32;

/// Key cipher material: 32 bytes HMAC key followed by 32 bytes AES key.
pub const KEY_CIPHER_MATERIAL_LEN: usize = 64;

/// Value cipher material: one AES-256 key.
pub const VALUE_CIPHER_MATERIAL_LEN: usize = AES_KEY_LEN;

/// Cryptographic failures. Surfaced to callers as a security error.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext failed authentication")]
    Decrypt,

    #[error("ciphertext is malformed")]
    Malformed,

    #[error("no key with id {0} in keyset")]
    UnknownKeyId(u32),

    #[error("invalid base64 text")]
    Base64,

    #[error("decrypted key is not valid UTF-8")]
    InvalidUtf8,

    #[error("failed to generate random bytes")]
    KeyGeneration,

    #[error("invalid key material")]
    InvalidKeyMaterial,

    #[error("keyset encoding error: {0}")]
    KeysetFormat(#[from] serde_json::Error),
}

impl From<base64ct::Error> for CryptoError {
    fn from(_: base64ct::Error) -> Self {
        CryptoError::Base64
    }
}

fn aes_key(bytes: &[u8]) -> Result<LessSafeKey, CryptoError> {
    let unbound =
        UnboundKey::new(&AES_256_GCM, bytes).map_err(|_| CryptoError::InvalidKeyMaterial)?;
    Ok(LessSafeKey::new(unbound))
}

fn seal(
    key_id: u32,
    key: &LessSafeKey,
    nonce: [u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::Malformed)?;

    let mut out = Vec::with_capacity(PREFIX_LEN + NONCE_LEN + in_out.len());
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&key_id.to_be_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Split a ciphertext into `(key_id, nonce, sealed)`.
fn parse(ciphertext: &[u8]) -> Result<(u32, [u8; NONCE_LEN], &[u8]), CryptoError> {
    if ciphertext.len() < PREFIX_LEN + NONCE_LEN + TAG_LEN || ciphertext[0] != FORMAT_VERSION {
        return Err(CryptoError::Malformed);
    }
    let mut id = [0u8; 4];
    id.copy_from_slice(&ciphertext[1..PREFIX_LEN]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&ciphertext[PREFIX_LEN..PREFIX_LEN + NONCE_LEN]);
    Ok((u32::from_be_bytes(id), nonce, &ciphertext[PREFIX_LEN + NONCE_LEN..]))
}

fn open(
    key: &LessSafeKey,
    nonce: [u8; NONCE_LEN],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut in_out = sealed.to_vec();
    let len = key
        .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::Decrypt)?
        .len();
    in_out.truncate(len);
    Ok(in_out)
}

struct SivKey {
    id: u32,
    mac_key: Vec<u8>,
    aead: LessSafeKey,
}

impl SivKey {
    fn mac(&self, plaintext: &[u8], aad: &[u8]) -> Result<HmacSha256, CryptoError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.mac_key).map_err(|_| CryptoError::InvalidKeyMaterial)?;
        mac.update(&(aad.len() as u64).to_be_bytes());
        mac.update(aad);
        mac.update(plaintext);
        Ok(mac)
    }

    fn synthetic_nonce(&self, plaintext: &[u8], aad: &[u8]) -> Result<[u8; NONCE_LEN], CryptoError> {
        let tag = self.mac(plaintext, aad)?.finalize().into_bytes();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&tag[..NONCE_LEN]);
        Ok(nonce)
    }
}

/// Deterministic cipher for stored keys.
pub struct KeyCipher {
    primary_id: u32,
    keys: Vec<SivKey>,
}

impl KeyCipher {
    pub fn new(keyset: &Keyset) -> Result<Self, CryptoError> {
        keyset.validate(KEY_CIPHER_MATERIAL_LEN)?;
        let keys = keyset
            .keys
            .iter()
            .map(|entry| {
                let (mac_key, aes) = entry.material.as_bytes().split_at(AES_KEY_LEN);
                Ok(SivKey {
                    id: entry.id,
                    mac_key: mac_key.to_vec(),
                    aead: aes_key(aes)?,
                })
            })
            .collect::<Result<Vec<_>, CryptoError>>()?;

        Ok(Self {
            primary_id: keyset.primary_id,
            keys,
        })
    }

    fn key(&self, id: u32) -> Result<&SivKey, CryptoError> {
        self.keys
            .iter()
            .find(|k| k.id == id)
            .ok_or(CryptoError::UnknownKeyId(id))
    }

    pub fn encrypt_deterministically(
        &self,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = self.key(self.primary_id)?;
        let nonce = key.synthetic_nonce(plaintext, aad)?;
        seal(key.id, &key.aead, nonce, plaintext, aad)
    }

    pub fn decrypt_deterministically(
        &self,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let (id, nonce, sealed) = parse(ciphertext)?;
        let key = self.key(id)?;
        let plaintext = open(&key.aead, nonce, sealed, aad)?;
        key.mac(&plaintext, aad)?
            .verify_truncated_left(&nonce)
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(plaintext)
    }
}

/// Randomized authenticated cipher for stored values.
pub struct ValueCipher {
    primary_id: u32,
    keys: Vec<(u32, LessSafeKey)>,
    rng: SystemRandom,
}

impl ValueCipher {
    pub fn new(keyset: &Keyset) -> Result<Self, CryptoError> {
        keyset.validate(VALUE_CIPHER_MATERIAL_LEN)?;
        let keys = keyset
            .keys
            .iter()
            .map(|entry| Ok((entry.id, aes_key(entry.material.as_bytes())?)))
            .collect::<Result<Vec<_>, CryptoError>>()?;

        Ok(Self {
            primary_id: keyset.primary_id,
            keys,
            rng: SystemRandom::new(),
        })
    }

    fn key(&self, id: u32) -> Result<&LessSafeKey, CryptoError> {
        self.keys
            .iter()
            .find(|(key_id, _)| *key_id == id)
            .map(|(_, key)| key)
            .ok_or(CryptoError::UnknownKeyId(id))
    }

    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| CryptoError::KeyGeneration)?;
        seal(self.primary_id, self.key(self.primary_id)?, nonce, plaintext, aad)
    }

    pub fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (id, nonce, sealed) = parse(ciphertext)?;
        open(self.key(id)?, nonce, sealed, aad)
    }
}

/// Paired key and value ciphers for one store.
///
/// Key ciphertexts are bound to the store name, value ciphertexts to their
/// stored key.
pub struct CipherSuite {
    store_name: String,
    key_cipher: KeyCipher,
    value_cipher: ValueCipher,
}

impl CipherSuite {
    pub fn new(
        store_name: impl Into<String>,
        key_keyset: &Keyset,
        value_keyset: &Keyset,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            store_name: store_name.into(),
            key_cipher: KeyCipher::new(key_keyset)?,
            value_cipher: ValueCipher::new(value_keyset)?,
        })
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Encrypt a plaintext key into its stored form.
    pub fn encrypt_key(&self, key: &str) -> Result<String, CryptoError> {
        let ciphertext = self
            .key_cipher
            .encrypt_deterministically(key.as_bytes(), self.store_name.as_bytes())?;
        Ok(Base64::encode_string(&ciphertext))
    }

    /// Recover the plaintext key from its stored form.
    pub fn decrypt_key(&self, stored_key: &str) -> Result<String, CryptoError> {
        let ciphertext = Base64::decode_vec(stored_key)?;
        let plaintext = self
            .key_cipher
            .decrypt_deterministically(&ciphertext, self.store_name.as_bytes())?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    pub fn encrypt_value(&self, stored_key: &str, encoded: &[u8]) -> Result<String, CryptoError> {
        let ciphertext = self.value_cipher.encrypt(encoded, stored_key.as_bytes())?;
        Ok(Base64::encode_string(&ciphertext))
    }

    pub fn decrypt_value(&self, stored_key: &str, stored_value: &str) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = Base64::decode_vec(stored_value)?;
        self.value_cipher.decrypt(&ciphertext, stored_key.as_bytes())
    }
}

impl std::fmt::Debug for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherSuite")
            .field("store_name", &self.store_name)
            .finish_non_exhaustive()
    }
}
