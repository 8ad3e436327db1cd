// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encryption-at-rest collaborator.
//!
//! The record store encrypts payloads through a [`CipherService`] before
//! fingerprinting them. Key management lives outside this crate.
//! [`SivCipher`] wraps AES-256-GCM-SIV with a nonce derived from the
//! plaintext, so equal payloads under one key seal to equal bytes:
//!
//! ```text
//! enc_key    = HMAC(key, "carechain-enc")
//! nonce      = HMAC(HMAC(key, "carechain-nonce"), plaintext)[..12]
//! ciphertext = nonce || AES-256-GCM-SIV(enc_key, nonce, plaintext)
//! ```

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Minimum accepted key length in bytes.
pub const MIN_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("cipher key must be at least {MIN_KEY_LEN} bytes")]
    WeakKey,

    #[error("invalid cipher key encoding: {0}")]
    KeyEncoding(String),

    #[error("ciphertext is truncated")]
    Truncated,

    #[error("ciphertext failed authentication")]
    Authentication,

    #[error("no cipher configured; refusing to store {0} payload in plaintext")]
    Unavailable(String),
}

/// Deterministic per-key payload encryption.
pub trait CipherService: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// AES-256-GCM-SIV with synthetic nonces.
pub struct SivCipher {
    aead: Aes256GcmSiv,
    nonce_key: HmacSha256,
}

impl SivCipher {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, CipherError> {
        let key = key.into();
        if key.len() < MIN_KEY_LEN {
            return Err(CipherError::WeakKey);
        }
        let enc_key = derive(&key, b"carechain-enc")?;
        let nonce_key = derive(&key, b"carechain-nonce")?;

        let aead = Aes256GcmSiv::new_from_slice(&enc_key)
            .map_err(|e| CipherError::KeyEncoding(e.to_string()))?;
        let nonce_key = <HmacSha256 as Mac>::new_from_slice(&nonce_key)
            .map_err(|e| CipherError::KeyEncoding(e.to_string()))?;
        Ok(Self { aead, nonce_key })
    }

    /// Build from a hex-encoded key (as read from the environment).
    pub fn from_hex(key_hex: &str) -> Result<Self, CipherError> {
        let key = hex::decode(key_hex.trim()).map_err(|e| CipherError::KeyEncoding(e.to_string()))?;
        Self::new(key)
    }

    fn nonce_for(&self, plaintext: &[u8]) -> [u8; NONCE_LEN] {
        let mut mac = self.nonce_key.clone();
        mac.update(plaintext);
        let tag = mac.finalize().into_bytes();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&tag[..NONCE_LEN]);
        nonce
    }
}

fn derive(key: &[u8], label: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CipherError::KeyEncoding(e.to_string()))?;
    mac.update(label);
    Ok(mac.finalize().into_bytes().to_vec())
}

impl CipherService for SivCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = self.nonce_for(plaintext);
        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Authentication)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        self.aead
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Authentication)
    }
}
