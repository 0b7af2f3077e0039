// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Credential sealing: installation secrets are ciphertext at rest.
//!
//! Every secret that enters a durable event (access token, refresh token,
//! webhook secret) passes through AES-256-GCM with a fresh nonce; the WAL
//! and snapshots only ever see ciphertext. The master key lives beside the
//! store (owner-only file) or in `GANTRY_MASTER_KEY`, and in process
//! memory while the daemon runs.

use crate::error::StoreError;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use gantry_core::Secret;
use std::path::Path;

const KEY_FILE: &str = "master.key";
const PREFIX: &str = "enc1:";

pub struct Seal {
    cipher: Aes256Gcm,
}

impl Seal {
    /// Load the master key from `GANTRY_MASTER_KEY` (hex) or the key file
    /// in `dir`, generating and persisting a fresh key on first run.
    pub fn load_or_create(dir: &Path) -> Result<Self, StoreError> {
        if let Ok(hex_key) = std::env::var("GANTRY_MASTER_KEY") {
            return Self::from_hex(hex_key.trim());
        }

        let path = dir.join(KEY_FILE);
        match std::fs::read_to_string(&path) {
            Ok(hex_key) => Self::from_hex(hex_key.trim()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = Aes256Gcm::generate_key(OsRng);
                std::fs::create_dir_all(dir)?;
                std::fs::write(&path, hex::encode(key))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
                }
                Ok(Self { cipher: Aes256Gcm::new(&key) })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn from_hex(hex_key: &str) -> Result<Self, StoreError> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| StoreError::Crypto(format!("master key is not hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(StoreError::Crypto(format!(
                "master key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    /// Encrypt a secret for storage. Output: `enc1:<nonce hex>:<ct hex>`.
    pub fn seal(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, secret.expose().as_bytes())
            .map_err(|e| StoreError::Crypto(e.to_string()))?;
        Ok(Secret::new(format!("{PREFIX}{}:{}", hex::encode(nonce), hex::encode(ciphertext))))
    }

    /// Decrypt a stored secret. Values without the `enc1:` prefix are
    /// returned as-is (rows written before sealing was introduced).
    pub fn open(&self, stored: &Secret) -> Result<Secret, StoreError> {
        let Some(rest) = stored.expose().strip_prefix(PREFIX) else {
            return Ok(stored.clone());
        };
        let (nonce_hex, ct_hex) = rest
            .split_once(':')
            .ok_or_else(|| StoreError::Crypto("malformed sealed value".into()))?;
        let nonce_bytes =
            hex::decode(nonce_hex).map_err(|e| StoreError::Crypto(e.to_string()))?;
        if nonce_bytes.len() != 12 {
            return Err(StoreError::Crypto("malformed nonce".into()));
        }
        let ciphertext = hex::decode(ct_hex).map_err(|e| StoreError::Crypto(e.to_string()))?;
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| StoreError::Crypto("decryption failed (wrong master key?)".into()))?;
        String::from_utf8(plain)
            .map(Secret::new)
            .map_err(|e| StoreError::Crypto(e.to_string()))
    }

    pub fn open_optional(&self, stored: &Option<Secret>) -> Result<Option<Secret>, StoreError> {
        stored.as_ref().map(|s| self.open(s)).transpose()
    }
}

#[cfg(test)]
#[path = "seal_tests.rs"]
mod tests;
