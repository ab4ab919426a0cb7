//! Local encrypted key storage implementation
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{StoreError, StoreResult};
use crate::store::{batch_signing_key_name, packet_encryption_key_name, KeyStore};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use key_rotator_keys::Key;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Master key for encrypting stored keys
type MasterKey = [u8; 32];

const NONCE_LEN: usize = 12;

/// Directory of AES-256-GCM encrypted key documents, one file per secret
pub struct LocalKeyStore {
    /// Storage directory
    storage_path: PathBuf,
    /// Master encryption key
    master_key: MasterKey,
}

impl LocalKeyStore {
    /// Create a new local key store
    ///
    /// # Arguments
    /// * `storage_path` - Directory where encrypted keys will be stored
    /// * `master_key` - 32-byte master key
    pub async fn new<P: AsRef<Path>>(storage_path: P, master_key: &[u8]) -> StoreResult<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();

        if master_key.len() != 32 {
            return Err(StoreError::Configuration(
                "Master key must be exactly 32 bytes".to_string(),
            ));
        }
        let mut mk = [0u8; 32];
        mk.copy_from_slice(master_key);

        fs::create_dir_all(&storage_path).await?;
        info!(path = %storage_path.display(), "Opened local key store");

        Ok(Self {
            storage_path,
            master_key: mk,
        })
    }

    /// Create a store whose master key is read from the environment variable `var`
    pub async fn from_env<P: AsRef<Path>>(storage_path: P, var: &str) -> StoreResult<Self> {
        let secret = std::env::var(var).map_err(|_| {
            StoreError::Configuration(format!("Master key variable {} is not set", var))
        })?;
        Self::new(storage_path, &derive_master_key(&secret)).await
    }

    /// Encrypt key value
    fn encrypt(&self, plaintext: &[u8]) -> StoreResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(&self.master_key.into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| StoreError::Encryption(format!("Encryption failed: {}", e)))?;

        // Prepend nonce to ciphertext
        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt key value
    fn decrypt(&self, encrypted: &[u8]) -> StoreResult<Vec<u8>> {
        if encrypted.len() < NONCE_LEN {
            return Err(StoreError::Decryption("Encrypted data too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new(&self.master_key.into());

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| StoreError::Decryption(format!("Decryption failed: {}", e)))
    }

    /// Get path for a secret file
    fn secret_path(&self, name: &str) -> PathBuf {
        // Sanitize name for filesystem
        let sanitized = name.replace('/', "_").replace('\\', "_");
        self.storage_path.join(format!("{}.key", sanitized))
    }

    async fn read_key(&self, name: &str) -> StoreResult<Key> {
        let path = self.secret_path(name);
        let encrypted = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(secret = name, "Secret not found, treating key as unprovisioned");
                return Ok(Key::empty());
            }
            Err(e) => return Err(e.into()),
        };

        let plaintext = self.decrypt(&encrypted)?;
        let json = String::from_utf8(plaintext)
            .map_err(|e| StoreError::Decryption(format!("Invalid UTF-8: {}", e)))?;
        Ok(Key::from_json(&json)?)
    }

    async fn write_key(&self, name: &str, key: &Key) -> StoreResult<()> {
        let encrypted = self.encrypt(key.to_json()?.as_bytes())?;

        // Write then rename so readers never observe a partial file
        let path = self.secret_path(name);
        let tmp = path.with_extension("key.tmp");
        fs::write(&tmp, &encrypted).await?;
        fs::rename(&tmp, &path).await?;

        debug!(secret = name, versions = key.len(), "Key stored");
        Ok(())
    }
}

/// Derive a master key from a hex-encoded 32-byte key or, failing that,
/// the SHA-256 of the given passphrase
pub fn derive_master_key(secret: &str) -> MasterKey {
    if let Ok(key_bytes) = hex::decode(secret) {
        if key_bytes.len() == 32 {
            let mut mk = [0u8; 32];
            mk.copy_from_slice(&key_bytes);
            return mk;
        }
    }
    let hash = Sha256::digest(secret.as_bytes());
    let mut mk = [0u8; 32];
    mk.copy_from_slice(&hash);
    mk
}

#[async_trait]
impl KeyStore for LocalKeyStore {
    async fn get_batch_signing_key(&self, locality: &str, ingestor: &str) -> StoreResult<Key> {
        self.read_key(&batch_signing_key_name(locality, ingestor)).await
    }

    async fn put_batch_signing_key(
        &self,
        locality: &str,
        ingestor: &str,
        key: &Key,
    ) -> StoreResult<()> {
        self.write_key(&batch_signing_key_name(locality, ingestor), key)
            .await
    }

    async fn get_packet_encryption_key(&self, locality: &str) -> StoreResult<Key> {
        self.read_key(&packet_encryption_key_name(locality)).await
    }

    async fn put_packet_encryption_key(&self, locality: &str, key: &Key) -> StoreResult<()> {
        self.write_key(&packet_encryption_key_name(locality), key)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use key_rotator_keys::{MaterialKind, Version};

    fn key() -> Key {
        Key::new(
            Version::new(MaterialKind::P256.generate().unwrap(), 100),
            vec![Version::new(MaterialKind::P256.generate().unwrap(), 50)],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKeyStore::new(dir.path(), &[7u8; 32]).await.unwrap();
        assert!(store.get_packet_encryption_key("us-ct").await.unwrap().is_empty());
        assert!(store
            .get_batch_signing_key("us-ct", "ingestor-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKeyStore::new(dir.path(), &[7u8; 32]).await.unwrap();
        let k = key();
        store
            .put_batch_signing_key("us-ct", "ingestor-1", &k)
            .await
            .unwrap();
        assert_eq!(
            store
                .get_batch_signing_key("us-ct", "ingestor-1")
                .await
                .unwrap(),
            k
        );
        assert!(store
            .get_batch_signing_key("us-ct", "ingestor-2")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stored_file_is_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKeyStore::new(dir.path(), &[7u8; 32]).await.unwrap();
        let k = key();
        store.put_packet_encryption_key("us-ct", &k).await.unwrap();

        let raw = std::fs::read(dir.path().join("us-ct-packet-decryption-key.key")).unwrap();
        let material = k.primary().unwrap().key_material().to_text();
        assert!(!String::from_utf8_lossy(&raw).contains(&material));
    }

    #[tokio::test]
    async fn test_wrong_master_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKeyStore::new(dir.path(), &[7u8; 32]).await.unwrap();
        store.put_packet_encryption_key("us-ct", &key()).await.unwrap();

        let other = LocalKeyStore::new(dir.path(), &[8u8; 32]).await.unwrap();
        assert!(matches!(
            other.get_packet_encryption_key("us-ct").await,
            Err(StoreError::Decryption(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_short_master_key() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LocalKeyStore::new(dir.path(), &[7u8; 16]).await,
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_derive_master_key() {
        let hex_key = "11".repeat(32);
        assert_eq!(derive_master_key(&hex_key), [0x11u8; 32]);

        let from_passphrase = derive_master_key("correct horse battery staple");
        assert_eq!(from_passphrase.len(), 32);
        assert_eq!(from_passphrase, derive_master_key("correct horse battery staple"));
        assert_ne!(from_passphrase, derive_master_key("another passphrase"));
    }
}
