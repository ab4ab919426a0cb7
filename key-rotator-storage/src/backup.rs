//! Backup-on-write key store decorator
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
use crate::store::KeyStore;
use async_trait::async_trait;
use key_rotator_keys::Key;
use tracing::{debug, error};

/// Writes every key to a primary store and then to a backup store.
///
/// Reads only consult the primary. A failed backup write fails the put,
/// since a rotation that is not backed up must not be reported as done.
pub struct BackupKeyStore<P, B> {
    primary: P,
    backup: B,
}

impl<P: KeyStore, B: KeyStore> BackupKeyStore<P, B> {
    pub fn new(primary: P, backup: B) -> Self {
        Self { primary, backup }
    }

    fn backup_failed(what: &str, e: StoreError) -> StoreError {
        error!(secret = what, error = %e, "Backup key write failed");
        StoreError::Backup(Box::new(e))
    }
}

#[async_trait]
impl<P: KeyStore, B: KeyStore> KeyStore for BackupKeyStore<P, B> {
    async fn get_batch_signing_key(&self, locality: &str, ingestor: &str) -> StoreResult<Key> {
        self.primary.get_batch_signing_key(locality, ingestor).await
    }

    async fn put_batch_signing_key(
        &self,
        locality: &str,
        ingestor: &str,
        key: &Key,
    ) -> StoreResult<()> {
        self.primary
            .put_batch_signing_key(locality, ingestor, key)
            .await?;
        self.backup
            .put_batch_signing_key(locality, ingestor, key)
            .await
            .map_err(|e| Self::backup_failed("batch-signing-key", e))?;
        debug!(locality, ingestor, "Batch signing key backed up");
        Ok(())
    }

    async fn get_packet_encryption_key(&self, locality: &str) -> StoreResult<Key> {
        self.primary.get_packet_encryption_key(locality).await
    }

    async fn put_packet_encryption_key(&self, locality: &str, key: &Key) -> StoreResult<()> {
        self.primary.put_packet_encryption_key(locality, key).await?;
        self.backup
            .put_packet_encryption_key(locality, key)
            .await
            .map_err(|e| Self::backup_failed("packet-encryption-key", e))?;
        debug!(locality, "Packet encryption key backed up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKeyStore;
    use key_rotator_keys::{MaterialKind, Version};
    use std::sync::Arc;

    fn key(ts: i64) -> Key {
        Key::new(Version::new(MaterialKind::P256.generate().unwrap(), ts), vec![]).unwrap()
    }

    fn stores() -> (
        Arc<InMemoryKeyStore>,
        Arc<InMemoryKeyStore>,
        BackupKeyStore<Arc<InMemoryKeyStore>, Arc<InMemoryKeyStore>>,
    ) {
        let primary = Arc::new(InMemoryKeyStore::new());
        let backup = Arc::new(InMemoryKeyStore::new());
        let store = BackupKeyStore::new(primary.clone(), backup.clone());
        (primary, backup, store)
    }

    #[tokio::test]
    async fn test_put_writes_both_stores() {
        let (primary, backup, store) = stores();
        let k = key(10);
        store
            .put_batch_signing_key("us-ct", "ingestor-1", &k)
            .await
            .unwrap();
        assert_eq!(
            primary.get_batch_signing_key("us-ct", "ingestor-1").await.unwrap(),
            k
        );
        assert_eq!(
            backup.get_batch_signing_key("us-ct", "ingestor-1").await.unwrap(),
            k
        );
    }

    #[tokio::test]
    async fn test_get_reads_primary_only() {
        let (primary, backup, store) = stores();
        backup.put_packet_encryption_key("us-ct", &key(10)).await.unwrap();
        assert!(store.get_packet_encryption_key("us-ct").await.unwrap().is_empty());

        let k = key(20);
        primary.put_packet_encryption_key("us-ct", &k).await.unwrap();
        backup.fail_reads(true);
        assert_eq!(store.get_packet_encryption_key("us-ct").await.unwrap(), k);
    }

    #[tokio::test]
    async fn test_backup_failure_surfaces() {
        let (primary, backup, store) = stores();
        backup.fail_all_writes(true);
        let result = store.put_packet_encryption_key("us-ct", &key(10)).await;
        assert!(matches!(result, Err(StoreError::Backup(_))));
        // The primary write has already happened.
        assert_eq!(primary.write_count(), 1);
    }

    #[tokio::test]
    async fn test_primary_failure_skips_backup() {
        let (primary, backup, store) = stores();
        primary.fail_all_writes(true);
        assert!(store.put_packet_encryption_key("us-ct", &key(10)).await.is_err());
        assert_eq!(backup.write_count(), 0);
    }
}
