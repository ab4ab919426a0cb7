//! Dry-run store decorators
//!
//! Reads pass through to the wrapped store. Writes are logged, with a diff
//! against the currently stored value where it can be read, and then
//! dropped.
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


use crate::error::StoreResult;
use crate::manifest::{DataShareProcessorSpecificManifest, IngestorGlobalManifest};
use crate::store::{KeyStore, ManifestStore};
use async_trait::async_trait;
use key_rotator_keys::Key;
use tracing::{info, warn};

fn log_key_write(secret: &str, current: StoreResult<Key>, new: &Key) {
    match current {
        Ok(current) => info!(
            secret,
            changes = ?current.diff(new),
            "DRY RUN: would write key"
        ),
        Err(e) => warn!(
            secret,
            error = %e,
            versions = new.len(),
            "DRY RUN: would write key (current value unreadable, no diff)"
        ),
    }
}

/// Key store that never writes
pub struct DryRunKeyStore<S> {
    inner: S,
}

impl<S: KeyStore> DryRunKeyStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: KeyStore> KeyStore for DryRunKeyStore<S> {
    async fn get_batch_signing_key(&self, locality: &str, ingestor: &str) -> StoreResult<Key> {
        self.inner.get_batch_signing_key(locality, ingestor).await
    }

    async fn put_batch_signing_key(
        &self,
        locality: &str,
        ingestor: &str,
        key: &Key,
    ) -> StoreResult<()> {
        let current = self.inner.get_batch_signing_key(locality, ingestor).await;
        log_key_write(
            &crate::store::batch_signing_key_name(locality, ingestor),
            current,
            key,
        );
        Ok(())
    }

    async fn get_packet_encryption_key(&self, locality: &str) -> StoreResult<Key> {
        self.inner.get_packet_encryption_key(locality).await
    }

    async fn put_packet_encryption_key(&self, locality: &str, key: &Key) -> StoreResult<()> {
        let current = self.inner.get_packet_encryption_key(locality).await;
        log_key_write(
            &crate::store::packet_encryption_key_name(locality),
            current,
            key,
        );
        Ok(())
    }
}

/// Manifest store that never writes
pub struct DryRunManifestStore<S> {
    inner: S,
}

impl<S: ManifestStore> DryRunManifestStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ManifestStore> ManifestStore for DryRunManifestStore<S> {
    async fn get_data_share_processor_specific_manifest(
        &self,
        name: &str,
    ) -> StoreResult<Option<DataShareProcessorSpecificManifest>> {
        self.inner.get_data_share_processor_specific_manifest(name).await
    }

    async fn put_data_share_processor_specific_manifest(
        &self,
        name: &str,
        manifest: &DataShareProcessorSpecificManifest,
    ) -> StoreResult<()> {
        match self.inner.get_data_share_processor_specific_manifest(name).await {
            Ok(current) => {
                let current = current.unwrap_or_default();
                info!(
                    manifest = name,
                    changes = ?current.key_changes(manifest),
                    "DRY RUN: would write manifest"
                );
            }
            Err(e) => warn!(
                manifest = name,
                error = %e,
                "DRY RUN: would write manifest (current value unreadable, no diff)"
            ),
        }
        Ok(())
    }

    async fn get_ingestor_global_manifest(&self) -> StoreResult<Option<IngestorGlobalManifest>> {
        self.inner.get_ingestor_global_manifest().await
    }

    async fn put_ingestor_global_manifest(
        &self,
        manifest: &IngestorGlobalManifest,
    ) -> StoreResult<()> {
        match self.inner.get_ingestor_global_manifest().await {
            Ok(current) => {
                let current = current.unwrap_or_default();
                info!(
                    changes = ?current.key_changes(manifest),
                    "DRY RUN: would write ingestor global manifest"
                );
            }
            Err(e) => warn!(
                error = %e,
                "DRY RUN: would write ingestor global manifest (current value unreadable, no diff)"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryKeyStore, InMemoryManifestStore};
    use key_rotator_keys::{MaterialKind, Version};
    use std::sync::Arc;

    fn key(ts: i64) -> Key {
        Key::new(Version::new(MaterialKind::P256.generate().unwrap(), ts), vec![]).unwrap()
    }

    #[tokio::test]
    async fn test_key_puts_do_not_write() {
        let inner = Arc::new(InMemoryKeyStore::new());
        let existing = key(5);
        inner.put_packet_encryption_key("us-ct", &existing).await.unwrap();

        let store = DryRunKeyStore::new(inner.clone());
        store.put_packet_encryption_key("us-ct", &key(10)).await.unwrap();
        store
            .put_batch_signing_key("us-ct", "ingestor-1", &key(10))
            .await
            .unwrap();

        assert_eq!(inner.write_count(), 1);
        assert_eq!(store.get_packet_encryption_key("us-ct").await.unwrap(), existing);
    }

    #[tokio::test]
    async fn test_key_put_succeeds_when_current_unreadable() {
        let inner = Arc::new(InMemoryKeyStore::new());
        inner.fail_reads(true);
        let store = DryRunKeyStore::new(inner.clone());
        assert!(store.put_packet_encryption_key("us-ct", &key(10)).await.is_ok());
        // Reads still surface errors.
        assert!(store.get_packet_encryption_key("us-ct").await.is_err());
    }

    #[tokio::test]
    async fn test_manifest_puts_do_not_write() {
        let inner = Arc::new(InMemoryManifestStore::new());
        let store = DryRunManifestStore::new(inner.clone());
        store
            .put_data_share_processor_specific_manifest(
                "us-ct-ingestor-1",
                &DataShareProcessorSpecificManifest::default(),
            )
            .await
            .unwrap();
        store
            .put_ingestor_global_manifest(&IngestorGlobalManifest::default())
            .await
            .unwrap();

        assert_eq!(inner.write_count(), 0);
        assert!(store
            .get_data_share_processor_specific_manifest("us-ct-ingestor-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_global_manifest_put_does_not_write() {
        let inner = Arc::new(InMemoryManifestStore::new());
        let existing = IngestorGlobalManifest::default();
        inner.put_ingestor_global_manifest(&existing).await.unwrap();

        let store = DryRunManifestStore::new(inner.clone());
        let mut manifest = IngestorGlobalManifest::default();
        manifest.batch_signing_public_keys.insert(
            "prod-us-ct-ingestor-1-batch-signing-key-100".to_string(),
            crate::manifest::BatchSigningPublicKey {
                public_key: "pem".to_string(),
                expiration: String::new(),
            },
        );
        store.put_ingestor_global_manifest(&manifest).await.unwrap();
        assert_eq!(inner.write_count(), 1);
        assert_eq!(
            store.get_ingestor_global_manifest().await.unwrap(),
            Some(existing)
        );

        // An unreadable current value still lets the put succeed
        inner.fail_reads(true);
        assert!(store.put_ingestor_global_manifest(&manifest).await.is_ok());
        assert_eq!(inner.write_count(), 1);
    }
}
