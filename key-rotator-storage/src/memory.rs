//! In-memory stores with fault injection, for tests and local previews
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
use crate::manifest::{DataShareProcessorSpecificManifest, IngestorGlobalManifest};
use crate::store::{batch_signing_key_name, packet_encryption_key_name, KeyStore, ManifestStore};
use async_trait::async_trait;
use key_rotator_keys::Key;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

/// Injected failures shared by the in-memory stores
#[derive(Default)]
struct Faults {
    fail_reads: AtomicBool,
    fail_all_writes: AtomicBool,
    fail_writes: Mutex<HashSet<String>>,
}

impl Faults {
    fn check_read(&self, name: &str) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("injected read failure for {}", name)));
        }
        Ok(())
    }

    fn check_write(&self, name: &str) -> StoreResult<()> {
        let targeted = self
            .fail_writes
            .lock()
            .map(|names| names.contains(name))
            .unwrap_or(false);
        if targeted || self.fail_all_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("injected write failure for {}", name)));
        }
        Ok(())
    }

    fn fail_write(&self, name: String) {
        if let Ok(mut names) = self.fail_writes.lock() {
            names.insert(name);
        }
    }

    fn clear(&self) {
        self.fail_reads.store(false, Ordering::SeqCst);
        self.fail_all_writes.store(false, Ordering::SeqCst);
        if let Ok(mut names) = self.fail_writes.lock() {
            names.clear();
        }
    }
}

/// Key store holding keys in memory, keyed by secret name
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, Key>>,
    writes: AtomicUsize,
    faults: Faults,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every read fail
    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail
    pub fn fail_all_writes(&self, fail: bool) {
        self.faults.fail_all_writes.store(fail, Ordering::SeqCst);
    }

    /// Make writes of one ingestor's batch signing key fail
    pub fn fail_batch_signing_key_writes(&self, locality: &str, ingestor: &str) {
        self.faults
            .fail_write(batch_signing_key_name(locality, ingestor));
    }

    /// Make writes of a locality's packet encryption key fail
    pub fn fail_packet_encryption_key_writes(&self, locality: &str) {
        self.faults.fail_write(packet_encryption_key_name(locality));
    }

    /// Remove all injected failures
    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    async fn read(&self, name: String) -> StoreResult<Key> {
        self.faults.check_read(&name)?;
        let keys = self.keys.read().await;
        Ok(keys.get(&name).cloned().unwrap_or_default())
    }

    async fn write(&self, name: String, key: &Key) -> StoreResult<()> {
        self.faults.check_write(&name)?;
        let mut keys = self.keys.write().await;
        keys.insert(name, key.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get_batch_signing_key(&self, locality: &str, ingestor: &str) -> StoreResult<Key> {
        self.read(batch_signing_key_name(locality, ingestor)).await
    }

    async fn put_batch_signing_key(
        &self,
        locality: &str,
        ingestor: &str,
        key: &Key,
    ) -> StoreResult<()> {
        self.write(batch_signing_key_name(locality, ingestor), key)
            .await
    }

    async fn get_packet_encryption_key(&self, locality: &str) -> StoreResult<Key> {
        self.read(packet_encryption_key_name(locality)).await
    }

    async fn put_packet_encryption_key(&self, locality: &str, key: &Key) -> StoreResult<()> {
        self.write(packet_encryption_key_name(locality), key).await
    }
}

/// Manifest store holding manifests in memory
#[derive(Default)]
pub struct InMemoryManifestStore {
    manifests: RwLock<HashMap<String, DataShareProcessorSpecificManifest>>,
    global: RwLock<Option<IngestorGlobalManifest>>,
    writes: AtomicUsize,
    faults: Faults,
}

impl InMemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_all_writes(&self, fail: bool) {
        self.faults.fail_all_writes.store(fail, Ordering::SeqCst);
    }

    /// Make writes of the named data share processor manifest fail
    pub fn fail_manifest_writes(&self, name: &str) {
        self.faults.fail_write(name.to_string());
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }
}

#[async_trait]
impl ManifestStore for InMemoryManifestStore {
    async fn get_data_share_processor_specific_manifest(
        &self,
        name: &str,
    ) -> StoreResult<Option<DataShareProcessorSpecificManifest>> {
        self.faults.check_read(name)?;
        Ok(self.manifests.read().await.get(name).cloned())
    }

    async fn put_data_share_processor_specific_manifest(
        &self,
        name: &str,
        manifest: &DataShareProcessorSpecificManifest,
    ) -> StoreResult<()> {
        self.faults.check_write(name)?;
        self.manifests
            .write()
            .await
            .insert(name.to_string(), manifest.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_ingestor_global_manifest(&self) -> StoreResult<Option<IngestorGlobalManifest>> {
        self.faults.check_read("global")?;
        Ok(self.global.read().await.clone())
    }

    async fn put_ingestor_global_manifest(
        &self,
        manifest: &IngestorGlobalManifest,
    ) -> StoreResult<()> {
        self.faults.check_write("global")?;
        *self.global.write().await = Some(manifest.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use key_rotator_keys::{MaterialKind, Version};

    fn key(ts: i64) -> Key {
        Key::new(Version::new(MaterialKind::P256.generate().unwrap(), ts), vec![]).unwrap()
    }

    #[tokio::test]
    async fn test_key_store_round_trip() {
        let store = InMemoryKeyStore::new();
        assert!(store.get_packet_encryption_key("us-ct").await.unwrap().is_empty());

        let k = key(10);
        store.put_packet_encryption_key("us-ct", &k).await.unwrap();
        assert_eq!(store.get_packet_encryption_key("us-ct").await.unwrap(), k);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_key_store_faults() {
        let store = InMemoryKeyStore::new();
        store.fail_batch_signing_key_writes("us-ct", "ingestor-1");
        assert!(store
            .put_batch_signing_key("us-ct", "ingestor-1", &key(10))
            .await
            .is_err());
        assert!(store
            .put_batch_signing_key("us-ct", "ingestor-2", &key(10))
            .await
            .is_ok());

        store.fail_reads(true);
        assert!(store.get_packet_encryption_key("us-ct").await.is_err());

        store.clear_faults();
        assert!(store.get_packet_encryption_key("us-ct").await.is_ok());
        assert!(store
            .put_batch_signing_key("us-ct", "ingestor-1", &key(10))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_manifest_store_round_trip() {
        let store = InMemoryManifestStore::new();
        assert!(store
            .get_data_share_processor_specific_manifest("us-ct-ingestor-1")
            .await
            .unwrap()
            .is_none());

        let manifest = DataShareProcessorSpecificManifest::default();
        store
            .put_data_share_processor_specific_manifest("us-ct-ingestor-1", &manifest)
            .await
            .unwrap();
        assert_eq!(
            store
                .get_data_share_processor_specific_manifest("us-ct-ingestor-1")
                .await
                .unwrap(),
            Some(manifest)
        );

        store.fail_manifest_writes("us-ct-ingestor-1");
        assert!(store
            .put_data_share_processor_specific_manifest(
                "us-ct-ingestor-1",
                &DataShareProcessorSpecificManifest::default()
            )
            .await
            .is_err());
        assert_eq!(store.write_count(), 1);
    }
}
