//! Storage capability interfaces
//!
//! Backends implement these traits:
//! - Local encrypted secret directory ([`crate::local_store::LocalKeyStore`])
//! - Manifest directory ([`crate::file_manifest::FileManifestStore`])
//! - In-memory doubles ([`crate::memory`])
//!
//! Decorators in [`crate::backup`] and [`crate::dry_run`] wrap a backend and
//! expose the same interface.
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
use async_trait::async_trait;
use key_rotator_keys::Key;
use std::sync::Arc;

/// Secret name of a batch signing key
pub fn batch_signing_key_name(locality: &str, ingestor: &str) -> String {
    format!("{}-{}-batch-signing-key", locality, ingestor)
}

/// Secret name of a locality's packet encryption key
pub fn packet_encryption_key_name(locality: &str) -> String {
    format!("{}-packet-decryption-key", locality)
}

/// Data share processor name of a (locality, ingestor) pair
pub fn data_share_processor_name(locality: &str, ingestor: &str) -> String {
    format!("{}-{}", locality, ingestor)
}

/// Trait for key storage backends.
///
/// A key that has never been stored is returned as [`Key::empty`].
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_batch_signing_key(&self, locality: &str, ingestor: &str) -> StoreResult<Key>;

    async fn put_batch_signing_key(
        &self,
        locality: &str,
        ingestor: &str,
        key: &Key,
    ) -> StoreResult<()>;

    async fn get_packet_encryption_key(&self, locality: &str) -> StoreResult<Key>;

    async fn put_packet_encryption_key(&self, locality: &str, key: &Key) -> StoreResult<()>;
}

/// Trait for manifest storage backends.
///
/// A manifest that has never been stored is returned as `None`.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn get_data_share_processor_specific_manifest(
        &self,
        name: &str,
    ) -> StoreResult<Option<DataShareProcessorSpecificManifest>>;

    async fn put_data_share_processor_specific_manifest(
        &self,
        name: &str,
        manifest: &DataShareProcessorSpecificManifest,
    ) -> StoreResult<()>;

    async fn get_ingestor_global_manifest(&self) -> StoreResult<Option<IngestorGlobalManifest>>;

    async fn put_ingestor_global_manifest(
        &self,
        manifest: &IngestorGlobalManifest,
    ) -> StoreResult<()>;
}

#[async_trait]
impl<T: KeyStore + ?Sized> KeyStore for Arc<T> {
    async fn get_batch_signing_key(&self, locality: &str, ingestor: &str) -> StoreResult<Key> {
        (**self).get_batch_signing_key(locality, ingestor).await
    }

    async fn put_batch_signing_key(
        &self,
        locality: &str,
        ingestor: &str,
        key: &Key,
    ) -> StoreResult<()> {
        (**self).put_batch_signing_key(locality, ingestor, key).await
    }

    async fn get_packet_encryption_key(&self, locality: &str) -> StoreResult<Key> {
        (**self).get_packet_encryption_key(locality).await
    }

    async fn put_packet_encryption_key(&self, locality: &str, key: &Key) -> StoreResult<()> {
        (**self).put_packet_encryption_key(locality, key).await
    }
}

#[async_trait]
impl<T: ManifestStore + ?Sized> ManifestStore for Arc<T> {
    async fn get_data_share_processor_specific_manifest(
        &self,
        name: &str,
    ) -> StoreResult<Option<DataShareProcessorSpecificManifest>> {
        (**self).get_data_share_processor_specific_manifest(name).await
    }

    async fn put_data_share_processor_specific_manifest(
        &self,
        name: &str,
        manifest: &DataShareProcessorSpecificManifest,
    ) -> StoreResult<()> {
        (**self)
            .put_data_share_processor_specific_manifest(name, manifest)
            .await
    }

    async fn get_ingestor_global_manifest(&self) -> StoreResult<Option<IngestorGlobalManifest>> {
        (**self).get_ingestor_global_manifest().await
    }

    async fn put_ingestor_global_manifest(
        &self,
        manifest: &IngestorGlobalManifest,
    ) -> StoreResult<()> {
        (**self).put_ingestor_global_manifest(manifest).await
    }
}
