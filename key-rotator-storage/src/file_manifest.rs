//! Manifest storage in a local directory
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
use crate::store::ManifestStore;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const GLOBAL_MANIFEST_FILE: &str = "global-manifest.json";

/// Manifests stored as `{name}-manifest.json` files, laid out the way they
/// are served from a manifest bucket
pub struct FileManifestStore {
    root: PathBuf,
}

impl FileManifestStore {
    pub async fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        let sanitized = name.replace('/', "_").replace('\\', "_");
        self.root.join(format!("{}-manifest.json", sanitized))
    }

    async fn read<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<Option<T>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Manifest not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize>(&self, path: &Path, manifest: &T) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Manifest written");
        Ok(())
    }
}

#[async_trait]
impl ManifestStore for FileManifestStore {
    async fn get_data_share_processor_specific_manifest(
        &self,
        name: &str,
    ) -> StoreResult<Option<DataShareProcessorSpecificManifest>> {
        self.read(&self.manifest_path(name)).await
    }

    async fn put_data_share_processor_specific_manifest(
        &self,
        name: &str,
        manifest: &DataShareProcessorSpecificManifest,
    ) -> StoreResult<()> {
        self.write(&self.manifest_path(name), manifest).await
    }

    async fn get_ingestor_global_manifest(&self) -> StoreResult<Option<IngestorGlobalManifest>> {
        self.read(&self.root.join(GLOBAL_MANIFEST_FILE)).await
    }

    async fn put_ingestor_global_manifest(
        &self,
        manifest: &IngestorGlobalManifest,
    ) -> StoreResult<()> {
        self.write(&self.root.join(GLOBAL_MANIFEST_FILE), manifest)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::manifest::BatchSigningPublicKey;

    #[tokio::test]
    async fn test_missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path()).await.unwrap();
        assert!(store
            .get_data_share_processor_specific_manifest("us-ct-ingestor-1")
            .await
            .unwrap()
            .is_none());
        assert!(store.get_ingestor_global_manifest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path()).await.unwrap();

        let mut manifest = DataShareProcessorSpecificManifest::default();
        manifest.ingestion_bucket = Some("s3://ingestion".to_string());
        manifest.batch_signing_public_keys.insert(
            "key-1".to_string(),
            BatchSigningPublicKey {
                public_key: "pem".to_string(),
                expiration: String::new(),
            },
        );
        store
            .put_data_share_processor_specific_manifest("us-ct-ingestor-1", &manifest)
            .await
            .unwrap();

        assert!(dir.path().join("us-ct-ingestor-1-manifest.json").exists());
        assert_eq!(
            store
                .get_data_share_processor_specific_manifest("us-ct-ingestor-1")
                .await
                .unwrap(),
            Some(manifest)
        );

        let global = IngestorGlobalManifest::default();
        store.put_ingestor_global_manifest(&global).await.unwrap();
        assert_eq!(store.get_ingestor_global_manifest().await.unwrap(), Some(global));
    }

    #[tokio::test]
    async fn test_malformed_manifest_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("bad-manifest.json"), "{not json").unwrap();
        assert!(matches!(
            store.get_data_share_processor_specific_manifest("bad").await,
            Err(StoreError::Serialization(_))
        ));
    }
}
