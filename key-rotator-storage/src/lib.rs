//! Key and manifest storage for the key rotator
//!
//! Defines the key store and manifest store capabilities, the manifest
//! documents, concrete local backends, and the backup and dry-run
//! decorators that wrap them.
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


pub mod backup;
pub mod dry_run;
pub mod error;
pub mod file_manifest;
pub mod local_store;
pub mod manifest;
pub mod memory;
pub mod store;

pub use backup::BackupKeyStore;
pub use dry_run::{DryRunKeyStore, DryRunManifestStore};
pub use error::{StoreError, StoreResult};
pub use file_manifest::FileManifestStore;
pub use local_store::LocalKeyStore;
pub use manifest::{
    BatchSigningPublicKey, BatchSigningPublicKeys, DataShareProcessorSpecificManifest,
    IngestorGlobalManifest, PacketEncryptionKeyCsrs,
    PacketEncryptionCertificate, ServerIdentity,
};
pub use memory::{InMemoryKeyStore, InMemoryManifestStore};
pub use store::{data_share_processor_name, KeyStore, ManifestStore};
