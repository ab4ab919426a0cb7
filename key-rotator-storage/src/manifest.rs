//! Manifest documents advertising public key material to peers
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


use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current manifest format version
pub const MANIFEST_FORMAT: u32 = 1;

/// A published batch signing public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BatchSigningPublicKey {
    /// PEM-encoded PKIX public key
    pub public_key: String,
    /// RFC 3339 time after which the key may be retired
    #[serde(default)]
    pub expiration: String,
}

/// A published packet encryption key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PacketEncryptionCertificate {
    /// PEM-encoded PKCS#10 certificate signing request
    pub certificate_signing_request: String,
}

pub type BatchSigningPublicKeys = BTreeMap<String, BatchSigningPublicKey>;
pub type PacketEncryptionKeyCsrs = BTreeMap<String, PacketEncryptionCertificate>;

/// Manifest published for a single (locality, ingestor) data share processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataShareProcessorSpecificManifest {
    pub format: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_validation_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_validation_bucket: Option<String>,
    #[serde(default)]
    pub batch_signing_public_keys: BatchSigningPublicKeys,
    #[serde(default)]
    pub packet_encryption_keys: PacketEncryptionKeyCsrs,
    /// Fields this service does not manage, carried through untouched
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl Default for DataShareProcessorSpecificManifest {
    fn default() -> Self {
        Self {
            format: MANIFEST_FORMAT,
            ingestion_identity: None,
            ingestion_bucket: None,
            peer_validation_identity: None,
            peer_validation_bucket: None,
            batch_signing_public_keys: BTreeMap::new(),
            packet_encryption_keys: BTreeMap::new(),
            other: serde_json::Map::new(),
        }
    }
}

impl DataShareProcessorSpecificManifest {
    /// Human-readable list of key entries that differ from `other`
    pub fn key_changes(&self, other: &Self) -> Vec<String> {
        let mut changes = map_changes(
            "batch signing key",
            &self.batch_signing_public_keys,
            &other.batch_signing_public_keys,
        );
        changes.extend(map_changes(
            "packet encryption key",
            &self.packet_encryption_keys,
            &other.packet_encryption_keys,
        ));
        changes
    }
}

/// Identity of an ingestor server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_iam_entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_service_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_service_account_email: Option<String>,
}

/// Manifest published by an ingestor for all of its peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IngestorGlobalManifest {
    pub format: u32,
    #[serde(default)]
    pub server_identity: ServerIdentity,
    #[serde(default)]
    pub batch_signing_public_keys: BatchSigningPublicKeys,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl Default for IngestorGlobalManifest {
    fn default() -> Self {
        Self {
            format: MANIFEST_FORMAT,
            server_identity: ServerIdentity::default(),
            batch_signing_public_keys: BTreeMap::new(),
            other: serde_json::Map::new(),
        }
    }
}

impl IngestorGlobalManifest {
    /// Human-readable list of key entries that differ from `other`
    pub fn key_changes(&self, other: &Self) -> Vec<String> {
        map_changes(
            "batch signing key",
            &self.batch_signing_public_keys,
            &other.batch_signing_public_keys,
        )
    }
}

fn map_changes<V: PartialEq>(
    what: &str,
    old: &BTreeMap<String, V>,
    new: &BTreeMap<String, V>,
) -> Vec<String> {
    let mut changes = Vec::new();
    for (id, value) in old {
        match new.get(id) {
            None => changes.push(format!("removed {} {}", what, id)),
            Some(v) if v != value => changes.push(format!("changed {} {}", what, id)),
            Some(_) => {}
        }
    }
    for id in new.keys().filter(|id| !old.contains_key(*id)) {
        changes.push(format!("added {} {}", what, id));
    }
    changes
}
