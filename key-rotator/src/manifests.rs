//! Rebuilding manifest key sections from current keys
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


use crate::orchestrator::KeyKind;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use key_rotator_keys::{Key, KeyError, KeyResult};
use key_rotator_storage::{
    BatchSigningPublicKey, BatchSigningPublicKeys, DataShareProcessorSpecificManifest,
    PacketEncryptionCertificate, PacketEncryptionKeyCsrs,
};

/// Identifier of one published key version:
/// `{environment}-{locality}[-{ingestor}]-{kind}-key-{creation_timestamp}`
pub fn key_identifier(
    environment: &str,
    locality: &str,
    ingestor: Option<&str>,
    kind: KeyKind,
    creation_timestamp: i64,
) -> String {
    match ingestor {
        Some(ingestor) => format!(
            "{}-{}-{}-{}-key-{}",
            environment,
            locality,
            ingestor,
            kind.identifier_label(),
            creation_timestamp
        ),
        None => format!(
            "{}-{}-{}-key-{}",
            environment,
            locality,
            kind.identifier_label(),
            creation_timestamp
        ),
    }
}

/// RFC 3339 time at which a version created at `creation_timestamp` becomes
/// eligible for deletion
fn expiration(creation_timestamp: i64, delete_min_age: Duration) -> KeyResult<String> {
    let expires_at = creation_timestamp
        .checked_add(delete_min_age.num_seconds())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| {
            KeyError::Encoding(format!(
                "expiration of version {} is out of range",
                creation_timestamp
            ))
        })?;
    Ok(expires_at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Public keys for every version of a batch signing key
pub fn batch_signing_public_keys(
    key: &Key,
    environment: &str,
    locality: &str,
    ingestor: &str,
    delete_min_age: Duration,
) -> KeyResult<BatchSigningPublicKeys> {
    key.versions()
        .iter()
        .map(|version| {
            let id = key_identifier(
                environment,
                locality,
                Some(ingestor),
                KeyKind::BatchSigning,
                version.creation_timestamp(),
            );
            let entry = BatchSigningPublicKey {
                public_key: version.key_material().public_as_pkix()?,
                expiration: expiration(version.creation_timestamp(), delete_min_age)?,
            };
            Ok((id, entry))
        })
        .collect()
}

/// Certificate signing requests for every version of a packet encryption key
pub fn packet_encryption_key_csrs(
    key: &Key,
    environment: &str,
    locality: &str,
    csr_common_name: &str,
) -> KeyResult<PacketEncryptionKeyCsrs> {
    key.versions()
        .iter()
        .map(|version| {
            let id = key_identifier(
                environment,
                locality,
                None,
                KeyKind::PacketEncryption,
                version.creation_timestamp(),
            );
            let entry = PacketEncryptionCertificate {
                certificate_signing_request: version
                    .key_material()
                    .public_as_csr(csr_common_name)?,
            };
            Ok((id, entry))
        })
        .collect()
}

/// Copy of `manifest` with its key sections replaced
pub fn with_keys(
    manifest: &DataShareProcessorSpecificManifest,
    batch_signing_public_keys: BatchSigningPublicKeys,
    packet_encryption_keys: PacketEncryptionKeyCsrs,
) -> DataShareProcessorSpecificManifest {
    DataShareProcessorSpecificManifest {
        batch_signing_public_keys,
        packet_encryption_keys,
        ..manifest.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use key_rotator_keys::{MaterialKind, Version};

    fn key(primary: i64, others: &[i64]) -> Key {
        let version = |ts| Version::new(MaterialKind::P256.generate().unwrap(), ts);
        Key::new(version(primary), others.iter().map(|&ts| version(ts))).unwrap()
    }

    #[test]
    fn test_key_identifiers() {
        assert_eq!(
            key_identifier("prod", "us-ct", Some("ingestor-1"), KeyKind::BatchSigning, 1600000000),
            "prod-us-ct-ingestor-1-batch-signing-key-1600000000"
        );
        assert_eq!(
            key_identifier("prod", "us-ct", None, KeyKind::PacketEncryption, 1600000000),
            "prod-us-ct-packet-decryption-key-1600000000"
        );
    }

    #[test]
    fn test_batch_signing_entries() {
        let k = key(1_000, &[2_000]);
        let entries =
            batch_signing_public_keys(&k, "prod", "us-ct", "ingestor-1", Duration::days(1))
                .unwrap();
        assert_eq!(entries.len(), 2);

        let entry = &entries["prod-us-ct-ingestor-1-batch-signing-key-1000"];
        assert!(entry.public_key.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(entry.expiration, "1970-01-02T00:16:40Z");
        assert!(entries.contains_key("prod-us-ct-ingestor-1-batch-signing-key-2000"));
    }

    #[test]
    fn test_expiration_out_of_range() {
        assert!(expiration(i64::MAX, Duration::days(1)).is_err());
    }

    #[test]
    fn test_packet_encryption_entries_are_stable() {
        let k = key(1_000, &[]);
        let first = packet_encryption_key_csrs(&k, "prod", "us-ct", "us-ct.example.com").unwrap();
        let second = packet_encryption_key_csrs(&k, "prod", "us-ct", "us-ct.example.com").unwrap();
        assert_eq!(first, second);
        assert!(first["prod-us-ct-packet-decryption-key-1000"]
            .certificate_signing_request
            .starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
    }

    #[test]
    fn test_with_keys_preserves_other_fields() {
        let mut manifest = DataShareProcessorSpecificManifest::default();
        manifest.ingestion_bucket = Some("gs://ingestion".to_string());
        manifest
            .other
            .insert("extra".to_string(), serde_json::Value::Bool(true));

        let k = key(1_000, &[]);
        let updated = with_keys(
            &manifest,
            batch_signing_public_keys(&k, "prod", "us-ct", "ingestor-1", Duration::days(1)).unwrap(),
            PacketEncryptionKeyCsrs::new(),
        );
        assert_eq!(updated.ingestion_bucket, manifest.ingestion_bucket);
        assert_eq!(updated.other, manifest.other);
        assert_eq!(updated.batch_signing_public_keys.len(), 1);
    }
}
