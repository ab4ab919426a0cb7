//! Read, rotate and write pipeline for one locality
//!
//! Keys are always written before manifests, so an interrupted run can leave
//! a stored key that is not yet advertised but never an advertised key that
//! was not stored. Every manifest is recomputed on every run, which repairs
//! runs that stopped between the two phases.
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


use crate::error::{RotatorError, RotatorResult};
use crate::manifests;
use crate::metrics::{MetricsSink, NoopMetrics};
use futures::future::{join, join_all, try_join, try_join_all};
use key_rotator_keys::{Key, RotationConfig};
use key_rotator_storage::{
    data_share_processor_name, DataShareProcessorSpecificManifest, KeyStore, ManifestStore,
    StoreError,
};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The two kinds of key managed per locality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    BatchSigning,
    PacketEncryption,
}

impl KeyKind {
    /// Label used in published key identifiers
    pub fn identifier_label(self) -> &'static str {
        match self {
            KeyKind::BatchSigning => "batch-signing",
            KeyKind::PacketEncryption => "packet-decryption",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::BatchSigning => write!(f, "batch-signing"),
            KeyKind::PacketEncryption => write!(f, "packet-encryption"),
        }
    }
}

/// Rotation policy and write overrides for one kind of key
#[derive(Debug, Clone)]
pub struct KeyRotationSettings {
    pub rotation: RotationConfig,
    /// When false, provisioned keys are carried forward unchanged
    pub enable_rotation: bool,
    /// Write even when the value is unchanged
    pub always_write: bool,
}

/// A locality to rotate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalityTarget {
    pub locality: String,
    pub ingestors: Vec<String>,
    /// Common name of the packet encryption CSRs
    pub csr_common_name: String,
}

/// Writes performed by one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationOutcome {
    pub keys_written: usize,
    pub manifests_written: usize,
}

/// State read for one ingestor
struct IngestorState {
    ingestor: String,
    batch_signing_key: Key,
    manifest: DataShareProcessorSpecificManifest,
}

/// State after rotation, ready to be written
struct IngestorUpdate {
    ingestor: String,
    old_key: Key,
    new_key: Key,
    old_manifest: DataShareProcessorSpecificManifest,
    new_manifest: DataShareProcessorSpecificManifest,
}

/// Rotates keys and republishes manifests
pub struct Rotator {
    key_store: Arc<dyn KeyStore>,
    manifest_store: Arc<dyn ManifestStore>,
    environment: String,
    batch_signing: KeyRotationSettings,
    packet_encryption: KeyRotationSettings,
    metrics: Arc<dyn MetricsSink>,
    cancellation_token: CancellationToken,
}

impl Rotator {
    pub fn new(
        key_store: Arc<dyn KeyStore>,
        manifest_store: Arc<dyn ManifestStore>,
        environment: impl Into<String>,
        batch_signing: KeyRotationSettings,
        packet_encryption: KeyRotationSettings,
    ) -> Self {
        Self {
            key_store,
            manifest_store,
            environment: environment.into(),
            batch_signing,
            packet_encryption,
            metrics: Arc::new(NoopMetrics),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Stop issuing I/O once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    fn check_cancelled(&self) -> RotatorResult<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(RotatorError::Cancelled);
        }
        Ok(())
    }

    fn settings(&self, kind: KeyKind) -> &KeyRotationSettings {
        match kind {
            KeyKind::BatchSigning => &self.batch_signing,
            KeyKind::PacketEncryption => &self.packet_encryption,
        }
    }

    /// Validate both rotation policies
    pub fn validate(&self) -> RotatorResult<()> {
        for kind in [KeyKind::BatchSigning, KeyKind::PacketEncryption] {
            self.settings(kind)
                .rotation
                .validate()
                .map_err(|source| RotatorError::ConfigValidation { kind, source })?;
        }
        Ok(())
    }

    /// Rotate every target concurrently, one task per locality
    ///
    /// Results are returned in the order of `targets`.
    pub async fn rotate_localities(
        self: &Arc<Self>,
        now: i64,
        targets: Vec<LocalityTarget>,
    ) -> Vec<(String, RotatorResult<RotationOutcome>)> {
        let handles: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let rotator = Arc::clone(self);
                let locality = target.locality.clone();
                let handle =
                    tokio::spawn(async move { rotator.rotate_locality(now, &target).await });
                (locality, handle)
            })
            .collect();

        let (localities, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        localities
            .into_iter()
            .zip(results)
            .map(|(locality, result)| {
                let result = result.unwrap_or_else(|e| Err(RotatorError::Task(e.to_string())));
                (locality, result)
            })
            .collect()
    }

    /// Run the full pipeline for one locality at time `now` (Unix seconds)
    pub async fn rotate_locality(
        &self,
        now: i64,
        target: &LocalityTarget,
    ) -> RotatorResult<RotationOutcome> {
        let result = self.run(now, target).await;
        match &result {
            Ok(outcome) => {
                info!(
                    locality = %target.locality,
                    keys_written = outcome.keys_written,
                    manifests_written = outcome.manifests_written,
                    "Locality rotated"
                );
                self.metrics.run_succeeded(&target.locality, now);
            }
            Err(e) => {
                error!(locality = %target.locality, error = %e, "Locality rotation failed");
                self.metrics.run_failed(&target.locality, now);
            }
        }
        result
    }

    async fn run(&self, now: i64, target: &LocalityTarget) -> RotatorResult<RotationOutcome> {
        self.validate()?;
        let locality = target.locality.as_str();

        // Read
        let (packet_encryption_key, ingestors) = self.read(locality, &target.ingestors).await?;

        // Rotate
        let new_packet_encryption_key = self.rotate_key(
            KeyKind::PacketEncryption,
            locality,
            None,
            &packet_encryption_key,
            now,
        )?;
        let packet_encryption_keys = manifests::packet_encryption_key_csrs(
            &new_packet_encryption_key,
            &self.environment,
            locality,
            &target.csr_common_name,
        )
        .map_err(|source| RotatorError::Rotation {
            locality: locality.to_string(),
            ingestor: None,
            kind: KeyKind::PacketEncryption,
            source,
        })?;

        let mut updates = Vec::with_capacity(ingestors.len());
        for state in ingestors {
            let new_key = self.rotate_key(
                KeyKind::BatchSigning,
                locality,
                Some(&state.ingestor),
                &state.batch_signing_key,
                now,
            )?;

            // Recompute every manifest, changed key or not
            let batch_signing_public_keys = manifests::batch_signing_public_keys(
                &new_key,
                &self.environment,
                locality,
                &state.ingestor,
                self.batch_signing.rotation.delete_min_age,
            )
            .map_err(|source| RotatorError::Rotation {
                locality: locality.to_string(),
                ingestor: Some(state.ingestor.clone()),
                kind: KeyKind::BatchSigning,
                source,
            })?;
            let new_manifest = manifests::with_keys(
                &state.manifest,
                batch_signing_public_keys,
                packet_encryption_keys.clone(),
            );

            updates.push(IngestorUpdate {
                ingestor: state.ingestor,
                old_key: state.batch_signing_key,
                new_key,
                old_manifest: state.manifest,
                new_manifest,
            });
        }

        // Write keys, then manifests
        let keys_written = self
            .write_keys(
                locality,
                &packet_encryption_key,
                &new_packet_encryption_key,
                &updates,
            )
            .await?;
        let manifests_written = self.write_manifests(locality, &updates).await?;

        Ok(RotationOutcome {
            keys_written,
            manifests_written,
        })
    }

    /// Fetch the packet encryption key and every ingestor's key and manifest
    ///
    /// The first failure drops all outstanding fetches.
    async fn read(
        &self,
        locality: &str,
        ingestors: &[String],
    ) -> RotatorResult<(Key, Vec<IngestorState>)> {
        self.check_cancelled()?;

        let packet_encryption_key = async {
            self.check_cancelled()?;
            self.key_store
                .get_packet_encryption_key(locality)
                .await
                .map_err(|source| RotatorError::Read {
                    locality: locality.to_string(),
                    ingestor: None,
                    what: "packet encryption key".to_string(),
                    source,
                })
        };
        let ingestor_states = try_join_all(
            ingestors
                .iter()
                .map(|ingestor| self.read_ingestor(locality, ingestor)),
        );

        let (key, states) = try_join(packet_encryption_key, ingestor_states).await?;
        debug!(locality, ingestors = states.len(), "Current state read");
        Ok((key, states))
    }

    async fn read_ingestor(&self, locality: &str, ingestor: &str) -> RotatorResult<IngestorState> {
        self.check_cancelled()?;
        let read_error = |what: &str, source: StoreError| RotatorError::Read {
            locality: locality.to_string(),
            ingestor: Some(ingestor.to_string()),
            what: what.to_string(),
            source,
        };
        let name = data_share_processor_name(locality, ingestor);

        let key = async {
            self.key_store
                .get_batch_signing_key(locality, ingestor)
                .await
                .map_err(|e| read_error("batch signing key", e))
        };
        let manifest = async {
            self.manifest_store
                .get_data_share_processor_specific_manifest(&name)
                .await
                .map_err(|e| read_error("manifest", e))?
                .ok_or_else(|| RotatorError::MissingManifest { name: name.clone() })
        };

        let (batch_signing_key, manifest) = try_join(key, manifest).await?;
        Ok(IngestorState {
            ingestor: ingestor.to_string(),
            batch_signing_key,
            manifest,
        })
    }

    fn rotate_key(
        &self,
        kind: KeyKind,
        locality: &str,
        ingestor: Option<&str>,
        key: &Key,
        now: i64,
    ) -> RotatorResult<Key> {
        let settings = self.settings(kind);
        if !key.is_empty() && !settings.enable_rotation {
            debug!(locality, ?ingestor, %kind, "Rotation disabled, keeping key");
            return Ok(key.clone());
        }
        key.rotate(now, &settings.rotation)
            .map_err(|source| RotatorError::Rotation {
                locality: locality.to_string(),
                ingestor: ingestor.map(str::to_string),
                kind,
                source,
            })
    }

    /// Write every changed key concurrently
    ///
    /// All writes are attempted; the first failure is returned once they
    /// have all finished.
    async fn write_keys(
        &self,
        locality: &str,
        old_packet_encryption_key: &Key,
        new_packet_encryption_key: &Key,
        updates: &[IngestorUpdate],
    ) -> RotatorResult<usize> {
        self.check_cancelled()?;

        let packet_encryption = self.write_packet_encryption_key(
            locality,
            old_packet_encryption_key,
            new_packet_encryption_key,
        );
        let batch_signing = join_all(
            updates
                .iter()
                .map(|update| self.write_batch_signing_key(locality, update)),
        );

        let (packet_encryption, batch_signing) = join(packet_encryption, batch_signing).await;
        collect_writes(std::iter::once(packet_encryption).chain(batch_signing))
    }

    async fn write_packet_encryption_key(
        &self,
        locality: &str,
        old: &Key,
        new: &Key,
    ) -> RotatorResult<bool> {
        let kind = KeyKind::PacketEncryption;
        if !self.should_write(kind, old, new) {
            return Ok(false);
        }
        self.check_cancelled()?;
        info!(locality, %kind, changes = ?old.diff(new), "Writing key");
        self.key_store
            .put_packet_encryption_key(locality, new)
            .await
            .map_err(|source| RotatorError::Write {
                locality: locality.to_string(),
                ingestor: None,
                what: "packet encryption key".to_string(),
                source,
            })?;
        self.metrics.key_written(kind);
        Ok(true)
    }

    async fn write_batch_signing_key(
        &self,
        locality: &str,
        update: &IngestorUpdate,
    ) -> RotatorResult<bool> {
        let kind = KeyKind::BatchSigning;
        if !self.should_write(kind, &update.old_key, &update.new_key) {
            return Ok(false);
        }
        self.check_cancelled()?;
        info!(
            locality,
            ingestor = %update.ingestor,
            %kind,
            changes = ?update.old_key.diff(&update.new_key),
            "Writing key"
        );
        self.key_store
            .put_batch_signing_key(locality, &update.ingestor, &update.new_key)
            .await
            .map_err(|source| RotatorError::Write {
                locality: locality.to_string(),
                ingestor: Some(update.ingestor.clone()),
                what: "batch signing key".to_string(),
                source,
            })?;
        self.metrics.key_written(kind);
        Ok(true)
    }

    /// Write every changed manifest concurrently
    async fn write_manifests(
        &self,
        locality: &str,
        updates: &[IngestorUpdate],
    ) -> RotatorResult<usize> {
        self.check_cancelled()?;
        let results = join_all(
            updates
                .iter()
                .map(|update| self.write_manifest(locality, update)),
        )
        .await;
        collect_writes(results)
    }

    async fn write_manifest(&self, locality: &str, update: &IngestorUpdate) -> RotatorResult<bool> {
        let always_write = self.batch_signing.always_write || self.packet_encryption.always_write;
        if !always_write && update.old_manifest == update.new_manifest {
            return Ok(false);
        }
        self.check_cancelled()?;
        let name = data_share_processor_name(locality, &update.ingestor);
        info!(
            manifest = %name,
            changes = ?update.old_manifest.key_changes(&update.new_manifest),
            "Writing manifest"
        );
        self.manifest_store
            .put_data_share_processor_specific_manifest(&name, &update.new_manifest)
            .await
            .map_err(|source| RotatorError::Write {
                locality: locality.to_string(),
                ingestor: Some(update.ingestor.clone()),
                what: "manifest".to_string(),
                source,
            })?;
        self.metrics.manifest_written();
        Ok(true)
    }

    fn should_write(&self, kind: KeyKind, old: &Key, new: &Key) -> bool {
        self.settings(kind).always_write || old != new
    }
}

/// Count successful writes, logging every failure and returning the first
fn collect_writes(
    results: impl IntoIterator<Item = RotatorResult<bool>>,
) -> RotatorResult<usize> {
    let mut written = 0;
    let mut first_error = None;
    for result in results {
        match result {
            Ok(true) => written += 1,
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "Write failed");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(written),
    }
}
