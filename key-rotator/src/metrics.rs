//! Rotation metrics
//!
//! The orchestrator reports through [`MetricsSink`]; [`RotationMetrics`] keeps
//! in-process counters and per-locality gauges that the binary logs when a
//! run finishes.
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
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Receives rotation events
pub trait MetricsSink: Send + Sync {
    /// A key was written to the key store
    fn key_written(&self, kind: KeyKind);

    /// A manifest was written to the manifest store
    fn manifest_written(&self);

    /// A locality finished rotating without error at `at` (Unix seconds)
    fn run_succeeded(&self, locality: &str, at: i64);

    /// A locality failed to rotate at `at` (Unix seconds)
    fn run_failed(&self, locality: &str, at: i64);
}

/// Discards all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn key_written(&self, _kind: KeyKind) {}
    fn manifest_written(&self) {}
    fn run_succeeded(&self, _locality: &str, _at: i64) {}
    fn run_failed(&self, _locality: &str, _at: i64) {}
}

/// Last outcome timestamps for one locality
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LocalityStatus {
    pub last_success: Option<i64>,
    pub last_failure: Option<i64>,
}

/// Counters and gauges for rotation runs
#[derive(Debug, Default)]
pub struct RotationMetrics {
    batch_signing_keys_written: AtomicU64,
    packet_encryption_keys_written: AtomicU64,
    manifests_written: AtomicU64,
    successful_runs: AtomicU64,
    failed_runs: AtomicU64,
    localities: RwLock<BTreeMap<String, LocalityStatus>>,
}

impl RotationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_locality(&self, locality: &str, update: impl FnOnce(&mut LocalityStatus)) {
        let mut localities = self
            .localities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(localities.entry(locality.to_string()).or_default());
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> RotationMetricsSnapshot {
        RotationMetricsSnapshot {
            batch_signing_keys_written: self.batch_signing_keys_written.load(Ordering::SeqCst),
            packet_encryption_keys_written: self
                .packet_encryption_keys_written
                .load(Ordering::SeqCst),
            manifests_written: self.manifests_written.load(Ordering::SeqCst),
            successful_runs: self.successful_runs.load(Ordering::SeqCst),
            failed_runs: self.failed_runs.load(Ordering::SeqCst),
            localities: self
                .localities
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

impl MetricsSink for RotationMetrics {
    fn key_written(&self, kind: KeyKind) {
        let counter = match kind {
            KeyKind::BatchSigning => &self.batch_signing_keys_written,
            KeyKind::PacketEncryption => &self.packet_encryption_keys_written,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn manifest_written(&self) {
        self.manifests_written.fetch_add(1, Ordering::SeqCst);
    }

    fn run_succeeded(&self, locality: &str, at: i64) {
        self.successful_runs.fetch_add(1, Ordering::SeqCst);
        self.update_locality(locality, |status| status.last_success = Some(at));
    }

    fn run_failed(&self, locality: &str, at: i64) {
        self.failed_runs.fetch_add(1, Ordering::SeqCst);
        self.update_locality(locality, |status| status.last_failure = Some(at));
    }
}

/// Snapshot of rotation metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationMetricsSnapshot {
    pub batch_signing_keys_written: u64,
    pub packet_encryption_keys_written: u64,
    pub manifests_written: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub localities: BTreeMap<String, LocalityStatus>,
}
