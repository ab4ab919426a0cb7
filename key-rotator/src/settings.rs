//! Rotation settings from configuration
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
use crate::orchestrator::{KeyKind, KeyRotationSettings, LocalityTarget};
use chrono::Duration;
use key_rotator_config::{KeyPolicyConfig, RotatorConfig};
use key_rotator_keys::{KeyError, MaterialKind, RotationConfig};
use std::sync::Arc;

fn duration(kind: KeyKind, field: &str, secs: u64) -> RotatorResult<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| RotatorError::ConfigValidation {
            kind,
            source: KeyError::InvalidConfig(format!("{} of {} seconds is out of range", field, secs)),
        })
}

/// Build the settings for one kind of key from its policy section
///
/// New versions are P-256 keys.
pub fn key_rotation_settings(
    kind: KeyKind,
    policy: &KeyPolicyConfig,
) -> RotatorResult<KeyRotationSettings> {
    let rotation = RotationConfig::new(
        Arc::new(MaterialKind::P256),
        duration(kind, "create_min_age", policy.create_min_age_secs)?,
        duration(kind, "primary_min_age", policy.primary_min_age_secs)?,
        duration(kind, "delete_min_age", policy.delete_min_age_secs)?,
        policy.delete_min_key_count,
    );
    rotation
        .validate()
        .map_err(|source| RotatorError::ConfigValidation { kind, source })?;

    Ok(KeyRotationSettings {
        rotation,
        enable_rotation: policy.enable_rotation,
        always_write: policy.always_write,
    })
}

/// One target per configured locality, each with every configured ingestor
pub fn locality_targets(config: &RotatorConfig) -> Vec<LocalityTarget> {
    config
        .localities
        .iter()
        .map(|locality| LocalityTarget {
            locality: locality.clone(),
            ingestors: config.ingestors.clone(),
            csr_common_name: config.csr_common_name(locality),
        })
        .collect()
}
