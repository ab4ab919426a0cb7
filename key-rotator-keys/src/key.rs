//! Versioned keys
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


use crate::error::{KeyError, KeyResult};
use crate::material::Material;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

/// One generation of key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    key_material: Material,
    /// Creation time, in seconds since the Unix epoch
    creation_timestamp: i64,
}

impl Version {
    pub fn new(key_material: Material, creation_timestamp: i64) -> Self {
        Self {
            key_material,
            creation_timestamp,
        }
    }

    pub fn key_material(&self) -> &Material {
        &self.key_material
    }

    pub fn creation_timestamp(&self) -> i64 {
        self.creation_timestamp
    }
}

/// An immutable set of key versions with a single primary version.
///
/// The primary version is stored first; the remaining versions follow in
/// descending creation order. Creation timestamps are unique within a key.
/// The empty key means "not yet provisioned".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Key {
    versions: Vec<Version>,
}

impl Key {
    /// The empty (unprovisioned) key
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a key from its primary version and any number of others
    pub fn new(primary: Version, others: impl IntoIterator<Item = Version>) -> KeyResult<Self> {
        let mut versions = vec![primary];
        versions.extend(others);
        Self::from_primary_first(versions)
    }

    /// Build a key from versions whose first element is the primary
    pub(crate) fn from_primary_first(mut versions: Vec<Version>) -> KeyResult<Self> {
        let mut seen = HashSet::with_capacity(versions.len());
        for v in &versions {
            if !seen.insert(v.creation_timestamp) {
                return Err(KeyError::InvalidKey(format!(
                    "duplicate version creation timestamp {}",
                    v.creation_timestamp
                )));
            }
        }
        if versions.len() > 1 {
            versions[1..].sort_by_key(|v| Reverse(v.creation_timestamp));
        }
        Ok(Self { versions })
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// The primary version, if the key is provisioned
    pub fn primary(&self) -> Option<&Version> {
        self.versions.first()
    }

    /// All versions, primary first
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// Versions other than the primary, youngest first
    pub fn non_primary(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter().skip(1)
    }

    /// Human-readable list of changes going from `self` to `other`.
    ///
    /// Only meant for audit logging.
    pub fn diff(&self, other: &Key) -> Vec<String> {
        let mut changes = Vec::new();

        let old_primary = self.primary().map(Version::creation_timestamp);
        let new_primary = other.primary().map(Version::creation_timestamp);
        if old_primary != new_primary {
            changes.push(format!(
                "primary version changed: {} -> {}",
                describe(old_primary),
                describe(new_primary)
            ));
        }

        let old: BTreeMap<i64, &Material> = self
            .versions
            .iter()
            .map(|v| (v.creation_timestamp, &v.key_material))
            .collect();
        let new: BTreeMap<i64, &Material> = other
            .versions
            .iter()
            .map(|v| (v.creation_timestamp, &v.key_material))
            .collect();

        for (ts, material) in &old {
            match new.get(ts) {
                None => changes.push(format!("removed version {}", ts)),
                Some(m) if m != material => {
                    changes.push(format!("key material changed for version {}", ts))
                }
                Some(_) => {}
            }
        }
        for ts in new.keys().filter(|ts| !old.contains_key(ts)) {
            changes.push(format!("added version {}", ts));
        }

        changes
    }
}

fn describe(ts: Option<i64>) -> String {
    ts.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string())
}

/// Persisted form of a single version
#[derive(Serialize, Deserialize)]
struct JsonVersion {
    key: Material,
    #[serde(with = "timestamp_string")]
    creation_time: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    primary: bool,
}

/// Timestamps are persisted as decimal strings
mod timestamp_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

impl Key {
    pub fn to_json(&self) -> KeyResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> KeyResult<Self> {
        let versions: Vec<JsonVersion> = serde_json::from_str(json)?;
        Self::from_json_versions(versions)
    }

    fn from_json_versions(versions: Vec<JsonVersion>) -> KeyResult<Self> {
        if versions.is_empty() {
            return Ok(Self::empty());
        }
        let primaries = versions.iter().filter(|v| v.primary).count();
        if primaries != 1 {
            return Err(KeyError::InvalidKey(format!(
                "expected exactly one primary version, found {}",
                primaries
            )));
        }

        let mut primary = None;
        let mut others = Vec::with_capacity(versions.len() - 1);
        for v in versions {
            let version = Version::new(v.key, v.creation_time);
            if v.primary {
                primary = Some(version);
            } else {
                others.push(version);
            }
        }
        let primary = primary.ok_or_else(|| KeyError::InvalidKey("missing primary".to_string()))?;
        Self::new(primary, others)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let versions: Vec<JsonVersion> = self
            .versions
            .iter()
            .enumerate()
            .map(|(i, v)| JsonVersion {
                key: v.key_material.clone(),
                creation_time: v.creation_timestamp,
                primary: i == 0,
            })
            .collect();
        versions.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let versions = Vec::<JsonVersion>::deserialize(deserializer)?;
        Key::from_json_versions(versions).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialKind;

    fn version(ts: i64) -> Version {
        Version::new(MaterialKind::P256.generate().unwrap(), ts)
    }

    #[test]
    fn test_new_orders_non_primary_descending() {
        let key = Key::new(version(20), vec![version(10), version(40), version(30)]).unwrap();
        let order: Vec<i64> = key.versions().iter().map(Version::creation_timestamp).collect();
        assert_eq!(order, vec![20, 40, 30, 10]);
        assert_eq!(key.primary().unwrap().creation_timestamp(), 20);
    }

    #[test]
    fn test_new_rejects_duplicate_timestamps() {
        let result = Key::new(version(10), vec![version(20), version(10)]);
        assert!(matches!(result, Err(KeyError::InvalidKey(_))));
    }

    #[test]
    fn test_empty_key() {
        let key = Key::empty();
        assert!(key.is_empty());
        assert!(key.primary().is_none());
        assert_eq!(key.to_json().unwrap(), "[]");
        assert_eq!(Key::from_json("[]").unwrap(), key);
    }

    #[test]
    fn test_json_round_trip() {
        let key = Key::new(version(100), vec![version(50), version(200)]).unwrap();
        let json = key.to_json().unwrap();
        assert_eq!(Key::from_json(&json).unwrap(), key);
    }

    #[test]
    fn test_json_layout() {
        let primary = version(100);
        let other = version(50);
        let key = Key::new(primary.clone(), vec![other.clone()]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&key.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                {
                    "key": primary.key_material().to_text(),
                    "creation_time": "100",
                    "primary": true,
                },
                {
                    "key": other.key_material().to_text(),
                    "creation_time": "50",
                },
            ])
        );
    }

    #[test]
    fn test_json_primary_need_not_be_first() {
        let a = version(100);
        let b = version(50);
        let json = serde_json::json!([
            { "key": b.key_material().to_text(), "creation_time": "50" },
            { "key": a.key_material().to_text(), "creation_time": "100", "primary": true },
        ])
        .to_string();
        let key = Key::from_json(&json).unwrap();
        assert_eq!(key.primary().unwrap(), &a);
    }

    #[test]
    fn test_json_rejects_no_primary() {
        let v = version(100);
        let json = serde_json::json!([
            { "key": v.key_material().to_text(), "creation_time": "100" },
        ])
        .to_string();
        assert!(matches!(Key::from_json(&json), Err(KeyError::InvalidKey(_))));
    }

    #[test]
    fn test_json_rejects_multiple_primaries() {
        let a = version(100);
        let b = version(50);
        let json = serde_json::json!([
            { "key": a.key_material().to_text(), "creation_time": "100", "primary": true },
            { "key": b.key_material().to_text(), "creation_time": "50", "primary": true },
        ])
        .to_string();
        assert!(matches!(Key::from_json(&json), Err(KeyError::InvalidKey(_))));
    }

    #[test]
    fn test_json_rejects_bad_material() {
        let json = r#"[{"key": "AQ", "creation_time": "100", "primary": true}]"#;
        assert!(Key::from_json(json).is_err());
    }

    #[test]
    fn test_diff_reports_changes() {
        let a = version(10);
        let b = version(20);
        let c = version(30);
        let old = Key::new(a.clone(), vec![b.clone()]).unwrap();
        let new = Key::new(b.clone(), vec![c.clone()]).unwrap();

        let changes = old.diff(&new);
        assert_eq!(
            changes,
            vec![
                "primary version changed: 10 -> 20".to_string(),
                "removed version 10".to_string(),
                "added version 30".to_string(),
            ]
        );
        assert!(new.diff(&new).is_empty());
    }

    #[test]
    fn test_diff_reports_material_change() {
        let old = Key::new(version(10), vec![]).unwrap();
        let new = Key::new(version(10), vec![]).unwrap();
        assert_eq!(old.diff(&new), vec!["key material changed for version 10".to_string()]);
    }

    #[test]
    fn test_diff_from_empty() {
        let new = Key::new(version(10), vec![]).unwrap();
        assert_eq!(
            Key::empty().diff(&new),
            vec![
                "primary version changed: none -> 10".to_string(),
                "added version 10".to_string(),
            ]
        );
    }
}
