//! Key rotation policy
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
use crate::key::{Key, Version};
use crate::material::{Material, MaterialKind};
use chrono::Duration;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Source of new key material for rotation
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> KeyResult<Material>;
}

impl KeyGenerator for MaterialKind {
    fn generate(&self) -> KeyResult<Material> {
        MaterialKind::generate(*self)
    }
}

impl<F> KeyGenerator for F
where
    F: Fn() -> KeyResult<Material> + Send + Sync,
{
    fn generate(&self) -> KeyResult<Material> {
        self()
    }
}

/// Rotation policy parameters
#[derive(Clone)]
pub struct RotationConfig {
    /// Generates material for new versions
    pub generator: Arc<dyn KeyGenerator>,
    /// Maximum age of the youngest version before a new version is created
    pub create_min_age: Duration,
    /// Minimum age before a version is normally eligible to be primary
    pub primary_min_age: Duration,
    /// Minimum age before a version may be deleted
    pub delete_min_age: Duration,
    /// Versions are never deleted below this count
    pub delete_min_key_count: usize,
}

impl RotationConfig {
    pub fn new(
        generator: Arc<dyn KeyGenerator>,
        create_min_age: Duration,
        primary_min_age: Duration,
        delete_min_age: Duration,
        delete_min_key_count: usize,
    ) -> Self {
        Self {
            generator,
            create_min_age,
            primary_min_age,
            delete_min_age,
            delete_min_key_count,
        }
    }

    /// Check that `0 <= primary_min_age <= create_min_age <= delete_min_age`
    pub fn validate(&self) -> KeyResult<()> {
        if self.primary_min_age < Duration::zero() {
            return Err(KeyError::InvalidConfig(format!(
                "primary_min_age must be non-negative (got {})",
                self.primary_min_age
            )));
        }
        if self.primary_min_age > self.create_min_age {
            return Err(KeyError::InvalidConfig(format!(
                "primary_min_age ({}) must not exceed create_min_age ({})",
                self.primary_min_age, self.create_min_age
            )));
        }
        if self.create_min_age > self.delete_min_age {
            return Err(KeyError::InvalidConfig(format!(
                "create_min_age ({}) must not exceed delete_min_age ({})",
                self.create_min_age, self.delete_min_age
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for RotationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationConfig")
            .field("create_min_age", &self.create_min_age)
            .field("primary_min_age", &self.primary_min_age)
            .field("delete_min_age", &self.delete_min_age)
            .field("delete_min_key_count", &self.delete_min_key_count)
            .finish_non_exhaustive()
    }
}

/// Age of `version` at `now`, failing if it does not fit in a `Duration`
fn age_at(now: i64, version: &Version) -> KeyResult<Duration> {
    now.checked_sub(version.creation_timestamp())
        .and_then(Duration::try_seconds)
        .ok_or_else(|| {
            KeyError::InvalidKey(format!(
                "creation timestamp {} is out of range",
                version.creation_timestamp()
            ))
        })
}

impl Key {
    /// Apply the rotation policy at time `now` (seconds since the Unix epoch).
    ///
    /// Creates a version when the key is empty or its youngest version is
    /// older than `create_min_age`, then drops the oldest versions past
    /// `delete_min_age` while more than `delete_min_key_count` remain, then
    /// promotes the youngest version at least `primary_min_age` old (or the
    /// oldest version if none is). The result is never empty, and rotating it
    /// again at the same `now` returns it unchanged.
    pub fn rotate(&self, now: i64, cfg: &RotationConfig) -> KeyResult<Key> {
        cfg.validate()?;

        if let Some(v) = self.versions().iter().find(|v| v.creation_timestamp() > now) {
            return Err(KeyError::FutureVersion {
                timestamp: v.creation_timestamp(),
                now,
            });
        }
        let mut versions = self
            .versions()
            .iter()
            .map(|v| Ok((age_at(now, v)?, v.clone())))
            .collect::<KeyResult<Vec<(Duration, Version)>>>()?;
        versions.sort_by_key(|(_, v)| v.creation_timestamp());

        // Create.
        let needs_version = versions
            .last()
            .map_or(true, |(age, _)| *age > cfg.create_min_age);
        if needs_version {
            let material = cfg.generator.generate()?;
            debug!(creation_timestamp = now, "Creating new key version");
            versions.push((Duration::zero(), Version::new(material, now)));
        }

        // Delete.
        let mut first_kept = 0;
        while versions.len() - first_kept > cfg.delete_min_key_count
            && versions[first_kept].0 > cfg.delete_min_age
        {
            debug!(
                creation_timestamp = versions[first_kept].1.creation_timestamp(),
                "Deleting key version"
            );
            first_kept += 1;
        }
        versions.drain(..first_kept);

        // Select primary: ages decrease with index, so partition on the
        // first version younger than primary_min_age.
        if versions.is_empty() {
            return Err(KeyError::InvalidKey(
                "rotation produced an empty key".to_string(),
            ));
        }
        let young = versions.partition_point(|(age, _)| *age >= cfg.primary_min_age);
        versions.swap(0, young.saturating_sub(1));

        Key::from_primary_first(versions.into_iter().map(|(_, v)| v).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE_MIN_AGE: i64 = 10_000;
    const PRIMARY_MIN_AGE: i64 = 1_000;
    const DELETE_MIN_AGE: i64 = 20_000;
    const DELETE_MIN_KEY_COUNT: usize = 2;

    fn config() -> RotationConfig {
        RotationConfig::new(
            Arc::new(MaterialKind::P256),
            Duration::seconds(CREATE_MIN_AGE),
            Duration::seconds(PRIMARY_MIN_AGE),
            Duration::seconds(DELETE_MIN_AGE),
            DELETE_MIN_KEY_COUNT,
        )
    }

    fn version(ts: i64) -> Version {
        Version::new(MaterialKind::P256.generate().unwrap(), ts)
    }

    /// Build a key from timestamps; the first is primary
    fn key(timestamps: &[i64]) -> Key {
        match timestamps.split_first() {
            None => Key::empty(),
            Some((primary, others)) => {
                Key::new(version(*primary), others.iter().map(|ts| version(*ts))).unwrap()
            }
        }
    }

    fn timestamps(key: &Key) -> Vec<i64> {
        key.versions().iter().map(Version::creation_timestamp).collect()
    }

    #[test]
    fn test_validate_accepts_ordered_ages() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_primary_after_create() {
        let mut cfg = config();
        cfg.primary_min_age = Duration::seconds(CREATE_MIN_AGE + 1);
        assert!(matches!(cfg.validate(), Err(KeyError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_create_after_delete() {
        let mut cfg = config();
        cfg.create_min_age = Duration::seconds(DELETE_MIN_AGE + 1);
        assert!(matches!(cfg.validate(), Err(KeyError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_negative_age() {
        let mut cfg = config();
        cfg.primary_min_age = Duration::seconds(-1);
        assert!(matches!(cfg.validate(), Err(KeyError::InvalidConfig(_))));
    }

    #[test]
    fn test_rotate_rejects_invalid_config() {
        let mut cfg = config();
        cfg.create_min_age = Duration::seconds(DELETE_MIN_AGE + 1);
        assert!(matches!(
            key(&[90_000]).rotate(100_000, &cfg),
            Err(KeyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rotate_empty_key_creates_primary() {
        let rotated = Key::empty().rotate(100_000, &config()).unwrap();
        assert_eq!(timestamps(&rotated), vec![100_000]);
    }

    #[test]
    fn test_rotate_young_key_is_unchanged() {
        let k = key(&[90_000]);
        let rotated = k.rotate(100_000, &config()).unwrap();
        assert_eq!(rotated, k);
    }

    #[test]
    fn test_rotate_old_key_creates_version_keeps_primary() {
        let k = key(&[89_999]);
        let rotated = k.rotate(100_000, &config()).unwrap();
        assert_eq!(timestamps(&rotated), vec![89_999, 100_000]);
        assert_eq!(rotated.primary(), k.primary());
    }

    #[test]
    fn test_rotate_promotes_matured_version() {
        let k = key(&[80_000, 95_000]);
        let rotated = k.rotate(100_000, &config()).unwrap();
        assert_eq!(timestamps(&rotated), vec![95_000, 80_000]);
    }

    #[test]
    fn test_rotate_keeps_oldest_primary_when_none_matured() {
        let k = key(&[99_900, 99_500]);
        let rotated = k.rotate(100_000, &config()).unwrap();
        assert_eq!(timestamps(&rotated), vec![99_500, 99_900]);
    }

    #[test]
    fn test_rotate_deletes_old_versions_above_floor() {
        let k = key(&[85_000, 70_000, 60_000, 50_000]);
        let rotated = k.rotate(100_000, &config()).unwrap();
        assert_eq!(timestamps(&rotated), vec![85_000, 100_000]);
    }

    #[test]
    fn test_rotate_never_deletes_below_floor() {
        let k = key(&[10_000, 5_000]);
        let rotated = k.rotate(100_000, &config()).unwrap();
        // 100_000 is created, then one of the two ancient versions is dropped.
        assert_eq!(timestamps(&rotated), vec![10_000, 100_000]);
    }

    #[test]
    fn test_rotate_rejects_future_version() {
        let k = key(&[90_000, 100_001]);
        assert!(matches!(
            k.rotate(100_000, &config()),
            Err(KeyError::FutureVersion {
                timestamp: 100_001,
                now: 100_000
            })
        ));
    }

    #[test]
    fn test_rotate_rejects_out_of_range_timestamps() {
        for ts in [-100_000_000_000_000_000, i64::MIN] {
            let json = format!(
                r#"[{{"key":"{}","creation_time":"{}","primary":true}}]"#,
                MaterialKind::P256.generate().unwrap().to_text(),
                ts
            );
            let k = Key::from_json(&json).unwrap();
            assert!(matches!(
                k.rotate(1_600_000_000, &config()),
                Err(KeyError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn test_rotate_propagates_generation_failure() {
        let mut cfg = config();
        cfg.generator = Arc::new(|| -> KeyResult<Material> {
            Err(KeyError::Generation("entropy unavailable".to_string()))
        });
        assert!(matches!(
            Key::empty().rotate(100_000, &cfg),
            Err(KeyError::Generation(_))
        ));
    }

    #[test]
    fn test_rotate_zero_ages() {
        let cfg = RotationConfig::new(
            Arc::new(MaterialKind::P256),
            Duration::zero(),
            Duration::zero(),
            Duration::zero(),
            0,
        );
        let rotated = key(&[50, 40]).rotate(100, &cfg).unwrap();
        assert_eq!(timestamps(&rotated), vec![100]);
        assert_eq!(rotated.rotate(100, &cfg).unwrap(), rotated);
    }

    /// Deterministic pseudo-random sequence for property checks
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (self.0 >> 33) % bound
        }
    }

    #[test]
    fn test_rotate_properties() {
        let mut rng = Lcg(7);
        let now = 1_000_000;
        for _ in 0..200 {
            let primary_min_age = rng.next(5_000) as i64;
            let create_min_age = primary_min_age + rng.next(20_000) as i64;
            let delete_min_age = create_min_age + rng.next(50_000) as i64;
            let cfg = RotationConfig::new(
                Arc::new(MaterialKind::P256),
                Duration::seconds(create_min_age),
                Duration::seconds(primary_min_age),
                Duration::seconds(delete_min_age),
                rng.next(4) as usize,
            );

            let count = rng.next(6) as usize;
            let mut ts: Vec<i64> = (0..count).map(|_| now - rng.next(100_000) as i64).collect();
            ts.sort_unstable();
            ts.dedup();
            let input = key(&ts);

            let rotated = input.rotate(now, &cfg).unwrap();
            assert!(!rotated.is_empty());
            assert!(rotated.len() >= cfg.delete_min_key_count.min(input.len()));
            let again = rotated.rotate(now, &cfg).unwrap();
            assert_eq!(again, rotated, "rotation is not idempotent for {:?}", ts);

            let json = rotated.to_json().unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
            let primaries = parsed
                .as_array()
                .unwrap()
                .iter()
                .filter(|v| v["primary"] == serde_json::Value::Bool(true))
                .count();
            assert_eq!(primaries, 1);
        }
    }
}
