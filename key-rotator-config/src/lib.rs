//! Configuration management for the key rotator
//!
//! Configuration is layered: an optional file (TOML, YAML or JSON), then
//! `KEY_ROTATOR_*` environment variables, with nested sections separated by
//! `__` (for example `KEY_ROTATOR_BATCH_SIGNING__DELETE_MIN_KEY_COUNT=3`).
//! A `.env` file in the working directory is loaded first if present.
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


use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const ENV_PREFIX: &str = "KEY_ROTATOR";
const DAY_SECS: u64 = 24 * 60 * 60;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Rotation policy for one kind of key
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KeyPolicyConfig {
    /// When false, existing keys are carried forward unchanged
    #[serde(default = "default_true")]
    pub enable_rotation: bool,
    /// Write keys and manifests even when unchanged
    #[serde(default)]
    pub always_write: bool,
    #[serde(default = "default_create_min_age_secs")]
    pub create_min_age_secs: u64,
    #[serde(default = "default_primary_min_age_secs")]
    pub primary_min_age_secs: u64,
    #[serde(default = "default_delete_min_age_secs")]
    pub delete_min_age_secs: u64,
    #[serde(default = "default_delete_min_key_count")]
    pub delete_min_key_count: usize,
}

impl Default for KeyPolicyConfig {
    fn default() -> Self {
        Self {
            enable_rotation: true,
            always_write: false,
            create_min_age_secs: default_create_min_age_secs(),
            primary_min_age_secs: default_primary_min_age_secs(),
            delete_min_age_secs: default_delete_min_age_secs(),
            delete_min_key_count: default_delete_min_key_count(),
        }
    }
}

impl KeyPolicyConfig {
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.primary_min_age_secs > self.create_min_age_secs {
            return Err(ConfigError::Invalid(format!(
                "{}: primary_min_age_secs ({}) must not exceed create_min_age_secs ({})",
                section, self.primary_min_age_secs, self.create_min_age_secs
            )));
        }
        if self.create_min_age_secs > self.delete_min_age_secs {
            return Err(ConfigError::Invalid(format!(
                "{}: create_min_age_secs ({}) must not exceed delete_min_age_secs ({})",
                section, self.create_min_age_secs, self.delete_min_age_secs
            )));
        }
        if self.delete_min_age_secs > i64::MAX as u64 {
            return Err(ConfigError::Invalid(format!(
                "{}: delete_min_age_secs is out of range",
                section
            )));
        }
        Ok(())
    }
}

/// Encrypted local secret directory
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KeyStoreConfig {
    pub path: String,
    /// Environment variable holding the master key (hex or passphrase)
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
}

/// Manifest directory
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ManifestStoreConfig {
    pub path: String,
}

/// Key rotator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RotatorConfig {
    /// Deployment environment, used as the key identifier prefix
    pub environment: String,
    pub localities: Vec<String>,
    #[serde(default)]
    pub ingestors: Vec<String>,
    /// Packet encryption CSRs use the common name `{locality}.{csr_fqdn}`
    pub csr_fqdn: String,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    #[serde(default)]
    pub batch_signing: KeyPolicyConfig,
    #[serde(default)]
    pub packet_encryption: KeyPolicyConfig,
    pub key_store: KeyStoreConfig,
    #[serde(default)]
    pub backup_key_store: Option<KeyStoreConfig>,
    pub manifest_store: ManifestStoreConfig,
}

impl RotatorConfig {
    /// Load configuration from an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();
        Self::from_sources(path, config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration from an optional file and the given environment source
    pub fn from_sources(
        path: Option<&Path>,
        environment: config::Environment,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let environment = environment
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("localities")
            .with_list_parse_key("ingestors")
            .try_parsing(true);

        let config: RotatorConfig = builder.add_source(environment).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.is_empty() {
            return Err(ConfigError::Invalid("environment must be set".to_string()));
        }
        if self.localities.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one locality must be configured".to_string(),
            ));
        }
        if self.csr_fqdn.is_empty() {
            return Err(ConfigError::Invalid("csr_fqdn must be set".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeout_secs must be positive".to_string(),
            ));
        }
        self.batch_signing.validate("batch_signing")?;
        self.packet_encryption.validate("packet_encryption")?;
        Ok(())
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Get log format, defaulting to "console"
    pub fn log_format(&self) -> &str {
        self.log_format.as_deref().unwrap_or("console")
    }

    /// Common name for a locality's packet encryption CSRs
    pub fn csr_common_name(&self, locality: &str) -> String {
        format!("{}.{}", locality, self.csr_fqdn)
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_create_min_age_secs() -> u64 {
    90 * DAY_SECS
}

fn default_primary_min_age_secs() -> u64 {
    7 * DAY_SECS
}

fn default_delete_min_age_secs() -> u64 {
    180 * DAY_SECS
}

fn default_delete_min_key_count() -> usize {
    2
}

fn default_master_key_env() -> String {
    "KEY_ROTATOR_MASTER_KEY".to_string()
}
