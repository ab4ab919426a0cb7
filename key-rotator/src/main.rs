//! Key Rotator
//!
//! Rotates the batch signing and packet encryption keys of every configured
//! locality and republishes the manifests advertising them. Runs once and
//! exits non-zero if any locality failed.
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


use anyhow::{Context, Result};
use clap::Parser;
use key_rotator::{
    key_rotation_settings, locality_targets, KeyKind, RotationMetrics, Rotator,
};
use key_rotator_config::{KeyStoreConfig, RotatorConfig};
use key_rotator_logging::LogFormat;
use key_rotator_storage::{
    BackupKeyStore, DryRunKeyStore, DryRunManifestStore, FileManifestStore, KeyStore,
    LocalKeyStore, ManifestStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Key rotator command line arguments
#[derive(Parser, Debug)]
#[command(name = "key-rotator")]
#[command(about = "Rotates batch signing and packet encryption keys")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured dry-run setting
    #[arg(long)]
    dry_run: Option<bool>,

    /// Log format (json, console)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

async fn open_key_store(config: &KeyStoreConfig) -> Result<LocalKeyStore> {
    LocalKeyStore::from_env(&config.path, &config.master_key_env)
        .await
        .with_context(|| format!("Failed to open key store at {}", config.path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        RotatorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dry_run) = args.dry_run {
        config.dry_run = dry_run;
    }

    let log_format = match args.log_format {
        Some(format) => format,
        None => config
            .log_format()
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?,
    };
    key_rotator_logging::init("key-rotator", log_format, config.log_level());

    info!(
        environment = %config.environment,
        localities = ?config.localities,
        ingestors = ?config.ingestors,
        dry_run = config.dry_run,
        "Configuration loaded"
    );

    let batch_signing = key_rotation_settings(KeyKind::BatchSigning, &config.batch_signing)?;
    let packet_encryption =
        key_rotation_settings(KeyKind::PacketEncryption, &config.packet_encryption)?;

    // Storage
    let primary = open_key_store(&config.key_store).await?;
    let key_store: Arc<dyn KeyStore> = match &config.backup_key_store {
        Some(backup) => {
            info!(path = %backup.path, "Backing up keys");
            Arc::new(BackupKeyStore::new(primary, open_key_store(backup).await?))
        }
        None => Arc::new(primary),
    };
    let manifest_store: Arc<dyn ManifestStore> = Arc::new(
        FileManifestStore::new(&config.manifest_store.path)
            .await
            .with_context(|| {
                format!("Failed to open manifest store at {}", config.manifest_store.path)
            })?,
    );
    let (key_store, manifest_store): (Arc<dyn KeyStore>, Arc<dyn ManifestStore>) =
        if config.dry_run {
            warn!("DRY RUN: no keys or manifests will be written");
            (
                Arc::new(DryRunKeyStore::new(key_store)),
                Arc::new(DryRunManifestStore::new(manifest_store)),
            )
        } else {
            (key_store, manifest_store)
        };

    // Deadline
    let cancellation_token = CancellationToken::new();
    let timeout = Duration::from_secs(config.timeout_secs);
    let deadline = tokio::spawn({
        let token = cancellation_token.clone();
        async move {
            tokio::time::sleep(timeout).await;
            warn!(timeout_secs = timeout.as_secs(), "Deadline exceeded, cancelling rotation");
            token.cancel();
        }
    });

    let metrics = Arc::new(RotationMetrics::new());
    let rotator = Arc::new(
        Rotator::new(
            key_store,
            manifest_store,
            config.environment.clone(),
            batch_signing,
            packet_encryption,
        )
        .with_metrics(metrics.clone())
        .with_cancellation(cancellation_token),
    );

    let now = chrono::Utc::now().timestamp();
    let results = rotator
        .rotate_localities(now, locality_targets(&config))
        .await;
    deadline.abort();

    let snapshot = metrics.snapshot();
    info!(
        batch_signing_keys_written = snapshot.batch_signing_keys_written,
        packet_encryption_keys_written = snapshot.packet_encryption_keys_written,
        manifests_written = snapshot.manifests_written,
        successful_runs = snapshot.successful_runs,
        failed_runs = snapshot.failed_runs,
        "Rotation finished"
    );

    let failed: Vec<String> = results
        .into_iter()
        .filter_map(|(locality, result)| match result {
            Ok(_) => None,
            Err(e) => {
                error!(locality = %locality, error = %e, "Locality failed");
                Some(locality)
            }
        })
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("Rotation failed for localities: {}", failed.join(", "));
    }

    Ok(())
}
