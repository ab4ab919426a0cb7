//! Errors raised while rotating a locality
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
use key_rotator_keys::KeyError;
use key_rotator_storage::StoreError;
use thiserror::Error;

fn scope(locality: &str, ingestor: &Option<String>) -> String {
    match ingestor {
        Some(ingestor) => format!("{}/{}", locality, ingestor),
        None => locality.to_string(),
    }
}

/// Key rotation errors
#[derive(Error, Debug)]
pub enum RotatorError {
    #[error("Invalid {kind} rotation policy: {source}")]
    ConfigValidation {
        kind: KeyKind,
        #[source]
        source: KeyError,
    },

    #[error("Failed to rotate {kind} key for {}: {source}", scope(.locality, .ingestor))]
    Rotation {
        locality: String,
        ingestor: Option<String>,
        kind: KeyKind,
        #[source]
        source: KeyError,
    },

    #[error("Failed to read {what} for {}: {source}", scope(.locality, .ingestor))]
    Read {
        locality: String,
        ingestor: Option<String>,
        what: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to write {what} for {}: {source}", scope(.locality, .ingestor))]
    Write {
        locality: String,
        ingestor: Option<String>,
        what: String,
        #[source]
        source: StoreError,
    },

    #[error("Manifest {name} does not exist")]
    MissingManifest { name: String },

    #[error("Rotation cancelled")]
    Cancelled,

    #[error("Rotation task failed: {0}")]
    Task(String),
}

impl RotatorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RotatorError::Cancelled)
    }
}

/// Result type for rotation runs
pub type RotatorResult<T> = Result<T, RotatorError>;
