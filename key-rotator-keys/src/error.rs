//! Error types for key material, versioned keys and rotation
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


use thiserror::Error;

/// Key management errors
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid rotation config: {0}")]
    InvalidConfig(String),

    #[error("Key version created at {timestamp} is in the future (now = {now})")]
    FutureVersion { timestamp: i64, now: i64 },

    #[error("Key generation failed: {0}")]
    Generation(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Empty key material input")]
    EmptyInput,

    #[error("Unknown key material kind: {0}")]
    UnknownKind(u8),

    #[error("Malformed key material: {0}")]
    MalformedKey(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Result type for key operations
pub type KeyResult<T> = Result<T, KeyError>;
