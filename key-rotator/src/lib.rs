//! Key rotation for batch signing and packet encryption keys
//!
//! [`Rotator`] reads the current keys and manifests of a locality, rotates
//! each key according to its policy, and writes changed keys before the
//! manifests that advertise them.
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


pub mod error;
pub mod manifests;
pub mod metrics;
pub mod orchestrator;
pub mod settings;

pub use error::{RotatorError, RotatorResult};
pub use metrics::{
    LocalityStatus, MetricsSink, NoopMetrics, RotationMetrics, RotationMetricsSnapshot,
};
pub use orchestrator::{
    KeyKind, KeyRotationSettings, LocalityTarget, RotationOutcome, Rotator,
};
pub use settings::{key_rotation_settings, locality_targets};
