//! Versioned key management for the key rotator
//!
//! Provides key material, versioned keys and the rotation policy that
//! decides when versions are created, promoted to primary, and retired.
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
pub mod key;
pub mod material;
pub mod rotation;

pub use error::{KeyError, KeyResult};
pub use key::{Key, Version};
pub use material::{Material, MaterialKind, P256Material};
pub use rotation::{KeyGenerator, RotationConfig};
