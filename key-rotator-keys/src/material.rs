//! Cryptographic key material
//!
//! Key material is a closed set of kinds. Each kind owns a single-byte tag
//! that prefixes its binary serialization, so the tag space is part of the
//! stored format and must stay stable.
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
use base64::{engine::general_purpose, Engine as _};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use x509_cert::der::asn1::{BitString, ObjectIdentifier, SetOfVec, Utf8StringRef};
use x509_cert::der::{Decode, Encode, EncodePem};
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};
use x509_cert::request::{CertReq, CertReqInfo, Version};
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

/// id-at-commonName
const COMMON_NAME_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// ecdsa-with-SHA256
const ECDSA_WITH_SHA256_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

/// Length of a P-256 private scalar
const P256_SCALAR_LEN: usize = 32;

/// Key material kind classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialKind {
    /// ECDSA over NIST P-256
    P256,
}

/// Dispatch table for tag lookup. Tags are never reused.
const KINDS: &[MaterialKind] = &[MaterialKind::P256];

impl MaterialKind {
    /// Binary serialization tag for this kind
    pub const fn tag(self) -> u8 {
        match self {
            MaterialKind::P256 => 1,
        }
    }

    /// Look up a kind by its serialization tag
    pub fn from_tag(tag: u8) -> KeyResult<Self> {
        KINDS
            .iter()
            .copied()
            .find(|kind| kind.tag() == tag)
            .ok_or(KeyError::UnknownKind(tag))
    }

    pub fn name(self) -> &'static str {
        match self {
            MaterialKind::P256 => "p256",
        }
    }

    /// Generate fresh key material of this kind
    pub fn generate(self) -> KeyResult<Material> {
        match self {
            MaterialKind::P256 => Ok(Material::P256(P256Material::generate())),
        }
    }

    fn parse(self, bytes: &[u8]) -> KeyResult<Material> {
        match self {
            MaterialKind::P256 => Ok(Material::P256(P256Material::from_scalar_bytes(bytes)?)),
        }
    }
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Private key material of some kind
#[derive(Clone, PartialEq, Eq)]
pub enum Material {
    P256(P256Material),
}

impl Material {
    /// Generate fresh key material of the given kind
    pub fn generate(kind: MaterialKind) -> KeyResult<Self> {
        kind.generate()
    }

    pub fn kind(&self) -> MaterialKind {
        match self {
            Material::P256(_) => MaterialKind::P256,
        }
    }

    /// Serialize to `[tag][kind-specific private key bytes]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.kind().tag()];
        match self {
            Material::P256(m) => bytes.extend_from_slice(&m.scalar_bytes()),
        }
        bytes
    }

    /// Parse the binary form produced by [`Material::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> KeyResult<Self> {
        let (&tag, rest) = bytes.split_first().ok_or(KeyError::EmptyInput)?;
        MaterialKind::from_tag(tag)?.parse(rest)
    }

    /// Unpadded base64 of the binary form
    pub fn to_text(&self) -> String {
        general_purpose::STANDARD_NO_PAD.encode(self.to_bytes())
    }

    pub fn from_text(text: &str) -> KeyResult<Self> {
        let bytes = general_purpose::STANDARD_NO_PAD.decode(text)?;
        Self::from_bytes(&bytes)
    }

    /// PEM-encoded PKCS#10 request for the public key, signed by the private key
    pub fn public_as_csr(&self, common_name: &str) -> KeyResult<String> {
        match self {
            Material::P256(m) => m.csr_pem(common_name),
        }
    }

    /// PEM-encoded PKIX (SubjectPublicKeyInfo) public key
    pub fn public_as_pkix(&self) -> KeyResult<String> {
        match self {
            Material::P256(m) => m.pkix_pem(),
        }
    }

    /// Base64 of the form consumed by the aggregation protocol.
    ///
    /// For P-256 this is the uncompressed X9.62 public point (65 bytes)
    /// followed by the big-endian private scalar (32 bytes).
    pub fn as_raw_rotation_format(&self) -> KeyResult<String> {
        match self {
            Material::P256(m) => Ok(general_purpose::STANDARD.encode(m.raw_bytes())),
        }
    }

    /// Base64 of the PKCS#8 DER private key
    pub fn as_pkcs8(&self) -> KeyResult<String> {
        match self {
            Material::P256(m) => Ok(general_purpose::STANDARD.encode(m.pkcs8_der()?)),
        }
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Material::P256(m) => f.debug_tuple("P256").field(m).finish(),
        }
    }
}

impl Serialize for Material {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_text())
    }
}

impl<'de> Deserialize<'de> for Material {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Material::from_text(&text).map_err(serde::de::Error::custom)
    }
}

/// P-256 ECDSA key material
#[derive(Clone, PartialEq, Eq)]
pub struct P256Material {
    secret: SecretKey,
}

impl From<SecretKey> for P256Material {
    fn from(secret: SecretKey) -> Self {
        Self { secret }
    }
}

impl P256Material {
    pub fn generate() -> Self {
        SecretKey::random(&mut OsRng).into()
    }

    fn from_scalar_bytes(bytes: &[u8]) -> KeyResult<Self> {
        if bytes.len() != P256_SCALAR_LEN {
            return Err(KeyError::MalformedKey(format!(
                "P-256 scalar must be {} bytes, got {}",
                P256_SCALAR_LEN,
                bytes.len()
            )));
        }
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| KeyError::MalformedKey(format!("Invalid P-256 scalar: {}", e)))?;
        Ok(secret.into())
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    fn scalar_bytes(&self) -> Vec<u8> {
        self.secret.to_bytes().to_vec()
    }

    fn raw_bytes(&self) -> Vec<u8> {
        let point = self.public_key().to_encoded_point(false);
        let mut bytes = point.as_bytes().to_vec();
        bytes.extend_from_slice(&self.secret.to_bytes());
        bytes
    }

    fn pkcs8_der(&self) -> KeyResult<Vec<u8>> {
        let der = self
            .secret
            .to_pkcs8_der()
            .map_err(|e| KeyError::Encoding(format!("PKCS#8 encoding failed: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }

    fn pkix_pem(&self) -> KeyResult<String> {
        self.public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encoding(format!("PKIX encoding failed: {}", e)))
    }

    fn csr_pem(&self, common_name: &str) -> KeyResult<String> {
        let spki_der = self
            .public_key()
            .to_public_key_der()
            .map_err(|e| KeyError::Encoding(format!("SPKI encoding failed: {}", e)))?;
        let public_key = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())
            .map_err(|e| KeyError::Encoding(format!("SPKI parsing failed: {}", e)))?;

        let info = CertReqInfo {
            version: Version::V1,
            subject: subject_name(common_name)?,
            public_key,
            attributes: Default::default(),
        };
        let info_der = info
            .to_der()
            .map_err(|e| KeyError::Encoding(format!("Failed to encode CertReqInfo: {}", e)))?;

        let signing_key = SigningKey::from(&self.secret);
        let signature: Signature = signing_key
            .try_sign(&info_der)
            .map_err(|e| KeyError::Encoding(format!("Failed to sign CSR: {}", e)))?;
        let signature = BitString::from_bytes(signature.to_der().as_bytes())
            .map_err(|e| KeyError::Encoding(format!("Failed to encode signature: {}", e)))?;

        let request = CertReq {
            info,
            algorithm: AlgorithmIdentifierOwned {
                oid: ECDSA_WITH_SHA256_OID,
                parameters: None,
            },
            signature,
        };
        request
            .to_pem(x509_cert::der::pem::LineEnding::LF)
            .map_err(|e| KeyError::Encoding(format!("Failed to encode CSR PEM: {}", e)))
    }
}

impl fmt::Debug for P256Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("P256Material").finish_non_exhaustive()
    }
}

/// Distinguished name holding a single common name attribute
fn subject_name(common_name: &str) -> KeyResult<RdnSequence> {
    if common_name.is_empty() {
        return Err(KeyError::Encoding("CSR common name is required".to_string()));
    }
    let value = Utf8StringRef::new(common_name)
        .map_err(|e| KeyError::Encoding(format!("Invalid CN value: {}", e)))?;
    let attribute = AttributeTypeAndValue {
        oid: COMMON_NAME_OID,
        value: x509_cert::der::Any::from(value),
    };
    let set = SetOfVec::try_from(vec![attribute])
        .map_err(|e| KeyError::Encoding(format!("Failed to add CN: {}", e)))?;
    Ok(RdnSequence(vec![RelativeDistinguishedName(set)]))
}
