//! Weak content fingerprints for optimistic concurrency.
//!
//! An etag is `W/<length>-<crc32>` over the canonical encoding of a policy's
//! bindings. It only has to change when the content (or its order) changes;
//! collisions are tolerated.

use crate::{error::PolicyError, models::Binding, models::Policy};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Opaque optimistic-concurrency token
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ETag(Vec<u8>);

impl ETag {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ETag {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

// Bytes travel as base64, matching the protobuf JSON mapping.
impl Serialize for ETag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ETag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize)]
struct CanonicalPolicy<'a> {
    bindings: &'a [Binding],
}

/// Compute the etag of a policy's role/member content.
///
/// The policy's own `etag` field never contributes.
pub fn compute_etag(policy: &Policy) -> Result<ETag, PolicyError> {
    let data = serde_json::to_vec(&CanonicalPolicy {
        bindings: &policy.bindings,
    })?;
    let fingerprint = format!("W/{}-{:08X}", data.len(), crc32fast::hash(&data));
    Ok(ETag(fingerprint.into_bytes()))
}
