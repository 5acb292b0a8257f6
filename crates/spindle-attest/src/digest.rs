//! SHA-256 digest newtype with in-toto-compatible JSON encoding.
//!
//! A digest serialises as a digest set, `{"sha256": "<hex>"}`, so it can
//! be embedded directly into statement subjects.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::error::AttestError;

const ALGO_SHA256: &str = "sha256";

/// A lowercase hex SHA-256 digest. The empty digest is permitted and
/// serialises to an empty digest set.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Finalise a hasher into a digest.
    pub fn from_hasher(hasher: Sha256) -> Self {
        Self(hex::encode(hasher.finalize()))
    }

    /// Digest of a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Parse a digest set object, failing when the `sha256` key is absent.
    pub fn from_digest_set(value: &serde_json::Value) -> Result<Self, AttestError> {
        value
            .get(ALGO_SHA256)
            .and_then(|v| v.as_str())
            .map(Self::new)
            .ok_or_else(|| AttestError::MalformedDigest(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Sha256Digest {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Serialize for Sha256Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut set = BTreeMap::new();
        if !self.0.is_empty() {
            set.insert(ALGO_SHA256, self.0.as_str());
        }
        set.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let set = BTreeMap::<String, String>::deserialize(deserializer)?;
        match set.get(ALGO_SHA256) {
            Some(hex) => Ok(Self(hex.clone())),
            None => Err(D::Error::custom("sha256 digest is missing")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_empty_input() {
        assert_eq!(
            Sha256Digest::of_bytes(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn serialises_as_digest_set() {
        let digest = Sha256Digest::of_bytes(b"hello");
        let json = serde_json::to_string(&digest).expect("serialize");
        assert_eq!(
            json,
            r#"{"sha256":"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"}"#
        );
    }

    #[test]
    fn empty_digest_serialises_to_empty_set() {
        let json = serde_json::to_string(&Sha256Digest::default()).expect("serialize");
        assert_eq!(json, "{}");
    }

    #[test]
    fn round_trips_through_json() {
        let digest = Sha256Digest::of_bytes(b"spindle");
        let json = serde_json::to_string(&digest).expect("serialize");
        let back: Sha256Digest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, digest);
    }

    #[test]
    fn missing_sha256_key_is_rejected() {
        let result = serde_json::from_str::<Sha256Digest>(r#"{"sha512":"00"}"#);
        assert!(result.is_err(), "digest set without sha256 should fail");
    }

    #[test]
    fn malformed_digest_set_value() {
        let value = serde_json::json!({"md5": "abc"});
        let result = Sha256Digest::from_digest_set(&value);
        assert!(matches!(result, Err(AttestError::MalformedDigest(_))));
    }
}
