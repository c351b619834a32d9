//! Payload digests.
//!
//! A payload is first lowered to a `serde_json::Value` so map keys are
//! emitted in sorted order, then hashed with SHA-256. The same encoding
//! yields the size estimate recorded in buffer metadata.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of a canonically serialized value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checksum plus the byte length of the canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub checksum: Checksum,
    pub size_bytes: u64,
}

/// Compute the fingerprint of any serializable value.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<Fingerprint, serde_json::Error> {
    let canonical = serde_json::to_value(value)?;
    let encoded = serde_json::to_vec(&canonical)?;
    let digest = Sha256::digest(&encoded);

    Ok(Fingerprint {
        checksum: Checksum(hex::encode(digest.as_slice())),
        size_bytes: encoded.len() as u64,
    })
}

/// Compute only the checksum of a serializable value.
pub fn checksum<T: Serialize + ?Sized>(value: &T) -> Result<Checksum, serde_json::Error> {
    fingerprint(value).map(|print| print.checksum)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn identical_values_share_a_checksum() {
        let a = checksum(&json!({"x": 1, "y": [1, 2, 3]})).expect("checksum");
        let b = checksum(&json!({"x": 1, "y": [1, 2, 3]})).expect("checksum");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn any_change_alters_the_checksum() {
        let before = checksum(&json!({"x": 1})).expect("checksum");
        let after = checksum(&json!({"x": 2})).expect("checksum");
        assert_ne!(before, after);
    }

    #[test]
    fn hash_map_ordering_does_not_leak_into_digest() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for key in ["alpha", "beta", "gamma", "delta", "epsilon"] {
            first.insert(key.to_string(), key.len());
        }
        for key in ["epsilon", "delta", "gamma", "beta", "alpha"] {
            second.insert(key.to_string(), key.len());
        }

        assert_eq!(
            checksum(&first).expect("checksum"),
            checksum(&second).expect("checksum")
        );
    }

    #[test]
    fn size_tracks_encoded_length() {
        let print = fingerprint(&json!({"x": 1})).expect("fingerprint");
        assert_eq!(print.size_bytes, br#"{"x":1}"#.len() as u64);
    }
}
