//! Device fingerprinting.
//!
//! A fingerprint is the SHA-256 hex digest of the client signature (the
//! `User-Agent` string at the HTTP edge) joined with the network address.
//! It is deterministic and not reversible, but it is not a security boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

/// A derived device identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap an already-computed fingerprint (e.g. one read back from storage).
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive a fingerprint from connection metadata.
pub fn fingerprint(client_signature: &str, network_address: &str) -> DeviceId {
    let mut hasher = Sha256::new();
    hasher.update(client_signature.as_bytes());
    hasher.update(b"|");
    hasher.update(network_address.as_bytes());
    DeviceId(format!("{:x}", hasher.finalize()))
}
