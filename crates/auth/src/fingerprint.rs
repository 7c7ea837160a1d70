//! Device binding.
//!
//! A fingerprint is a stable SHA-256 over the client's network origin, user
//! agent and the long-lived `device_id` cookie. Comparison is exact.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const FINGERPRINT_DOMAIN: &[u8] = b"lecture.device-fingerprint.v1";

/// Client-supplied signals the fingerprint is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

impl RequestMetadata {
    pub fn new(
        client_ip: Option<String>,
        user_agent: Option<String>,
        device_id: Option<String>,
    ) -> Self {
        Self {
            client_ip,
            user_agent,
            device_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    /// Wrap an already computed (or stored) fingerprint value.
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact, constant-time equality.
    pub fn matches(&self, other: &DeviceFingerprint) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

/// Derive the fingerprint for a request.
///
/// Fields are length-prefixed with a presence marker so `("ab", "c")` and
/// `("a", "bc")` never collide and an absent header differs from an empty one.
pub fn fingerprint(meta: &RequestMetadata) -> DeviceFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    for field in [&meta.client_ip, &meta.user_agent, &meta.device_id] {
        match field {
            Some(value) => {
                hasher.update([1u8]);
                hasher.update((value.len() as u64).to_be_bytes());
                hasher.update(value.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }
    DeviceFingerprint(hex::encode(hasher.finalize()))
}

/// Resolve the originating client address.
///
/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub fn resolve_client_ip(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<IpAddr>,
) -> Option<String> {
    forwarded_for
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| real_ip.map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .or_else(|| peer.map(|ip| ip.to_string()))
}
