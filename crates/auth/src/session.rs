use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use lecture_core::PrincipalId;

use crate::{AuthFailure, DeviceFingerprint};

/// Number of random bytes behind a token id (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Opaque, unguessable session identifier.
///
/// Carries no claims; all authority lives in the token store.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    /// Mint a fresh identifier from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap a value received from the transport.
    pub fn from_transport(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.len() > 256 {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to write to logs.
    pub fn redacted(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

// Never print the full credential.
impl core::fmt::Debug for TokenId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "TokenId({}…)", self.redacted())
    }
}

/// Server-side session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token_id: TokenId,
    pub principal_id: PrincipalId,
    pub device_fingerprint: DeviceFingerprint,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl Session {
    pub fn new(
        principal_id: PrincipalId,
        device_fingerprint: DeviceFingerprint,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            token_id: TokenId::generate(),
            principal_id,
            device_fingerprint,
            issued_at,
            expires_at: issued_at + ttl,
            revoked: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Seconds of validity left (0 once expired).
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Deterministically check a stored session against the presenting device.
///
/// Order: revoked, expired, device. A revoked session reports `Revoked` even
/// once past expiry so a theft revocation stays visible.
pub fn check_session(
    session: &Session,
    presented: &DeviceFingerprint,
    now: DateTime<Utc>,
) -> Result<(), AuthFailure> {
    if session.revoked {
        return Err(AuthFailure::Revoked);
    }
    if session.is_expired(now) {
        return Err(AuthFailure::Expired);
    }
    if !session.device_fingerprint.matches(presented) {
        return Err(AuthFailure::DeviceMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: DateTime<Utc>) -> Session {
        Session::new(
            PrincipalId::new("u1"),
            DeviceFingerprint::from_raw("fp1"),
            now,
            Duration::seconds(3600),
        )
    }

    #[test]
    fn generated_tokens_are_unique_and_urlsafe() {
        let a = TokenId::generate();
        let b = TokenId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn debug_output_is_redacted() {
        let t = TokenId::generate();
        let dbg = format!("{t:?}");
        assert!(!dbg.contains(t.as_str()));
        assert!(dbg.contains(t.redacted()));
    }

    #[test]
    fn valid_until_ttl_elapses() {
        let now = Utc::now();
        let s = session(now);
        let fp = DeviceFingerprint::from_raw("fp1");
        assert!(check_session(&s, &fp, now).is_ok());
        assert!(check_session(&s, &fp, now + Duration::seconds(3599)).is_ok());
        assert_eq!(
            check_session(&s, &fp, now + Duration::seconds(3600)),
            Err(AuthFailure::Expired)
        );
    }

    #[test]
    fn device_mismatch_detected() {
        let now = Utc::now();
        let s = session(now);
        assert_eq!(
            check_session(&s, &DeviceFingerprint::from_raw("fp2"), now),
            Err(AuthFailure::DeviceMismatch)
        );
    }

    #[test]
    fn revoked_wins_over_expired() {
        let now = Utc::now();
        let mut s = session(now);
        s.revoked = true;
        let fp = DeviceFingerprint::from_raw("fp1");
        assert_eq!(
            check_session(&s, &fp, now + Duration::days(2)),
            Err(AuthFailure::Revoked)
        );
    }

    #[test]
    fn empty_transport_values_rejected() {
        assert!(TokenId::from_transport("").is_none());
        assert!(TokenId::from_transport("   ").is_none());
        assert!(TokenId::from_transport("abc").is_some());
    }
}
