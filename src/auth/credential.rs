//! Shared access signature generation and expiry tracking.

use super::{AuthError, WallClock};
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::{debug, info};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A signed, time-bounded token used as the MQTT password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: Vec<u8>,
    issued_at: DateTime<Utc>,
    valid_for_secs: u64,
}

impl Credential {
    pub fn token_bytes(&self) -> &[u8] {
        &self.token
    }

    /// Token rendered as the connection password.
    pub fn password(&self) -> String {
        String::from_utf8_lossy(&self.token).into_owned()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn valid_for_secs(&self) -> u64 {
        self.valid_for_secs
    }

    /// Unix second at which the hub stops accepting the token (`se`).
    pub fn expires_at_unix(&self) -> i64 {
        let secs = i64::try_from(self.valid_for_secs).unwrap_or(i64::MAX);
        self.issued_at.timestamp().saturating_add(secs)
    }

    /// `now < issued_at + valid_for`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() < self.expires_at_unix()
    }
}

// Never print the signature.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("issued_at", &self.issued_at)
            .field("valid_for_secs", &self.valid_for_secs)
            .finish_non_exhaustive()
    }
}

/// Generates credentials for one device identity.
///
/// Holds the device key as configured and decodes it on every generation,
/// so malformed key material surfaces as [`AuthError::SignatureError`] at
/// connection time rather than at startup.
pub struct CredentialManager {
    resource_uri: String,
    device_key: String,
    current: Option<Credential>,
    generated: u64,
}

impl CredentialManager {
    pub fn new(host: &str, device_id: &str, device_key: impl Into<String>) -> Self {
        Self {
            resource_uri: format!("{}/devices/{}", host, device_id),
            device_key: device_key.into(),
            current: None,
            generated: 0,
        }
    }

    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    /// Most recently generated credential, if any.
    pub fn current(&self) -> Option<&Credential> {
        self.current.as_ref()
    }

    /// Number of credentials generated so far.
    pub fn generated(&self) -> u64 {
        self.generated
    }

    /// Generate a new credential valid for `requested_duration_secs`.
    ///
    /// Always regenerates; a previous credential is never handed out again.
    /// Fails with [`AuthError::ClockNotReady`] until the clock is trustworthy,
    /// and with [`AuthError::Expired`] when the token is already past its
    /// expiry at the time it is returned.
    pub fn ensure_fresh_credential(
        &mut self,
        clock: &impl WallClock,
        requested_duration_secs: u64,
    ) -> Result<Credential, AuthError> {
        if !clock.is_trustworthy() {
            return Err(AuthError::ClockNotReady);
        }
        let issued_at = clock.now();
        let secs = i64::try_from(requested_duration_secs)
            .map_err(|_| AuthError::SignatureError("token validity window too large".into()))?;
        let expiry = issued_at.timestamp().saturating_add(secs);

        let token = self.sign(expiry)?;
        let credential = Credential {
            token: token.into_bytes(),
            issued_at,
            valid_for_secs: requested_duration_secs,
        };
        if !credential.is_valid_at(clock.now()) {
            return Err(AuthError::Expired(credential.expires_at_unix()));
        }

        self.generated += 1;
        info!(
            "[Auth] Generated SAS token #{} valid for {}s (expires at {})",
            self.generated, requested_duration_secs, expiry
        );
        self.current = Some(credential.clone());
        Ok(credential)
    }

    fn sign(&self, expiry: i64) -> Result<String, AuthError> {
        let key = BASE64_STANDARD
            .decode(self.device_key.trim())
            .map_err(|e| AuthError::SignatureError(format!("device key is not valid base64: {}", e)))?;
        if key.is_empty() {
            return Err(AuthError::SignatureError("device key is empty".into()));
        }

        let encoded_uri = urlencoding::encode(&self.resource_uri);
        let string_to_sign = format!("{}\n{}", encoded_uri, expiry);
        debug!("[Auth] Signing resource {}", self.resource_uri);

        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| AuthError::SignatureError(e.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!(
            "SharedAccessSignature sr={}&sig={}&se={}",
            encoded_uri,
            urlencoding::encode(&signature),
            expiry
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SYNC_THRESHOLD_UNIX;
    use crate::testing::ManualClock;

    const KEY: &str = "c2VjcmV0LWRldmljZS1rZXk=";

    fn manager() -> CredentialManager {
        CredentialManager::new("hub.azure-devices.net", "room-1", KEY)
    }

    #[test]
    fn test_token_matches_known_signature() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let credential = manager().ensure_fresh_credential(&clock, 60).unwrap();

        assert_eq!(
            credential.password(),
            "SharedAccessSignature sr=hub.azure-devices.net%2Fdevices%2Froom-1\
             &sig=ZRj%2B%2F3cPIPgmiIuFc63Fl55QxAKwV%2BXia9IT%2FoGB3JA%3D&se=1700000060"
        );
        assert_eq!(credential.expires_at_unix(), 1_700_000_060);
        assert_eq!(credential.valid_for_secs(), 60);
    }

    #[test]
    fn test_validity_window_is_exclusive_at_expiry() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let credential = manager().ensure_fresh_credential(&clock, 60).unwrap();

        assert!(credential.is_valid_at(clock.now()));
        clock.advance_secs(59);
        assert!(credential.is_valid_at(clock.now()));
        clock.advance_secs(1);
        assert!(!credential.is_valid_at(clock.now()));
    }

    #[test]
    fn test_always_regenerates() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let mut manager = manager();

        let first = manager.ensure_fresh_credential(&clock, 60).unwrap();
        clock.advance_secs(5);
        let second = manager.ensure_fresh_credential(&clock, 60).unwrap();

        assert_ne!(first, second);
        assert_eq!(manager.generated(), 2);
        assert_eq!(manager.current(), Some(&second));
    }

    #[test]
    fn test_unsynchronized_clock_is_rejected() {
        let clock = ManualClock::at_unix(SYNC_THRESHOLD_UNIX - 10);
        let mut manager = manager();

        assert_eq!(
            manager.ensure_fresh_credential(&clock, 60),
            Err(AuthError::ClockNotReady)
        );
        assert_eq!(manager.generated(), 0);
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_malformed_key_is_signature_error() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let mut manager = CredentialManager::new("hub.azure-devices.net", "room-1", "%%%");
        assert!(matches!(
            manager.ensure_fresh_credential(&clock, 60),
            Err(AuthError::SignatureError(_))
        ));

        let mut manager = CredentialManager::new("hub.azure-devices.net", "room-1", "");
        assert!(matches!(
            manager.ensure_fresh_credential(&clock, 60),
            Err(AuthError::SignatureError(_))
        ));
    }

    #[test]
    fn test_zero_validity_window_is_expired() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let mut manager = manager();

        assert_eq!(
            manager.ensure_fresh_credential(&clock, 0),
            Err(AuthError::Expired(1_700_000_000))
        );
        assert_eq!(manager.generated(), 0);
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_debug_output_hides_token() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let credential = manager().ensure_fresh_credential(&clock, 60).unwrap();
        assert!(!format!("{:?}", credential).contains("SharedAccessSignature"));
    }
}
