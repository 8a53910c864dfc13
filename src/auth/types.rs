//! Credential types and token expiry helpers

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Validity buffer applied when checking expiry, in seconds
///
/// A bearer token within this window of its expiry is treated as already
/// invalid so requests don't race the server-side cutoff.
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// How far ahead of expiry the background refresh fires, in seconds
pub const REFRESH_LEAD_SECS: i64 = 300;

/// Kind of credential held by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Static API key, sent as `X-API-Key`; never expires
    ApiKey,
    /// Bearer token, sent as `Authorization: Bearer ...`; may expire
    Bearer,
}

/// A credential held by the client
///
/// Replaced wholesale on refresh; readers never observe a partially
/// updated value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// The API key or access token
    pub access_token: String,
    /// Refresh token, when the auth server issued one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Expiry instant, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Credential kind
    pub kind: CredentialKind,
}

impl Credential {
    /// Create a non-expiring API-key credential
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            access_token: key.into(),
            refresh_token: None,
            expires_at: None,
            kind: CredentialKind::ApiKey,
        }
    }

    /// Create a bearer credential, extracting expiry from the token's JWT
    /// `exp` claim when present
    pub fn bearer(token: impl Into<String>, refresh_token: Option<String>) -> Self {
        let access_token = token.into();
        let expires_at = decode_jwt_expiry(&access_token);
        Self { access_token, refresh_token, expires_at, kind: CredentialKind::Bearer }
    }

    /// Create a bearer credential with an explicit expiry
    pub fn bearer_with_expiry(
        token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token: token.into(),
            refresh_token,
            expires_at,
            kind: CredentialKind::Bearer,
        }
    }

    /// Whether the credential is currently usable
    ///
    /// API keys are always valid. Bearer tokens are valid while
    /// `now < expires_at - 60s`; a bearer token with unknown expiry is
    /// assumed valid.
    pub fn is_valid(&self) -> bool {
        match self.kind {
            CredentialKind::ApiKey => true,
            CredentialKind::Bearer => match self.expires_at {
                Some(expires_at) => Utc::now() + Duration::seconds(EXPIRY_BUFFER_SECS) < expires_at,
                None => true,
            },
        }
    }

    /// The value to place in the auth header for this credential
    pub fn auth_header_value(&self) -> String {
        match self.kind {
            CredentialKind::ApiKey => self.access_token.clone(),
            CredentialKind::Bearer => format!("Bearer {}", self.access_token),
        }
    }

    /// Seconds until expiry, when known (negative once expired)
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        self.expires_at.map(|e| (e - Utc::now()).num_seconds())
    }
}

/// Success body of the refresh endpoint
///
/// Servers report expiry either as `expires_in` seconds or as an
/// ISO-8601 `expires_at` timestamp; both are optional.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Best-effort extraction of the `exp` claim from an unverified JWT
///
/// Returns `None` for anything that isn't a decodable three-segment token
/// with a numeric `exp`; signature verification is the server's job.
pub(crate) fn decode_jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

/// Build an unsigned JWT carrying only an `exp` claim, for tests
#[cfg(test)]
pub(crate) fn jwt_with_exp(exp: i64) -> String {
    let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}"));
    format!("e30.{payload}.sig")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_always_valid() {
        let cred = Credential::api_key("bk_live_abc123");
        assert!(cred.is_valid());
        assert!(cred.expires_at.is_none());
        assert_eq!(cred.auth_header_value(), "bk_live_abc123");
    }

    #[test]
    fn test_bearer_header_value() {
        let cred = Credential::bearer("tok-1", None);
        assert_eq!(cred.auth_header_value(), "Bearer tok-1");
    }

    #[test]
    fn test_bearer_without_expiry_is_valid() {
        let cred = Credential::bearer("opaque-token", None);
        assert!(cred.expires_at.is_none());
        assert!(cred.is_valid());
    }

    #[test]
    fn test_bearer_validity_applies_buffer() {
        // Expires in 30s: inside the 60s buffer, so already invalid.
        let soon = Utc::now() + Duration::seconds(30);
        let cred = Credential::bearer_with_expiry("tok", None, Some(soon));
        assert!(!cred.is_valid());

        // Expires in 2 minutes: outside the buffer.
        let later = Utc::now() + Duration::seconds(120);
        let cred = Credential::bearer_with_expiry("tok", None, Some(later));
        assert!(cred.is_valid());
    }

    #[test]
    fn test_expired_bearer_is_invalid() {
        let past = Utc::now() - Duration::seconds(10);
        let cred = Credential::bearer_with_expiry("tok", None, Some(past));
        assert!(!cred.is_valid());
        assert!(cred.seconds_until_expiry().unwrap() < 0);
    }

    #[test]
    fn test_bearer_extracts_jwt_expiry() {
        let exp = (Utc::now() + Duration::seconds(3600)).timestamp();
        let cred = Credential::bearer(jwt_with_exp(exp), None);
        assert_eq!(cred.expires_at.map(|e| e.timestamp()), Some(exp));
    }

    #[test]
    fn test_jwt_decode_rejects_garbage() {
        assert!(decode_jwt_expiry("not-a-jwt").is_none());
        assert!(decode_jwt_expiry("a.%%%.c").is_none());
        // Valid base64 but no exp claim
        let payload = URL_SAFE_NO_PAD.encode("{\"sub\":\"user-1\"}");
        assert!(decode_jwt_expiry(&format!("e30.{payload}.sig")).is_none());
    }

    #[test]
    fn test_refresh_response_optional_fields() {
        let body: RefreshResponse =
            serde_json::from_str("{\"access_token\":\"tok\"}").unwrap();
        assert_eq!(body.access_token, "tok");
        assert!(body.refresh_token.is_none());
        assert!(body.expires_in.is_none());
        assert!(body.expires_at.is_none());
    }
}
