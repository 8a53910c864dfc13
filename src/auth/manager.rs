//! Credential lifecycle management
//!
//! [`AuthManager`] owns the client's credential: it hands out auth header
//! values, tracks validity, performs refresh exchanges against the auth
//! server, and keeps a background task armed to refresh bearer tokens
//! five minutes before they expire.
//!
//! All refresh exchanges serialize on a single async mutex. A caller that
//! acquires the mutex after another caller already refreshed sees the new
//! credential and returns it instead of issuing a duplicate exchange.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::types::{
    decode_jwt_expiry, Credential, CredentialKind, RefreshResponse, REFRESH_LEAD_SECS,
};
use crate::error::{SdkError, SdkResult};

/// Manages the client's credential and its refresh lifecycle
///
/// Cheap to clone; clones share the same credential state and refresh
/// coordination.
#[derive(Clone)]
pub struct AuthManager {
    refresh_url: String,
    http: reqwest::Client,
    credential: Arc<RwLock<Option<Credential>>>,
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
    refresh_task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager").field("refresh_url", &self.refresh_url).finish()
    }
}

impl AuthManager {
    /// Create a manager for the given API base URL
    ///
    /// When an initial bearer credential carries an expiry and a refresh
    /// token, the background refresh timer is armed immediately.
    pub fn new(base_url: &str, http: reqwest::Client, initial: Option<Credential>) -> Self {
        let manager = Self {
            refresh_url: format!("{}/auth/refresh", base_url.trim_end_matches('/')),
            http,
            credential: Arc::new(RwLock::new(initial.clone())),
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
            refresh_task: Arc::new(std::sync::Mutex::new(None)),
        };
        if let Some(credential) = initial {
            manager.schedule_refresh(&credential);
        }
        manager
    }

    /// The auth header value for the current credential, if any
    pub async fn get_auth_header(&self) -> Option<String> {
        self.credential.read().await.as_ref().map(Credential::auth_header_value)
    }

    /// A snapshot of the current credential, if any
    pub async fn credential(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }

    /// Whether the current credential exists and is usable
    pub async fn is_valid(&self) -> bool {
        self.credential.read().await.as_ref().is_some_and(Credential::is_valid)
    }

    /// Return a valid credential, refreshing synchronously if needed
    ///
    /// Fails with an `Authentication` error when no credential is
    /// configured, or when the credential is expired and no refresh token
    /// is available.
    pub async fn ensure_valid(&self) -> SdkResult<Credential> {
        {
            let guard = self.credential.read().await;
            match guard.as_ref() {
                None => return Err(SdkError::authentication("no credential configured")),
                Some(credential) if credential.is_valid() => return Ok(credential.clone()),
                Some(credential) => {
                    if credential.refresh_token.is_none() {
                        return Err(SdkError::authentication(
                            "credential expired and no refresh token available",
                        ));
                    }
                }
            }
        }
        self.refresh().await
    }

    /// Exchange the refresh token for a new credential
    ///
    /// Concurrent callers coalesce: exchanges serialize on an async mutex,
    /// and a caller that finds the credential already replaced while it
    /// waited returns the replacement instead of refreshing again. Any
    /// failure leaves the previous credential in place.
    pub async fn refresh(&self) -> SdkResult<Credential> {
        let observed = self.credential.read().await.as_ref().map(|c| c.access_token.clone());

        let _guard = self.refresh_lock.lock().await;

        let current = self
            .credential
            .read()
            .await
            .clone()
            .ok_or_else(|| SdkError::authentication("no credential configured"))?;

        let replaced_while_waiting = observed.as_deref() != Some(current.access_token.as_str());
        if replaced_while_waiting && current.is_valid() {
            debug!("refresh coalesced with a concurrent exchange");
            return Ok(current);
        }

        let refresh_token = current.refresh_token.clone().ok_or_else(|| {
            SdkError::authentication("no refresh token available")
        })?;

        self.exchange(&refresh_token).await
    }

    /// Replace the credential wholesale and re-arm the refresh timer
    pub async fn set(&self, credential: Credential) {
        *self.credential.write().await = Some(credential.clone());
        self.schedule_refresh(&credential);
    }

    /// Remove the credential and cancel any pending scheduled refresh
    pub async fn clear(&self) {
        *self.credential.write().await = None;
        self.cancel_scheduled();
        debug!("credential cleared");
    }

    /// Cancel the scheduled refresh task; safe to call repeatedly
    pub fn close(&self) {
        self.cancel_scheduled();
    }

    async fn exchange(&self, refresh_token: &str) -> SdkResult<Credential> {
        debug!("refreshing access token");

        let response = self
            .http
            .post(&self.refresh_url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|err| SdkError::authentication(format!("token refresh failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SdkError::authentication(format!(
                "token refresh failed with status {status}"
            ))
            .with_status(status.as_u16()));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|err| SdkError::authentication(format!("malformed refresh response: {err}")))?;

        let expires_at = resolve_expiry(&body);
        let credential = Credential {
            access_token: body.access_token,
            // Servers that don't rotate refresh tokens omit the field;
            // keep the one we just used.
            refresh_token: body.refresh_token.or_else(|| Some(refresh_token.to_owned())),
            expires_at,
            kind: CredentialKind::Bearer,
        };

        *self.credential.write().await = Some(credential.clone());
        self.schedule_refresh(&credential);
        info!("access token refreshed");

        Ok(credential)
    }

    /// Arm a background task that refreshes ahead of expiry
    ///
    /// Only one scheduled task exists at a time; arming replaces any
    /// previous one. Outside a tokio runtime the timer is skipped and
    /// refresh happens lazily via `ensure_valid()`.
    fn schedule_refresh(&self, credential: &Credential) {
        self.cancel_scheduled();

        if credential.kind != CredentialKind::Bearer || credential.refresh_token.is_none() {
            return;
        }
        let Some(expires_at) = credential.expires_at else { return };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime, skipping scheduled refresh");
            return;
        };

        let lead = (expires_at - Utc::now()).num_seconds() - REFRESH_LEAD_SECS;
        let delay = std::time::Duration::from_secs(lead.max(0) as u64);
        debug!(delay_secs = delay.as_secs(), "scheduling credential refresh");

        let manager = self.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = manager.refresh().await {
                warn!(error = %err, "scheduled credential refresh failed");
            }
        });

        if let Ok(mut guard) = self.refresh_task.lock() {
            *guard = Some(task);
        }
    }

    fn cancel_scheduled(&self) {
        if let Ok(mut guard) = self.refresh_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

/// Resolve the expiry of a refresh response
///
/// Resolution order: `expires_in` seconds from now, then an ISO-8601
/// `expires_at`, then the JWT `exp` claim; a token with none of these is
/// treated as non-expiring.
fn resolve_expiry(body: &RefreshResponse) -> Option<DateTime<Utc>> {
    if let Some(seconds) = body.expires_in {
        return Some(Utc::now() + ChronoDuration::seconds(seconds));
    }
    if let Some(raw) = body.expires_at.as_deref() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        warn!(expires_at = raw, "unparseable expires_at in refresh response");
    }
    decode_jwt_expiry(&body.access_token)
}
