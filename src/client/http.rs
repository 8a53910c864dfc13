//! HTTP request executor
//!
//! [`HttpClient`] orchestrates the full request pipeline: rate-limiter
//! admission, credential resolution, header assembly, the retry loop with
//! exponential backoff, and circuit-breaker protection around each
//! network exchange. A 401 response triggers at most one token refresh
//! and resend per logical request, outside the retry budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::auth::{AuthManager, Credential, CredentialKind};
use crate::config::{AuthFailurePolicy, ClientConfig, RequestOptions};
use crate::error::{SdkError, SdkResult};
use crate::resilience::{CircuitBreaker, CircuitBreakerStatus, TokenBucket};

const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");
const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Combined health snapshot of the client's collaborators
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Whether a usable credential is currently held
    pub authenticated: bool,
    /// Circuit breaker snapshot
    pub circuit_breaker: CircuitBreakerStatus,
}

/// Resilient HTTP client for the Backstage IDP API
pub struct HttpClient {
    config: ClientConfig,
    http: reqwest::Client,
    auth: Option<AuthManager>,
    breaker: CircuitBreaker,
    limiter: Option<TokenBucket>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient").field("base_url", &self.config.base_url).finish()
    }
}

impl HttpClient {
    /// Build a client from a validated configuration
    pub fn new(config: ClientConfig) -> SdkResult<Self> {
        config.validate()?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        default_headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(concat!("backstage-sdk-rust/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .default_headers(default_headers)
            .build()
            .map_err(|err| SdkError::configuration(format!("failed to build http client: {err}")))?;

        let initial_credential = if let Some(key) = &config.api_key {
            Some(Credential::api_key(key))
        } else {
            config
                .bearer_token
                .as_ref()
                .map(|token| Credential::bearer(token.clone(), config.refresh_token.clone()))
        };
        let auth = initial_credential
            .map(|credential| AuthManager::new(&config.base_url, http.clone(), Some(credential)));

        let breaker = CircuitBreaker::new(config.circuit_breaker.clone())?;

        let limiter = match &config.rate_limit {
            Some(rate_limit) => {
                let rate = f64::from(rate_limit.requests) / rate_limit.period.as_secs_f64();
                let capacity = f64::from(rate_limit.requests.min(10));
                Some(TokenBucket::new(capacity, rate)?)
            }
            None => None,
        };

        Ok(Self { config, http, auth, breaker, limiter })
    }

    /// Execute a request and return the response body as JSON
    ///
    /// Runs the full pipeline: rate-limit admission, credential
    /// resolution, retry loop with per-attempt circuit-breaker
    /// protection, and error classification. A `204` response yields an
    /// empty JSON object; a non-JSON body is returned as a JSON string.
    #[instrument(skip_all, fields(method = %method, path = path))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: Option<&[(String, String)]>,
        body: Option<&Value>,
        headers: Option<HeaderMap>,
        options: Option<&RequestOptions>,
    ) -> SdkResult<Value> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let mut request_headers = headers.unwrap_or_default();
        if let Some(auth) = &self.auth {
            match auth.ensure_valid().await {
                Ok(credential) => insert_auth_header(&mut request_headers, &credential)?,
                Err(err) => match self.config.auth_failure_policy {
                    AuthFailurePolicy::ProceedUnauthenticated => {
                        warn!(error = %err, "no valid credential, sending request unauthenticated");
                    }
                    AuthFailurePolicy::Fail => return Err(err),
                },
            }
        }

        let request_id = format!("req_{}", Uuid::new_v4().simple());
        request_headers.insert(
            REQUEST_ID_HEADER,
            HeaderValue::from_str(&request_id)
                .map_err(|err| SdkError::configuration(format!("invalid request id: {err}")))?,
        );

        let url = join_url(&self.config.base_url, path);
        let timeout = options.and_then(|o| o.timeout).unwrap_or(self.config.timeout);
        let refreshed = AtomicBool::new(false);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = self
                .breaker
                .execute(|| {
                    self.execute_once(
                        method.clone(),
                        &url,
                        params,
                        body,
                        &mut request_headers,
                        timeout,
                        &refreshed,
                    )
                })
                .await;

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// GET a path
    pub async fn get(
        &self,
        path: &str,
        params: Option<&[(String, String)]>,
        options: Option<&RequestOptions>,
    ) -> SdkResult<Value> {
        self.request(Method::GET, path, params, None, None, options).await
    }

    /// POST a JSON body to a path
    pub async fn post(
        &self,
        path: &str,
        body: Option<&Value>,
        options: Option<&RequestOptions>,
    ) -> SdkResult<Value> {
        self.request(Method::POST, path, None, body, None, options).await
    }

    /// PUT a JSON body to a path
    pub async fn put(
        &self,
        path: &str,
        body: Option<&Value>,
        options: Option<&RequestOptions>,
    ) -> SdkResult<Value> {
        self.request(Method::PUT, path, None, body, None, options).await
    }

    /// PATCH a JSON body at a path
    pub async fn patch(
        &self,
        path: &str,
        body: Option<&Value>,
        options: Option<&RequestOptions>,
    ) -> SdkResult<Value> {
        self.request(Method::PATCH, path, None, body, None, options).await
    }

    /// DELETE a path
    pub async fn delete(&self, path: &str, options: Option<&RequestOptions>) -> SdkResult<Value> {
        self.request(Method::DELETE, path, None, None, None, options).await
    }

    /// Access the credential manager, when authentication is configured
    pub fn auth(&self) -> Option<&AuthManager> {
        self.auth.as_ref()
    }

    /// Snapshot the circuit breaker state
    pub fn circuit_breaker_status(&self) -> CircuitBreakerStatus {
        self.breaker.status()
    }

    /// Force the circuit breaker back to the closed state
    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    /// Combined health snapshot
    pub async fn connection_status(&self) -> ConnectionStatus {
        let authenticated = match &self.auth {
            Some(auth) => auth.is_valid().await,
            None => false,
        };
        ConnectionStatus { authenticated, circuit_breaker: self.breaker.status() }
    }

    /// Release background resources; safe to call repeatedly
    pub fn close(&self) {
        if let Some(auth) = &self.auth {
            auth.close();
        }
    }

    /// One network exchange, including the once-per-request 401 recovery
    #[allow(clippy::too_many_arguments)]
    async fn execute_once(
        &self,
        method: Method,
        url: &str,
        params: Option<&[(String, String)]>,
        body: Option<&Value>,
        headers: &mut HeaderMap,
        timeout: Duration,
        refreshed: &AtomicBool,
    ) -> SdkResult<Value> {
        let mut response =
            self.send(method.clone(), url, params, body, headers.clone(), timeout).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(auth) = &self.auth {
                if !refreshed.swap(true, Ordering::SeqCst) {
                    match auth.refresh().await {
                        Ok(credential) => {
                            debug!("credential refreshed after 401, resending request");
                            // Written back into the shared headers so later
                            // retry attempts carry the new token too.
                            insert_auth_header(headers, &credential)?;
                            response = self
                                .send(method, url, params, body, headers.clone(), timeout)
                                .await?;
                        }
                        Err(err) => {
                            // Fall through and classify the original 401.
                            debug!(error = %err, "credential refresh after 401 failed");
                        }
                    }
                }
            }
        }

        let status = response.status();
        if status.as_u16() >= 400 {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SdkError::from_response(status.as_u16(), &body_text));
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Object(Map::new()));
        }

        let text = response.text().await.map_err(SdkError::from_transport)?;
        if text.is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(_) => Ok(Value::String(text)),
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        params: Option<&[(String, String)]>,
        body: Option<&Value>,
        headers: HeaderMap,
        timeout: Duration,
    ) -> SdkResult<reqwest::Response> {
        let mut builder = self.http.request(method, url).headers(headers).timeout(timeout);
        if let Some(params) = params {
            builder = builder.query(params);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder.send().await.map_err(SdkError::from_transport)
    }
}

fn insert_auth_header(headers: &mut HeaderMap, credential: &Credential) -> SdkResult<()> {
    let value = HeaderValue::from_str(&credential.auth_header_value()).map_err(|_| {
        SdkError::authentication("credential contains characters not valid in a header")
    })?;
    let name = match credential.kind {
        CredentialKind::ApiKey => API_KEY_HEADER,
        CredentialKind::Bearer => AUTHORIZATION,
    };
    headers.insert(name, value);
    Ok(())
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Delay before retry attempt `attempt + 1`, doubling from the base and
/// capped at 30 seconds
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(MAX_BACKOFF)
}
