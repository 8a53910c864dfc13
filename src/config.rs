//! Client configuration
//!
//! [`ClientConfig`] is an immutable snapshot built once via the builder
//! and validated before the client is constructed. Per-request overrides
//! go through [`RequestOptions`] instead of mutating the config.

use std::time::Duration;

use url::Url;

use crate::error::{SdkError, SdkResult};
use crate::resilience::CircuitBreakerConfig;

/// What to do when a request cannot obtain a valid credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthFailurePolicy {
    /// Log a warning and send the request without an auth header,
    /// letting the server reject it
    #[default]
    ProceedUnauthenticated,
    /// Surface the authentication error without sending the request
    Fail,
}

/// Client-side rate limit: `requests` per `period`
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Number of requests allowed per period
    pub requests: u32,
    /// Length of the period
    pub period: Duration,
}

/// Per-request overrides
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Override the client-level timeout for this request
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options with a per-request timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout) }
    }
}

/// Immutable client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API, without a trailing path
    pub base_url: String,
    /// Static API key; mutually exclusive with `bearer_token`
    pub api_key: Option<String>,
    /// Bearer access token; mutually exclusive with `api_key`
    pub bearer_token: Option<String>,
    /// Refresh token accompanying `bearer_token`
    pub refresh_token: Option<String>,
    /// Default request timeout
    pub timeout: Duration,
    /// Total attempts per request, including the first
    pub max_retries: u32,
    /// Backoff before retry k is `retry_base_delay * 2^(k-1)`, capped at 30s
    pub retry_base_delay: Duration,
    /// Whether to verify TLS certificates
    pub verify_tls: bool,
    /// Optional client-side rate limit
    pub rate_limit: Option<RateLimitConfig>,
    /// Circuit breaker tuning
    pub circuit_breaker: CircuitBreakerConfig,
    /// Behavior when a credential cannot be obtained
    pub auth_failure_policy: AuthFailurePolicy,
}

impl ClientConfig {
    /// Start building a configuration for the given base URL
    pub fn builder(base_url: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig {
                base_url: base_url.into(),
                api_key: None,
                bearer_token: None,
                refresh_token: None,
                timeout: Duration::from_secs(30),
                max_retries: 3,
                retry_base_delay: Duration::from_secs(1),
                verify_tls: true,
                rate_limit: None,
                circuit_breaker: CircuitBreakerConfig::default(),
                auth_failure_policy: AuthFailurePolicy::default(),
            },
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> SdkResult<()> {
        Url::parse(&self.base_url)
            .map_err(|err| SdkError::configuration(format!("invalid base_url: {err}")))?;

        if self.api_key.is_some() && self.bearer_token.is_some() {
            return Err(SdkError::configuration(
                "api_key and bearer_token are mutually exclusive",
            ));
        }
        if self.refresh_token.is_some() && self.bearer_token.is_none() {
            return Err(SdkError::configuration(
                "refresh_token requires a bearer_token",
            ));
        }
        if self.max_retries == 0 {
            return Err(SdkError::configuration("max_retries must be at least 1"));
        }
        if let Some(rate_limit) = &self.rate_limit {
            if rate_limit.requests == 0 {
                return Err(SdkError::configuration("rate_limit.requests must be at least 1"));
            }
            if rate_limit.period.is_zero() {
                return Err(SdkError::configuration("rate_limit.period must be positive"));
            }
        }
        self.circuit_breaker.validate()?;
        Ok(())
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Authenticate with a static API key
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Authenticate with a bearer token
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.config.bearer_token = Some(token.into());
        self
    }

    /// Refresh token used to renew the bearer token
    pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
        self.config.refresh_token = Some(token.into());
        self
    }

    /// Default request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Total attempts per request, including the first
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Base delay for exponential backoff between retries
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    /// Toggle TLS certificate verification
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.config.verify_tls = verify;
        self
    }

    /// Enable client-side rate limiting
    pub fn rate_limit(mut self, requests: u32, period: Duration) -> Self {
        self.config.rate_limit = Some(RateLimitConfig { requests, period });
        self
    }

    /// Circuit breaker tuning
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Behavior when a credential cannot be obtained
    pub fn auth_failure_policy(mut self, policy: AuthFailurePolicy) -> Self {
        self.config.auth_failure_policy = policy;
        self
    }

    /// Validate and produce the configuration
    pub fn build(self) -> SdkResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
