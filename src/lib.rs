//! Resilient async client runtime for the Backstage IDP API
//!
//! This crate wraps `reqwest` with the plumbing a production API client
//! needs: credential storage with proactive token refresh, a circuit
//! breaker around the network exchange, client-side rate limiting, retry
//! with exponential backoff, and a uniform error taxonomy.
//!
//! # Example
//!
//! ```no_run
//! use backstage_sdk::{ClientConfig, HttpClient};
//!
//! # async fn run() -> Result<(), backstage_sdk::SdkError> {
//! let config = ClientConfig::builder("https://backstage.example.com/api")
//!     .api_key("bk_live_abc123")
//!     .max_retries(3)
//!     .build()?;
//! let client = HttpClient::new(config)?;
//!
//! let plugins = client.get("/plugins", None, None).await?;
//! println!("{plugins}");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`client::HttpClient`] orchestrates the request pipeline
//! - [`auth::AuthManager`] owns the credential and its refresh lifecycle
//! - [`resilience`] provides the circuit breaker and token bucket
//! - [`error::SdkError`] is the single error type, tagged with
//!   [`error::ErrorKind`] for classification and retry decisions

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod resilience;

pub use auth::{AuthManager, Credential, CredentialKind};
pub use client::{ConnectionStatus, HttpClient};
pub use config::{
    AuthFailurePolicy, ClientConfig, ClientConfigBuilder, RateLimitConfig, RequestOptions,
};
pub use error::{ErrorKind, SdkError, SdkResult};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitState, Clock, MockClock,
    SystemClock, TokenBucket,
};
