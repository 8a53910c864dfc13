//! Circuit breaker guarding the network exchange
//!
//! Tracks consecutive failures and temporarily rejects calls once a
//! threshold is reached, giving the upstream service room to recover.
//! State machine: closed -> open at `failure_threshold` failures;
//! open -> half-open once `timeout` has elapsed since the last failure;
//! half-open -> closed on the next success, half-open -> open on the next
//! failure. The breaker wraps a single network exchange; each retry
//! attempt is a separate [`CircuitBreaker::execute`] call.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{SdkError, SdkResult};
use crate::resilience::{Clock, SystemClock};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Allowing requests
    Closed,
    /// Rejecting requests
    Open,
    /// Allowing a probe request to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u64,
    /// Time to wait before transitioning from open to half-open
    pub timeout: Duration,
    /// Whether a success in the closed state clears the failure count
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            reset_on_success: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> SdkResult<()> {
        if self.failure_threshold == 0 {
            return Err(SdkError::configuration("failure_threshold must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    pub fn build(self) -> SdkResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of breaker state for introspection
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    /// Current circuit state
    pub state: CircuitState,
    /// Consecutive failure count
    pub failure_count: u64,
    /// Seconds since the most recent failure, if any
    pub seconds_since_last_failure: Option<f64>,
}

/// Circuit breaker protecting a single downstream dependency
///
/// Generic over [`Clock`] so timeout transitions can be tested with a
/// mock clock instead of real delays.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU64,
    last_failure_time: RwLock<Option<Instant>>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Acquire))
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> SdkResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> SdkResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU64::new(0),
            last_failure_time: RwLock::new(None),
            clock,
        })
    }

    /// Check whether the breaker currently allows a call
    ///
    /// Returns `false` while open and the timeout hasn't elapsed; otherwise
    /// `true`, transitioning from open to half-open when the timeout has
    /// passed since the last failure.
    pub fn can_execute(&self) -> bool {
        let state = match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                *poisoned.into_inner()
            }
        };

        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if let Ok(last_failure_guard) = self.last_failure_time.read() {
                    if let Some(failure_time) = *last_failure_guard {
                        let now = self.clock.now();
                        if now.duration_since(failure_time) >= self.config.timeout {
                            drop(last_failure_guard);
                            if let Ok(mut state) = self.state.write() {
                                *state = CircuitState::HalfOpen;
                            }
                            info!("circuit breaker transitioning to half-open");
                            return true;
                        }
                    }
                }
                false
            }
        }
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Fast-fails with a `CircuitBreakerOpen` error while open; otherwise
    /// runs the operation and records the outcome. The operation's own
    /// error is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> SdkResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SdkResult<T>>,
    {
        if !self.can_execute() {
            debug!(state = %self.state(), "circuit breaker rejecting call");
            return Err(SdkError::circuit_open());
        }

        match operation().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                if self.config.reset_on_success {
                    self.failure_count.store(0, Ordering::Release);
                }
            }
            CircuitState::HalfOpen => {
                if let Ok(mut state_guard) = self.state.write() {
                    *state_guard = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::Release);
                }
                info!("circuit breaker closed after successful probe");
            }
            CircuitState::Open => {
                // Shouldn't happen; execute() rejects calls while open.
                warn!("received success while circuit is open");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let failure_count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        let now = self.clock.now();

        if let Ok(mut last_failure) = self.last_failure_time.write() {
            *last_failure = Some(now);
        }

        match self.state() {
            CircuitState::Closed => {
                if failure_count >= self.config.failure_threshold {
                    if let Ok(mut state_guard) = self.state.write() {
                        *state_guard = CircuitState::Open;
                    }
                    warn!(failure_count, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                // Any failure during the probe reopens the circuit.
                if let Ok(mut state_guard) = self.state.write() {
                    *state_guard = CircuitState::Open;
                }
                warn!("circuit breaker reopened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current circuit state
    pub fn state(&self) -> CircuitState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("circuit breaker state lock poisoned");
                *poisoned.into_inner()
            }
        }
    }

    /// Snapshot the breaker state for introspection
    pub fn status(&self) -> CircuitBreakerStatus {
        let seconds_since_last_failure = self
            .last_failure_time
            .read()
            .ok()
            .and_then(|guard| *guard)
            .map(|t| self.clock.now().duration_since(t).as_secs_f64());

        CircuitBreakerStatus {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            seconds_since_last_failure,
        }
    }

    /// Reset the circuit breaker to the closed state
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::Release);

        if let Ok(mut last_failure) = self.last_failure_time.write() {
            *last_failure = None;
        }
        if let Ok(mut state_guard) = self.state.write() {
            *state_guard = CircuitState::Closed;
        }
        info!("circuit breaker manually reset to closed state");
    }
}
