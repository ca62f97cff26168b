//! Per-source circuit breaker.
//!
//! A breaker wraps every remote call of one source. It counts failures while
//! **closed**, fails fast while **open**, and after the recovery timeout lets
//! probe calls through in **half-open** until enough of them succeed:
//!
//! ```text
//! Closed --(failure_threshold failures)--> Open
//! Open   --(recovery_timeout elapsed, next call)--> HalfOpen
//! HalfOpen --(success_threshold successes)--> Closed
//! HalfOpen --(any failure)--> Open
//! ```
//!
//! The per-call timeout is enforced here, independently of the HTTP client's
//! own timeout, and counts as a failure.
//!
//! ```rust
//! use sitemapper_core::circuit_breaker::CircuitBreaker;
//! use sitemapper_core::config::CircuitBreakerConfig;
//!
//! # async fn example() -> sitemapper_core::Result<()> {
//! let breaker = CircuitBreaker::new("products", CircuitBreakerConfig::default());
//! let count = breaker.call(|| async { Ok(42_u64) }).await?;
//! assert_eq!(count, 42);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::{ConnectionKind, Error, Result};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// Probe calls pass through to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Point-in-time view of a breaker, free of side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    /// Source the breaker protects.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures counted in the current state.
    pub failure_count: u32,
    /// Successes counted while half-open.
    pub success_count: u32,
    /// Thresholds the breaker runs with.
    pub config: CircuitBreakerConfig,
    /// Remaining cool-down while open.
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

impl Inner {
    const fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
        }
    }
}

/// Failure-isolation state machine for one source.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::closed()),
        }
    }

    /// Name of the protected source.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thresholds in use.
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under the breaker.
    ///
    /// # Errors
    ///
    /// - [`ConnectionKind::CircuitOpen`] without running `operation` while open,
    ///   carrying the remaining cool-down
    /// - [`ConnectionKind::Timeout`] if `operation` exceeds the per-call timeout
    /// - the operation's own error otherwise
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;

        let call_timeout = self.config.call_timeout();
        match tokio::time::timeout(call_timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            },
            Ok(Err(e)) => {
                self.record_failure(&e);
                Err(e)
            },
            Err(_) => {
                let err = Error::connection(
                    ConnectionKind::Timeout,
                    format!(
                        "call to '{}' exceeded {}s breaker timeout",
                        self.name,
                        call_timeout.as_secs_f64()
                    ),
                );
                self.record_failure(&err);
                Err(err)
            },
        }
    }

    /// Current state. Does not advance Open to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Snapshot of counters and state.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            config: self.config,
            retry_after: if inner.state == CircuitState::Open {
                Some(self.remaining_cooldown(&inner))
            } else {
                None
            },
        }
    }

    /// Force the breaker closed with zeroed counters.
    pub fn reset(&self) {
        *self.lock() = Inner::closed();
        info!(source = %self.name, "Circuit breaker reset");
    }

    fn admit(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }
        let remaining = self.remaining_cooldown(&inner);
        if remaining.is_zero() {
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            info!(source = %self.name, "Circuit breaker HALF_OPEN, probing recovery");
            Ok(())
        } else {
            Err(Error::circuit_open(&self.name, remaining))
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    *inner = Inner::closed();
                    info!(source = %self.name, "Circuit breaker CLOSED, source recovered");
                }
            },
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {},
        }
    }

    fn record_failure(&self, error: &Error) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                warn!(source = %self.name, error = %error, "Probe failed, circuit breaker OPEN again");
            },
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    source = %self.name,
                    failures = inner.failure_count,
                    error = %error,
                    "Circuit breaker OPEN"
                );
            },
            _ => {
                debug!(
                    source = %self.name,
                    failures = inner.failure_count,
                    error = %error,
                    "Call failed"
                );
            },
        }
    }

    fn remaining_cooldown(&self, inner: &Inner) -> Duration {
        inner.last_failure.map_or(Duration::ZERO, |at| {
            self.config.recovery().saturating_sub(at.elapsed())
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry holding one breaker per source for the lifetime of a run.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    default_config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerManager {
    /// Create an empty registry; breakers are created on first use.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Breaker for `name`, created from `override_config` or the default.
    ///
    /// The configuration is only consulted the first time a name is seen.
    pub fn get(
        &self,
        name: &str,
        override_config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                name,
                override_config.unwrap_or(self.default_config),
            ))
        }))
    }

    /// Stats of every breaker, sorted by source name.
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.lock().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Reset every breaker to closed.
    pub fn reset_all(&self) {
        for breaker in self.lock().values() {
            breaker.reset();
        }
    }

    /// Sources whose breaker is closed.
    pub fn healthy_sources(&self) -> Vec<String> {
        self.sources_in(CircuitState::Closed)
    }

    /// Sources whose breaker is open.
    pub fn failed_sources(&self) -> Vec<String> {
        self.sources_in(CircuitState::Open)
    }

    fn sources_in(&self, state: CircuitState) -> Vec<String> {
        let mut names: Vec<_> = self
            .lock()
            .values()
            .filter(|b| b.state() == state)
            .map(|b| b.name().to_string())
            .collect();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn config(failures: u32, successes: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: failures,
            recovery_timeout: 10,
            success_threshold: successes,
            timeout: 5,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Error {
        breaker
            .call(|| async {
                Err::<(), _>(Error::connection(ConnectionKind::Transport, "refused"))
            })
            .await
            .unwrap_err()
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32> {
        breaker.call(|| async { Ok(1) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new("core", config(3, 2));

        for _ in 0..2 {
            fail(&breaker).await;
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // The operation must not run while open.
        let ran = std::sync::atomic::AtomicBool::new(false);
        let err = breaker
            .call(|| async {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(err.connection_kind(), Some(ConnectionKind::CircuitOpen));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("core", config(1, 2));
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new("core", config(2, 3));
        fail(&breaker).await;
        fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(11)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let stats = breaker.stats();
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.retry_after, Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_closed_failures() {
        let breaker = CircuitBreaker::new("core", config(3, 1));
        fail(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("core", config(1, 1));
        let err = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_manager_views() {
        let manager = CircuitBreakerManager::new(config(1, 1));
        let a = manager.get("alpha", None);
        let b = manager.get("beta", Some(config(5, 1)));
        assert!(Arc::ptr_eq(&a, &manager.get("alpha", None)));
        assert_eq!(b.config().failure_threshold, 5);

        fail(&a).await;
        fail(&b).await;
        assert_eq!(manager.failed_sources(), vec!["alpha".to_string()]);
        assert_eq!(manager.healthy_sources(), vec!["beta".to_string()]);

        let stats = manager.all_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "alpha");
        assert_eq!(stats[0].state, CircuitState::Open);

        manager.reset_all();
        assert!(manager.failed_sources().is_empty());
        assert_eq!(a.stats().failure_count, 0);
    }
}
