//! Circuit breaker for protecting calls to an unreliable dependency
//!
//! Implements the classic three-state breaker: `Closed` (calls pass through),
//! `Open` (calls are rejected immediately), and `HalfOpen` (a limited number
//! of probe calls are let through to test recovery).

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Current state of a [`CircuitBreaker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through normally
    Closed,
    /// Calls are rejected without invoking the wrapped operation
    Open,
    /// A limited number of probe calls are allowed through to test recovery
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`]
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The wrapped operation ran and failed
    OperationFailed(E),
    /// The circuit is open; the operation was not invoked
    Open,
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::OperationFailed(e) => write!(f, "operation failed: {e}"),
            CircuitBreakerError::Open => write!(f, "circuit breaker is open"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitBreakerError::OperationFailed(e) => Some(e),
            CircuitBreakerError::Open => None,
        }
    }
}

/// Configuration for a [`CircuitBreaker`]
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive qualifying failures required to trip the breaker
    pub failure_threshold: usize,
    /// How long the breaker stays open before allowing a probe call
    pub reset_timeout: Duration,
    /// Number of successful probe calls required in `HalfOpen` to close the breaker
    pub success_threshold: usize,
}

impl CircuitBreakerConfig {
    /// Create a new configuration with the given failure threshold and reset timeout
    pub fn new(failure_threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            success_threshold: 1,
        }
    }

    /// Set how many consecutive probe successes are needed to close the breaker
    pub fn with_success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = threshold;
        self
    }
}

/// Point-in-time statistics for a [`CircuitBreaker`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreakerStats {
    /// Total calls observed (including rejected ones)
    pub total_calls: u64,
    /// Calls rejected because the circuit was open
    pub rejected_calls: u64,
    /// Calls where the wrapped operation succeeded
    pub successes: u64,
    /// Calls where the wrapped operation failed
    pub failures: u64,
    /// Number of times the breaker has changed state
    pub state_changes: u64,
}

struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
    stats: CircuitBreakerStats,
}

/// A circuit breaker guarding calls to a single logical dependency
///
/// Cheaply cloneable; clones share the same underlying state, so a breaker
/// can be held by every caller of the guarded operation.
///
/// # Example
///
/// ```rust
/// use tooling::middleware::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(30)));
///
/// let result = breaker.call(|| async { Ok::<_, String>("ok") }).await;
/// assert!(result.is_ok());
/// # }
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in the `Closed` state
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_probe_in_flight: false,
                stats: CircuitBreakerStats::default(),
            })),
        }
    }

    /// Current state of the breaker
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Snapshot of the breaker's statistics
    pub async fn stats(&self) -> CircuitBreakerStats {
        self.state.lock().await.stats
    }

    /// Run `operation` through the breaker
    ///
    /// Rejects immediately with [`CircuitBreakerError::Open`] if the circuit
    /// is open and `reset_timeout` hasn't elapsed, or if the circuit is
    /// half-open and a probe call is already in flight.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit().await {
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure().await;
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    /// Decide whether a call may proceed, transitioning `Open` -> `HalfOpen`
    /// once `reset_timeout` has elapsed.
    async fn admit(&self) -> bool {
        let mut guard = self.state.lock().await;
        guard.stats.total_calls += 1;

        match guard.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = guard
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);

                if elapsed >= self.config.reset_timeout {
                    guard.state = CircuitState::HalfOpen;
                    guard.half_open_probe_in_flight = true;
                    guard.consecutive_successes = 0;
                    guard.stats.state_changes += 1;
                    true
                } else {
                    guard.stats.rejected_calls += 1;
                    false
                }
            }
            CircuitState::HalfOpen => {
                if guard.half_open_probe_in_flight {
                    guard.stats.rejected_calls += 1;
                    false
                } else {
                    guard.half_open_probe_in_flight = true;
                    true
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut guard = self.state.lock().await;
        guard.stats.successes += 1;
        guard.half_open_probe_in_flight = false;

        match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= self.config.success_threshold {
                    guard.state = CircuitState::Closed;
                    guard.consecutive_failures = 0;
                    guard.consecutive_successes = 0;
                    guard.stats.state_changes += 1;
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut guard = self.state.lock().await;
        guard.stats.failures += 1;
        guard.half_open_probe_in_flight = false;

        match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures += 1;
                if guard.consecutive_failures >= self.config.failure_threshold {
                    guard.state = CircuitState::Open;
                    guard.opened_at = Some(Instant::now());
                    guard.stats.state_changes += 1;
                }
            }
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.opened_at = Some(Instant::now());
                guard.consecutive_successes = 0;
                guard.stats.state_changes += 1;
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(60)));

        for _ in 0..3 {
            let result = breaker.call(|| async { Err::<(), _>("boom") }).await;
            assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
        }

        assert_eq!(breaker.state().await, CircuitState::Open);

        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn test_half_open_success_closes_circuit() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(10)));

        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_circuit() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(10)));

        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = breaker.call(|| async { Err::<(), _>("still broken") }).await;
        assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_stats_track_state_changes() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(10)));

        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;

        let stats = breaker.stats().await;
        assert!(stats.state_changes >= 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.successes, 1);
    }

    #[tokio::test]
    async fn test_successful_calls_dont_trip_breaker() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let calls = calls.clone();
            let result = breaker
                .call(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                })
                .await;
            assert!(result.is_ok());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
