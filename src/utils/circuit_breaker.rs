use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::metrics::Metrics;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards outbound calls to the message bus. After `failure_threshold`
// consecutive failures the circuit opens and calls fail fast until
// `timeout` has elapsed; then one trial call is let through (HalfOpen) and
// `success_threshold` successes close it again.
//
// The state lock is never held across an await, so it is a plain std mutex
// and `state()` can be read from synchronous health checks.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding (0=Closed, 1=Open, 2=HalfOpen)
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Time to wait in Open before letting a trial call through
    pub timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
    metrics: Option<Arc<Metrics>>,
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "Circuit breaker is open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error> std::error::Error for CircuitBreakerError<E> {}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        metrics.update_circuit_breaker_state(CircuitState::Closed);
        self.metrics = Some(metrics);
        self
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // A panic while holding the lock leaves counters, not invariants, behind
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, guard: &mut BreakerState, to: CircuitState) {
        let from = guard.state;
        if from == to {
            return;
        }
        guard.state = to;
        tracing::info!(from = from.as_str(), to = to.as_str(), "Circuit breaker transition");
        if let Some(metrics) = &self.metrics {
            metrics.record_circuit_breaker_transition(from, to);
            metrics.update_circuit_breaker_state(to);
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        {
            let mut guard = self.lock();
            if guard.state == CircuitState::Open {
                let elapsed = guard
                    .last_failure_time
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if !elapsed {
                    return Err(CircuitBreakerError::CircuitOpen);
                }
                guard.success_count = 0;
                self.transition(&mut guard, CircuitState::HalfOpen);
            }
        }

        match operation.await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    fn record_success(&self) {
        let mut guard = self.lock();
        match guard.state {
            CircuitState::HalfOpen => {
                guard.success_count += 1;
                if guard.success_count >= self.config.success_threshold {
                    guard.failure_count = 0;
                    guard.success_count = 0;
                    guard.last_failure_time = None;
                    self.transition(&mut guard, CircuitState::Closed);
                }
            }
            CircuitState::Closed => guard.failure_count = 0,
            CircuitState::Open => tracing::warn!("Success recorded while circuit is open"),
        }
    }

    fn record_failure(&self) {
        let mut guard = self.lock();
        guard.failure_count += 1;
        guard.last_failure_time = Some(Instant::now());

        match guard.state {
            CircuitState::Closed if guard.failure_count >= self.config.failure_threshold => {
                tracing::warn!(failures = guard.failure_count, "Circuit breaker opening");
                self.transition(&mut guard, CircuitState::Open);
            }
            CircuitState::HalfOpen => {
                tracing::warn!("Failure during half-open, reopening circuit");
                guard.success_count = 0;
                self.transition(&mut guard, CircuitState::Open);
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn reset(&self) {
        let mut guard = self.lock();
        tracing::info!("Circuit breaker manually reset");
        guard.failure_count = 0;
        guard.success_count = 0;
        guard.last_failure_time = None;
        self.transition(&mut guard, CircuitState::Closed);
    }
}
