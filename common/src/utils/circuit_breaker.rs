use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// What the caller should do instead when a protected dependency is
/// unavailable. Strategies are first-class values so the orchestrator can
/// record which one it applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackStrategy {
    ReturnRetrievalOnly,
    UseKeywordSearch,
    SuggestRefinement,
    ReturnCached,
    ReturnPartial,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Tri-state circuit breaker guarding one external dependency.
///
/// CLOSED counts consecutive failures; at `failure_threshold` it opens.
/// OPEN short-circuits with `CIRCUIT_OPEN` until `open_timeout` elapses,
/// then admits probes in HALF_OPEN. `success_threshold` successes close the
/// breaker again; any HALF_OPEN failure re-opens it. Transitions are
/// serialized behind one lock so observers see a consistent state.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, 5, 2, Duration::from_secs(60))
    }

    pub fn with_settings(
        name: impl Into<String>,
        failure_threshold: u32,
        success_threshold: u32,
        open_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            open_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Admission check. Flips OPEN → HALF_OPEN once the timeout has passed.
    pub fn check(&self) -> Result<(), AppError> {
        let mut inner = self.lock();

        if inner.state == BreakerState::Open {
            let elapsed = inner.opened_at.map_or(Duration::ZERO, |t| t.elapsed());
            if elapsed >= self.open_timeout {
                info!(breaker = %self.name, "Circuit breaker entering half-open probe window");
                inner.state = BreakerState::HalfOpen;
                inner.half_open_successes = 0;
            } else {
                return Err(AppError::CircuitOpen(self.name.clone()));
            }
        }

        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.success_threshold {
                    info!(breaker = %self.name, "Circuit breaker closed after successful probes");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(breaker = %self.name, "Circuit breaker opened");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "Probe failed; circuit breaker re-opened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Runs `operation` under breaker protection, recording the outcome.
    pub async fn call<T, Fut>(&self, operation: Fut) -> Result<T, AppError>
    where
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.check()?;

        match operation.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
