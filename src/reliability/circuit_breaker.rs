//! Three-state fault-isolation primitive around connect/publish
//! operations (spec §4.8).

use crate::error::Error;
use crate::events::{CircuitState, CircuitStateChange, Event, EventSink, NoopEventSink};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(30), half_open_max_attempts: 1 }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    half_open_in_flight: u32,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    sink: Arc<dyn EventSink>,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    Open,
    #[error("half-open trial limit reached")]
    HalfOpenLimit,
    #[error(transparent)]
    Inner(E),
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_sink(config, Arc::new(NoopEventSink))
    }

    pub fn with_sink(config: CircuitBreakerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                success_count: 0,
                last_failure_at: None,
                half_open_in_flight: 0,
            }),
            sink,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    fn transition(&self, inner: &mut Inner, new_state: CircuitState) {
        if inner.state == new_state {
            return;
        }
        let old_state = inner.state;
        inner.state = new_state;
        self.sink.on_event(&Event::CircuitBreakerStateChange(CircuitStateChange {
            old_state,
            new_state,
            failure_count: inner.consecutive_failures,
            success_count: inner.success_count,
        }));
    }

    /// Checks whether a call may proceed right now, transitioning Open
    /// -> HalfOpen once `reset_timeout` has elapsed, and reserving a
    /// half-open trial slot if so.
    fn admit(&self) -> Result<bool, ()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let elapsed = inner.last_failure_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.config.reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_in_flight = 1;
                    Ok(true)
                } else {
                    Err(())
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_attempts {
                    inner.half_open_in_flight += 1;
                    Ok(true)
                } else {
                    Err(())
                }
            }
        }
    }

    fn record_success(&self, is_half_open_trial: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.success_count += 1;
        if is_half_open_trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            if inner.half_open_in_flight == 0 {
                self.transition(&mut inner, CircuitState::Closed);
                self.sink.on_event(&Event::CircuitBreakerReset);
            }
        }
    }

    fn record_failure(&self, is_half_open_trial: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure_at = Some(Instant::now());
        if is_half_open_trial {
            inner.half_open_in_flight = 0;
            self.transition(&mut inner, CircuitState::Open);
            return;
        }
        inner.consecutive_failures += 1;
        if inner.state == CircuitState::Closed && inner.consecutive_failures >= self.config.failure_threshold {
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// Wraps `op`. Fails fast with `CircuitBreakerError::Open` while
    /// open, or `HalfOpenLimit` once the half-open trial quota is
    /// exhausted.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let is_half_open_trial = match self.admit() {
            Ok(v) => v,
            Err(()) => {
                let state = self.state();
                return Err(if state == CircuitState::HalfOpen {
                    CircuitBreakerError::HalfOpenLimit
                } else {
                    CircuitBreakerError::Open
                });
            }
        };

        match op().await {
            Ok(value) => {
                self.record_success(is_half_open_trial);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(is_half_open_trial);
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }
}

impl<E> From<CircuitBreakerError<E>> for Error
where
    E: std::fmt::Display,
{
    fn from(e: CircuitBreakerError<E>) -> Self {
        match e {
            CircuitBreakerError::Open => Error::state("circuit breaker is open"),
            CircuitBreakerError::HalfOpenLimit => Error::state("circuit breaker half-open limit reached"),
            CircuitBreakerError::Inner(inner) => Error::state(inner.to_string()),
        }
    }
}
