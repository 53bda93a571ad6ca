//! A circuit breaker around a sink.
//!
//! Closed, events pass through and consecutive failures are counted; at the threshold the
//! circuit opens. Open, events go to the fallback sink (or are dropped) until the reset timeout
//! elapses - the next emit after that is the half-open probe. Half-open, successes are counted
//! until the success threshold closes the circuit again; any failure re-opens it.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::event::LogEvent;

use super::{Sink, SinkError};

/// Default number of consecutive failures that open the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default number of half-open successes that close it again.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// Default time the circuit stays open before probing.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// The breaker's observable state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing; emits are diverted.
    Open,
    /// Probing whether the sink has recovered.
    HalfOpen,
}

struct State {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

type StateCallback = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Configures a [`CircuitBreakerSink`].
pub struct CircuitBreakerBuilder {
    inner: Box<dyn Sink>,
    fallback: Option<Box<dyn Sink>>,
    on_state_change: Option<StateCallback>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreakerBuilder {
    /// Consecutive failures before opening (default 5).
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Half-open successes before closing (default 2).
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// How long the circuit stays open before the next probe (default 30 s).
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Where events go while the circuit is open.
    pub fn fallback<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.fallback = Some(Box::new(sink));
        self
    }

    /// Called on every state transition with `(from, to)`.
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(f));
        self
    }

    /// Builds the breaker.
    pub fn build(self) -> CircuitBreakerSink {
        CircuitBreakerSink {
            inner: self.inner,
            fallback: self.fallback,
            on_state_change: self.on_state_change,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            reset_timeout: self.reset_timeout,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }
}

/// The circuit breaker sink. See the module docs.
pub struct CircuitBreakerSink {
    inner: Box<dyn Sink>,
    fallback: Option<Box<dyn Sink>>,
    on_state_change: Option<StateCallback>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<State>,
}

impl CircuitBreakerSink {
    /// Wraps a sink with the default thresholds.
    pub fn wrap<S: Sink + 'static>(inner: S) -> CircuitBreakerSink {
        Self::builder(inner).build()
    }

    /// Starts configuring a breaker around `inner`.
    pub fn builder<S: Sink + 'static>(inner: S) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            inner: Box::new(inner),
            fallback: None,
            on_state_change: None,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }

    /// The current state.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    fn transition(&self, state: &mut State, to: CircuitState) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;
        match to {
            CircuitState::Open => {
                state.opened_at = Some(Instant::now());
                state.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
                state.opened_at = None;
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes = 0;
            }
        }
        crate::selflog!("circuit breaker {:?} -> {:?}", from, to);
        if let Some(callback) = &self.on_state_change {
            callback(from, to);
        }
    }

    fn divert(&self, event: &LogEvent) -> Result<(), SinkError> {
        match &self.fallback {
            Some(fallback) => fallback.emit(event),
            None => Err(SinkError::CircuitOpen),
        }
    }

    fn record_success(&self, state: &mut State) {
        match state.state {
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.success_threshold {
                    self.transition(state, CircuitState::Closed);
                }
            }
            CircuitState::Open => (),
        }
    }

    fn record_failure(&self, state: &mut State) {
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.failure_threshold {
                    self.transition(state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition(state, CircuitState::Open),
            CircuitState::Open => state.opened_at = Some(Instant::now()),
        }
    }
}

impl Sink for CircuitBreakerSink {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.state == CircuitState::Open {
            let elapsed = state
                .opened_at
                .map_or(true, |at| at.elapsed() >= self.reset_timeout);
            if elapsed {
                self.transition(&mut state, CircuitState::HalfOpen);
            } else {
                drop(state);
                return self.divert(event);
            }
        }

        // A sink that knows it is down saves us the emit.
        if let Some(Err(e)) = self.inner.health_check() {
            crate::selflog!("circuit breaker health check failed: {}", e);
            self.record_failure(&mut state);
            let opened = state.state == CircuitState::Open;
            drop(state);
            return if opened { self.divert(event) } else { Err(e) };
        }

        match self.inner.emit(event) {
            Ok(()) => {
                self.record_success(&mut state);
                Ok(())
            }
            Err(e) => {
                self.record_failure(&mut state);
                let opened = state.state == CircuitState::Open;
                drop(state);
                if opened {
                    // The event that tripped the breaker still deserves the fallback.
                    let _ = self.divert(event);
                }
                Err(e)
            }
        }
    }

    fn flush(&self) {
        self.inner.flush();
        if let Some(fallback) = &self.fallback {
            fallback.flush();
        }
    }

    fn close(&self) -> Result<(), SinkError> {
        let result = self.inner.close();
        if let Some(fallback) = &self.fallback {
            let _ = fallback.close();
        }
        result
    }

    /// Open reports as an error; otherwise the wrapped sink's own answer (or healthy).
    fn health_check(&self) -> Option<Result<(), SinkError>> {
        if self.state() == CircuitState::Open {
            return Some(Err(SinkError::CircuitOpen));
        }
        self.inner.health_check().or(Some(Ok(())))
    }
}
