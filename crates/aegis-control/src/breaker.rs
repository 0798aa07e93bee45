//! Per-agent circuit breakers with cascade detection.
//!
//! CLOSED counts consecutive failures; at the threshold the breaker opens
//! and rejects calls (honoring a fallback) until the recovery timeout has
//! elapsed since `opened_at`. HALF_OPEN admits a bounded number of trial
//! calls: one success closes the circuit, one failure reopens it with a
//! fresh `opened_at`.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aegis_core::bus::SignalBus;
use aegis_core::clock::SharedClock;
use aegis_core::signal::{Severity, Signal, SignalKind};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation; failures are counted
    Closed,
    /// All calls rejected until the recovery timeout elapses
    Open,
    /// Bounded trial calls probe for recovery
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open and no fallback was supplied.
    Open {
        /// Agent whose breaker rejected the call
        agent_id: String,
        /// Seconds until a trial call is admitted
        retry_after_secs: f64,
    },
    /// The wrapped call itself failed (and was counted).
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open {
                agent_id,
                retry_after_secs,
            } => write!(
                f,
                "circuit open for agent '{agent_id}', retry after {retry_after_secs:.1}s"
            ),
            Self::Inner(e) => write!(f, "call failed: {e}"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for BreakerError<E> {}

/// Breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before admitting trials
    pub recovery_timeout_secs: f64,
    /// Trial calls admitted while half-open
    pub half_open_max_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30.0,
            half_open_max_trials: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    half_open_trials: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// Per-agent three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    agent_id: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker for an agent.
    pub fn new(agent_id: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            agent_id: agent_id.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_trials: 0,
                opened_at: None,
            }),
        }
    }

    /// Agent this breaker protects.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Current state, applying the OPEN -> HALF_OPEN timeout transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().unwrap().failure_count
    }

    /// Execute `f` through the breaker. In OPEN the fallback is returned
    /// when supplied, otherwise [`BreakerError::Open`]; in HALF_OPEN up to
    /// `half_open_max_trials` calls are admitted; in CLOSED the call runs
    /// normally. The outcome updates breaker state.
    pub fn call<T, E, F>(&self, f: F, fallback: Option<T>) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        {
            let mut inner = self.inner.lock().unwrap();
            self.maybe_half_open(&mut inner);

            match inner.state {
                CircuitState::Open => {
                    return match fallback {
                        Some(value) => Ok(value),
                        None => Err(BreakerError::Open {
                            agent_id: self.agent_id.clone(),
                            retry_after_secs: self.retry_after(&inner),
                        }),
                    };
                }
                CircuitState::HalfOpen => {
                    if inner.half_open_trials >= self.config.half_open_max_trials {
                        return match fallback {
                            Some(value) => Ok(value),
                            None => Err(BreakerError::Open {
                                agent_id: self.agent_id.clone(),
                                retry_after_secs: 0.0,
                            }),
                        };
                    }
                    inner.half_open_trials += 1;
                }
                CircuitState::Closed => {}
            }
        }

        // The call runs outside the lock.
        match f() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::HalfOpen {
            info!(agent = %self.agent_id, "trial succeeded, circuit closed");
            self.transition(&mut inner, CircuitState::Closed);
        }
        inner.failure_count = 0;
        inner.success_count += 1;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        if inner.state == CircuitState::HalfOpen {
            warn!(agent = %self.agent_id, "trial failed, circuit reopened");
            self.transition(&mut inner, CircuitState::Open);
        } else if inner.state == CircuitState::Closed
            && inner.failure_count >= self.config.failure_threshold
        {
            warn!(
                agent = %self.agent_id,
                failures = inner.failure_count,
                "failure threshold reached, circuit opened"
            );
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// Force the breaker back to CLOSED, clearing all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count = 0;
        inner.half_open_trials = 0;
        inner.opened_at = None;
        inner.state = CircuitState::Closed;
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = inner.opened_at {
            let elapsed = (self.clock.now() - opened_at).num_milliseconds() as f64 / 1_000.0;
            if elapsed >= self.config.recovery_timeout_secs {
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitState) {
        metrics::counter!(
            "aegis_breaker_transitions_total",
            "agent" => self.agent_id.clone()
        )
        .increment(1);
        inner.state = next;
        match next {
            CircuitState::Open => inner.opened_at = Some(self.clock.now()),
            CircuitState::HalfOpen => inner.half_open_trials = 0,
            CircuitState::Closed => inner.opened_at = None,
        }
    }

    fn retry_after(&self, inner: &BreakerInner) -> f64 {
        match inner.opened_at {
            Some(opened_at) => {
                let elapsed = (self.clock.now() - opened_at).num_milliseconds() as f64 / 1_000.0;
                (self.config.recovery_timeout_secs - elapsed).max(0.0)
            }
            None => 0.0,
        }
    }
}

/// Watches a named set of breakers and publishes a signal when enough of
/// them are open simultaneously.
#[derive(Debug)]
pub struct CascadeDetector {
    cascade_threshold: usize,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    bus: Arc<SignalBus>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    cascade_active: Mutex<bool>,
}

impl CascadeDetector {
    /// Create a detector over an initial agent set.
    pub fn new(
        agents: &[&str],
        cascade_threshold: usize,
        config: CircuitBreakerConfig,
        bus: Arc<SignalBus>,
        clock: SharedClock,
    ) -> Self {
        let breakers = DashMap::new();
        for agent in agents {
            breakers.insert(
                agent.to_string(),
                Arc::new(CircuitBreaker::new(*agent, config.clone(), clock.clone())),
            );
        }
        Self {
            cascade_threshold,
            config,
            clock,
            bus,
            breakers,
            cascade_active: Mutex::new(false),
        }
    }

    /// The breaker for an agent, creating one on first use.
    pub fn breaker(&self, agent_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    agent_id,
                    self.config.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// Agents whose circuits are currently open.
    pub fn open_agents(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|entry| entry.value().state() == CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Whether a cascade is in progress. Publishes one `CascadeFailure`
    /// signal per onset; the flag clears when the cascade subsides.
    pub fn check_cascade(&self) -> bool {
        let open = self.open_agents();
        let detected = open.len() >= self.cascade_threshold;
        let mut active = self.cascade_active.lock().unwrap();
        if detected && !*active {
            warn!(open = open.len(), threshold = self.cascade_threshold, "cascade detected");
            metrics::counter!("aegis_cascades_detected_total").increment(1);
            self.bus.publish(
                Signal::new(
                    SignalKind::CascadeFailure,
                    open.join(","),
                    Severity::Critical,
                    format!("{} circuit breakers open simultaneously", open.len()),
                    self.clock.now(),
                )
                .with_dedup_key("cascade:breakers")
                .with_metadata("open_agents", serde_json::json!(open)),
            );
        }
        *active = detected;
        detected
    }

    /// Reset every breaker.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
        *self.cascade_active.lock().unwrap() = false;
    }
}
