//! # Aegis Control
//!
//! The control-action half of the reliability loop:
//!
//! - Chaos experiments with safety aborts, a blast-radius cap, and
//!   resilience scoring, plus a library of pre-built templates
//! - Progressive delivery: a canary rollout state machine with analysis
//!   gates, continuous rollback conditions, and shadow sessions
//! - Per-agent circuit breakers with cascade detection

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod breaker;
pub mod chaos;
pub mod library;
pub mod rollout;
pub mod shadow;

pub use breaker::{
    BreakerError, CascadeDetector, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use chaos::{
    AbortCondition, ChaosExperiment, ExperimentState, Fault, FaultEvent, FaultKind,
    ResilienceScore,
};
pub use library::{ChaosLibrary, ExperimentTemplate, TemplateOverrides};
pub use rollout::{
    AnalysisCriterion, RollbackCondition, Rollout, RolloutEvent, RolloutEventKind, RolloutState,
    RolloutStep,
};
pub use shadow::{ShadowComparison, ShadowSession};
