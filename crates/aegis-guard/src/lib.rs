//! # Aegis Guard
//!
//! Cost enforcement for agent fleets: per-task and per-agent daily limits,
//! an org-wide monthly ceiling, throttle/kill escalation, and advisory
//! anomaly detection over the recent cost stream.
//!
//! Anomalies never block tasks and never consume error budget: they
//! surface as alerts and `CostAnomaly` signals only.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod anomaly;
pub mod guard;

pub use anomaly::{
    AnomalyMethod, AnomalyResult, BaselineStats, CostAnomalyDetector, DetectorConfig,
};
pub use guard::{
    AgentBudgetSnapshot, BudgetAction, CostAlert, CostGuard, CostGuardConfig, CostRecord,
    ReasonCode,
};
