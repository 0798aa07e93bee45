//! # Aegis SLO
//!
//! Service-level objectives for AI agent fleets:
//!
//! - Seven built-in SLI variants plus custom indicators with a declared
//!   target orientation
//! - Windowed aggregation with expiring samples (mean / nearest-rank
//!   percentile / max)
//! - Error budgets with multi-window burn-rate alerting
//! - Composite SLO evaluation emitting breach signals on status crossings
//! - Declarative SLO / rollout spec documents with shallow-merge inheritance

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod budget;
pub mod indicator;
pub mod objective;
pub mod registry;
pub mod spec;

pub use budget::{BurnRateAlert, ErrorBudget, ErrorBudgetConfig, ExhaustionAction};
pub use indicator::{Aggregation, Sli, SliKind, SliSnapshot, TargetOrientation};
pub use objective::{Slo, SloSnapshot, SloStatus};
pub use registry::SliRegistry;
pub use spec::{
    resolve_inheritance, ErrorBudgetPolicy, IndicatorSpec, RolloutSpec, RolloutStepSpec, SloSpec,
    ThresholdSpec, VersionRef,
};
