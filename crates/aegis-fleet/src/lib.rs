//! # Aegis Fleet
//!
//! Registry for the agents under management: registration with tags,
//! heartbeat freshness, per-agent event counters, and fleet-wide health
//! rollups. The optional per-agent SLO reference keeps budget accounting
//! in lockstep with recorded events.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod registry;
pub mod sink;

pub use registry::{
    AgentHealth, AgentHealthState, FleetConfig, FleetManager, FleetStatus, TagRollup,
};
pub use sink::PlaneSink;
