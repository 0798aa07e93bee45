//! # Aegis Core
//!
//! Shared primitives for the agent-aegis reliability control plane:
//!
//! - Injectable clock abstraction (wall-clock timestamps, monotonic durations)
//! - Expiring sample windows for SLI aggregation
//! - The reliability signal model and a bounded signal bus
//! - The push-style telemetry sink interface for framework adapters
//! - The shared error taxonomy
//!
//! Every owning entity in the control plane serializes its own mutations;
//! nothing in this crate takes a global lock.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod bus;
pub mod clock;
pub mod error;
pub mod metric;
pub mod signal;
pub mod telemetry;
pub mod window;

pub use bus::SignalBus;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Error, Result};
pub use metric::Comparator;
pub use signal::{Severity, Signal, SignalKind};
pub use telemetry::TelemetrySink;
pub use window::{Sample, SampleWindow, TimeWindow};
