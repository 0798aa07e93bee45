//! Error taxonomy shared across the control plane.
//!
//! Only hard failures surface here. Soft conditions are expressed as typed
//! returns instead: insufficient data is `None`, a refused cost check is
//! `(false, ReasonCode)`, and a failed channel delivery is recorded on the
//! per-channel result.

use thiserror::Error;

/// Control-plane error type
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Illegal target, out-of-range weight, non-monotonic steps, etc.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Wrong state-machine transition; state is left unchanged.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A circuit breaker rejected the call.
    #[error("circuit open for agent '{agent_id}', retry after {retry_after_secs:.1}s")]
    CircuitOpen {
        /// Agent whose breaker is open
        agent_id: String,
        /// Seconds until the breaker admits a trial call
        retry_after_secs: f64,
    },

    /// A channel send failed. Never fails the overall dispatch.
    #[error("delivery failed on channel '{channel}': {reason}")]
    DeliveryFailed {
        /// Channel name
        channel: String,
        /// Failure detail
        reason: String,
    },

    /// Detected data corruption; the entity refuses further writes.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl Error {
    /// Build an [`Error::InvalidConfig`]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Build an [`Error::InvalidState`]
    pub fn state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Build an [`Error::InternalInvariant`]
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InternalInvariant(msg.into())
    }
}

/// Result alias used throughout the workspace
pub type Result<T> = std::result::Result<T, Error>;
