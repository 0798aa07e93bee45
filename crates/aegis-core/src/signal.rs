//! Reliability signal model.
//!
//! Signals are the typed events exchanged between subsystems: SLO engines
//! and the cost guard publish them, the incident detector correlates them.
//! They are immutable once published and carry no back-references; the
//! `source_agent` / `dedup_key` strings are the only linking primitive.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signal categories recognized by the incident detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// An SLO entered CRITICAL status
    SloBreach,
    /// An error budget is fully consumed
    ErrorBudgetExhausted,
    /// Cost guard detected anomalous spend or tripped the kill switch
    CostAnomaly,
    /// A policy check failed
    PolicyViolation,
    /// An agent's trust grant was revoked
    TrustRevocation,
    /// Latency degraded sharply
    LatencySpike,
    /// Tool call failures spiked
    ToolFailureSpike,
    /// Multiple circuit breakers opened simultaneously
    CascadeFailure,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SloBreach => "slo_breach",
            Self::ErrorBudgetExhausted => "error_budget_exhausted",
            Self::CostAnomaly => "cost_anomaly",
            Self::PolicyViolation => "policy_violation",
            Self::TrustRevocation => "trust_revocation",
            Self::LatencySpike => "latency_spike",
            Self::ToolFailureSpike => "tool_failure_spike",
            Self::CascadeFailure => "cascade_failure",
        };
        write!(f, "{s}")
    }
}

/// Severity attached to signals and cost alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Info,
    /// Needs attention
    Warn,
    /// Needs immediate attention
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A typed reliability event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal id
    pub id: Uuid,
    /// Signal category
    pub kind: SignalKind,
    /// Agent (or SLO owner) this signal concerns
    pub source_agent: String,
    /// Severity
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Structured context
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Optional suppression key; identical keys within the correlation
    /// window collapse into one incident entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

impl Signal {
    /// Create a signal with empty metadata and no dedup key.
    pub fn new(
        kind: SignalKind,
        source_agent: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source_agent: source_agent.into(),
            severity,
            message: message.into(),
            metadata: HashMap::new(),
            timestamp,
            dedup_key: None,
        }
    }

    /// Attach a dedup key.
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The dedup key minus its final `:`-separated segment, used for
    /// correlation across related signals (`agent:slo:critical` and
    /// `agent:slo:exhausted` share the prefix `agent:slo`).
    pub fn dedup_prefix(&self) -> Option<&str> {
        let key = self.dedup_key.as_deref()?;
        key.rfind(':').map(|idx| &key[..idx])
    }
}
