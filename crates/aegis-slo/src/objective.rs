//! Service Level Objectives.
//!
//! An SLO is a named set of SLIs plus an error budget. `evaluate()` derives
//! the composite status and, on each transition into CRITICAL or EXHAUSTED,
//! publishes exactly one breach signal, one per crossing, not per
//! evaluation.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aegis_core::bus::SignalBus;
use aegis_core::clock::SharedClock;
use aegis_core::error::{Error, Result};
use aegis_core::signal::{Severity, Signal, SignalKind};

use crate::budget::{ErrorBudget, ErrorBudgetConfig, ErrorBudgetSnapshot};
use crate::indicator::{Sli, SliSnapshot, TargetOrientation};

/// Composite SLO health, ordered by severity:
/// `Healthy < Warning < Critical < Exhausted < Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SloStatus {
    /// Within budget, no alerts firing
    Healthy,
    /// Burn rate elevated or compliance slipping
    Warning,
    /// Burn rate critical or an indicator breaching its target
    Critical,
    /// Error budget fully consumed
    Exhausted,
    /// Insufficient data to judge
    Unknown,
}

impl std::fmt::Display for SloStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Exhausted => "exhausted",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Serializable SLO state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloSnapshot {
    /// SLO name
    pub name: String,
    /// Owning agent
    pub agent_id: String,
    /// Description
    pub description: String,
    /// Composite status at snapshot time
    pub status: SloStatus,
    /// Labels
    pub labels: BTreeMap<String, String>,
    /// Budget state
    pub error_budget: ErrorBudgetSnapshot,
    /// Per-indicator summaries
    pub indicators: Vec<SliSnapshot>,
}

/// A named set of SLIs plus an error budget.
pub struct Slo {
    name: String,
    agent_id: String,
    description: String,
    labels: BTreeMap<String, String>,
    indicators: Vec<Arc<Sli>>,
    budget: ErrorBudget,
    bus: Arc<SignalBus>,
    clock: SharedClock,
    /// Fraction subtracted from a lower-bound target before compliance is
    /// considered degraded enough to warn (0.0 = warn as soon as
    /// compliance drops below target).
    compliance_margin: f64,
    last_status: Mutex<Option<SloStatus>>,
}

impl std::fmt::Debug for Slo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slo")
            .field("name", &self.name)
            .field("agent_id", &self.agent_id)
            .field("indicators", &self.indicators.len())
            .finish()
    }
}

impl Slo {
    /// Create an SLO. Indicator names must be unique; when no budget is
    /// supplied one is derived as `1 - min(targets of lower-bound SLIs)`
    /// over the default 30-day window.
    pub fn new(
        name: impl Into<String>,
        agent_id: impl Into<String>,
        indicators: Vec<Arc<Sli>>,
        budget: Option<ErrorBudget>,
        bus: Arc<SignalBus>,
        clock: SharedClock,
    ) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::new();
        for sli in &indicators {
            if !seen.insert(sli.name().to_string()) {
                return Err(Error::config(format!(
                    "duplicate indicator name '{}' in SLO '{name}'",
                    sli.name()
                )));
            }
        }

        let budget = match budget {
            Some(b) => b,
            None => {
                let derived_total = indicators
                    .iter()
                    .filter(|s| s.orientation() == TargetOrientation::LowerBound)
                    .map(|s| 1.0 - s.target())
                    .fold(f64::INFINITY, f64::min);
                let total = if derived_total.is_finite() {
                    derived_total
                } else {
                    ErrorBudgetConfig::default().total
                };
                ErrorBudget::new(
                    ErrorBudgetConfig {
                        total,
                        ..ErrorBudgetConfig::default()
                    },
                    clock.clone(),
                )?
            }
        };

        info!(slo = %name, indicators = indicators.len(), budget_total = budget.total(), "SLO created");

        Ok(Self {
            name,
            agent_id: agent_id.into(),
            description: String::new(),
            labels: BTreeMap::new(),
            indicators,
            budget,
            bus,
            clock,
            compliance_margin: 0.0,
            last_status: Mutex::new(None),
        })
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the compliance warning margin.
    pub fn with_compliance_margin(mut self, margin: f64) -> Self {
        self.compliance_margin = margin;
        self
    }

    /// SLO name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning agent.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Indicators in this SLO.
    pub fn indicators(&self) -> &[Arc<Sli>] {
        &self.indicators
    }

    /// Look up an indicator by name.
    pub fn indicator(&self, name: &str) -> Option<&Arc<Sli>> {
        self.indicators.iter().find(|s| s.name() == name)
    }

    /// The error budget.
    pub fn budget(&self) -> &ErrorBudget {
        &self.budget
    }

    /// Record a good or bad event against the budget.
    pub fn record_event(&self, good: bool) {
        self.budget.record_event(good);
    }

    /// Evaluate the composite status and emit breach signals on crossings.
    pub fn evaluate(&self) -> SloStatus {
        let status = self.compute_status();
        self.emit_on_transition(status);
        metrics::gauge!("aegis_slo_status", "slo" => self.name.clone())
            .set(status as u8 as f64);
        status
    }

    fn compute_status(&self) -> SloStatus {
        if self.budget.is_exhausted() {
            return SloStatus::Exhausted;
        }

        let firing = self.budget.firing_alerts();
        let burn_critical = firing.iter().any(|a| a.severity == Severity::Critical);
        let burn_warn = firing.iter().any(|a| a.severity == Severity::Warn);

        let mut any_breaching = false;
        let mut any_missing = false;
        let mut any_compliance_slipping = false;
        for sli in &self.indicators {
            match sli.is_meeting_target() {
                Some(false) => any_breaching = true,
                Some(true) => {}
                None => any_missing = true,
            }
            // Compliance degradation only makes sense against rate-like
            // lower-bound targets; latency/cost targets are not fractions.
            if sli.orientation() == TargetOrientation::LowerBound && sli.target() <= 1.0 {
                if let Some(compliance) = sli.compliance_fraction() {
                    if compliance < sli.target() - self.compliance_margin {
                        any_compliance_slipping = true;
                    }
                }
            }
        }

        if burn_critical || any_breaching {
            return SloStatus::Critical;
        }
        if any_missing {
            return SloStatus::Unknown;
        }
        if burn_warn || any_compliance_slipping {
            return SloStatus::Warning;
        }
        SloStatus::Healthy
    }

    fn emit_on_transition(&self, status: SloStatus) {
        let mut last = self.last_status.lock().unwrap();
        let previous = *last;
        *last = Some(status);
        if previous == Some(status) {
            return;
        }

        let kind = match status {
            SloStatus::Critical => SignalKind::SloBreach,
            SloStatus::Exhausted => SignalKind::ErrorBudgetExhausted,
            _ => return,
        };

        let dedup_key = format!("{}:{}:{}", self.agent_id, self.name, status);
        let message = match status {
            SloStatus::Critical => format!("SLO '{}' entered critical status", self.name),
            _ => format!(
                "error budget exhausted for SLO '{}' (action: {})",
                self.name,
                self.budget.exhaustion_action()
            ),
        };
        warn!(slo = %self.name, agent = %self.agent_id, %status, "SLO breach signal emitted");
        metrics::counter!("aegis_slo_breach_signals_total", "slo" => self.name.clone())
            .increment(1);

        let signal = Signal::new(
            kind,
            self.agent_id.clone(),
            Severity::Critical,
            message,
            self.clock.now(),
        )
        .with_dedup_key(dedup_key)
        .with_metadata("slo", serde_json::json!(self.name))
        .with_metadata(
            "exhaustion_action",
            serde_json::json!(self.budget.exhaustion_action().to_string()),
        );
        self.bus.publish(signal);
    }

    /// Serializable state.
    pub fn snapshot(&self) -> SloSnapshot {
        SloSnapshot {
            name: self.name.clone(),
            agent_id: self.agent_id.clone(),
            description: self.description.clone(),
            status: self.compute_status(),
            labels: self.labels.clone(),
            error_budget: self.budget.snapshot(),
            indicators: self.indicators.iter().map(|s| s.snapshot()).collect(),
        }
    }
}
