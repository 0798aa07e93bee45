//! Chaos experiments: fault injection with safety aborts and resilience
//! scoring.
//!
//! An experiment moves `PENDING -> RUNNING -> (COMPLETED | ABORTED)`. Abort
//! is immediate and deterministic: the first matching abort condition ends
//! the run, and subsequent fault injections are no-ops. Experiments also
//! self-terminate once `start_time + duration` has passed.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use aegis_core::clock::SharedClock;
use aegis_core::error::{Error, Result};
use aegis_core::metric::Comparator;

/// Kinds of injectable faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Added latency on tool or LLM calls
    LatencyInjection,
    /// Forced errors on tool calls
    ErrorInjection,
    /// Forced timeouts
    TimeoutInjection,
    /// Tool responses with an unexpected schema
    ToolSchemaDrift,
    /// Delegated tasks rejected by downstream agents
    DelegationReject,
    /// Credentials expiring mid-run
    CredentialExpire,
    /// Multiplied per-call cost
    CostSpike,
    /// Degraded LLM response quality
    LlmDegradation,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LatencyInjection => "latency_injection",
            Self::ErrorInjection => "error_injection",
            Self::TimeoutInjection => "timeout_injection",
            Self::ToolSchemaDrift => "tool_schema_drift",
            Self::DelegationReject => "delegation_reject",
            Self::CredentialExpire => "credential_expire",
            Self::CostSpike => "cost_spike",
            Self::LlmDegradation => "llm_degradation",
        };
        write!(f, "{s}")
    }
}

/// A fault to inject: kind, target, affected-call rate, and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    /// Fault kind
    pub kind: FaultKind,
    /// Tool name, agent id, or provider the fault applies to
    pub target: String,
    /// Fraction of calls affected (clamped to [0, 1])
    pub rate: f64,
    /// Kind-specific parameters
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, serde_json::Value>,
}

impl Fault {
    /// Build a fault, clamping the rate into [0, 1].
    pub fn new(kind: FaultKind, target: impl Into<String>, rate: f64) -> Self {
        Self {
            kind,
            target: target.into(),
            rate: rate.clamp(0.0, 1.0),
            params: HashMap::new(),
        }
    }

    /// Attach a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Added latency on a target.
    pub fn latency(target: impl Into<String>, delay_ms: u64, rate: f64) -> Self {
        Self::new(FaultKind::LatencyInjection, target, rate)
            .with_param("delay_ms", serde_json::json!(delay_ms))
    }

    /// Forced errors on a target.
    pub fn error(target: impl Into<String>, error: &str, rate: f64) -> Self {
        Self::new(FaultKind::ErrorInjection, target, rate)
            .with_param("error", serde_json::json!(error))
    }

    /// Forced timeouts on a target.
    pub fn timeout(target: impl Into<String>, timeout_ms: u64, rate: f64) -> Self {
        Self::new(FaultKind::TimeoutInjection, target, rate)
            .with_param("timeout_ms", serde_json::json!(timeout_ms))
    }

    /// Tool schema drift on a target.
    pub fn tool_schema_drift(target: impl Into<String>, rate: f64) -> Self {
        Self::new(FaultKind::ToolSchemaDrift, target, rate)
    }

    /// Delegation rejections from an agent.
    pub fn delegation_reject(target: impl Into<String>, rate: f64) -> Self {
        Self::new(FaultKind::DelegationReject, target, rate)
    }

    /// Expired credentials for an agent.
    pub fn credential_expire(target: impl Into<String>) -> Self {
        Self::new(FaultKind::CredentialExpire, target, 1.0)
    }

    /// Multiplied cost on a target.
    pub fn cost_spike(target: impl Into<String>, multiplier: f64) -> Self {
        Self::new(FaultKind::CostSpike, target, 1.0)
            .with_param("multiplier", serde_json::json!(multiplier))
    }

    /// Degraded LLM quality on a provider.
    pub fn llm_degradation(target: impl Into<String>, quality: f64, rate: f64) -> Self {
        Self::new(FaultKind::LlmDegradation, target, rate)
            .with_param("quality", serde_json::json!(quality))
    }
}

/// A safety condition that stops the experiment when a live metric crosses
/// its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortCondition {
    /// Metric name looked up in the supplied metric map
    pub metric: String,
    /// Threshold value
    pub threshold: f64,
    /// Comparison direction (Lte: abort when the metric drops to or below)
    pub comparator: Comparator,
}

impl AbortCondition {
    /// Build an abort condition.
    pub fn new(metric: impl Into<String>, threshold: f64, comparator: Comparator) -> Self {
        Self {
            metric: metric.into(),
            threshold,
            comparator,
        }
    }

    /// Whether the condition matches a metric value.
    pub fn should_abort(&self, value: f64) -> bool {
        self.comparator.evaluate(value, self.threshold)
    }
}

/// Experiment lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    /// Created, not started
    Pending,
    /// Faults are being injected
    Running,
    /// Ran to completion
    Completed,
    /// Stopped by a safety condition
    Aborted,
}

/// Record of one fault injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultEvent {
    /// Fault kind
    pub kind: FaultKind,
    /// Target it was applied to
    pub target: String,
    /// Whether the fault was actually applied (rate sampling may skip)
    pub applied: bool,
    /// Injection time
    pub timestamp: DateTime<Utc>,
    /// Adapter-specific detail
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

/// Composite resilience score, 0-100.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResilienceScore {
    /// Weighted overall score
    pub overall: f64,
    /// 100 * (under_chaos / baseline), clamped to [0, 100]
    pub fault_tolerance: f64,
    /// Recovery time fed into the score
    pub recovery_time_ms: f64,
    /// 100 * (1 - under_chaos / baseline)
    pub degradation_percent: f64,
    /// Optional cost increase during the fault
    pub cost_impact_percent: f64,
}

#[derive(Debug)]
struct ExperimentInner {
    state: ExperimentState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    abort_reason: Option<String>,
    events: Vec<FaultEvent>,
    resilience: Option<ResilienceScore>,
}

/// Serializable experiment summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    /// Experiment id
    pub id: Uuid,
    /// Name
    pub name: String,
    /// Target agent
    pub target_agent: String,
    /// Lifecycle state
    pub state: ExperimentState,
    /// Planned duration
    pub duration_secs: u64,
    /// Declared blast radius
    pub blast_radius: f64,
    /// Fault injections so far
    pub injection_count: usize,
    /// Abort reason, when aborted
    pub abort_reason: Option<String>,
    /// Resilience score, when computed
    pub resilience: Option<ResilienceScore>,
}

/// A chaos experiment against one agent.
#[derive(Debug)]
pub struct ChaosExperiment {
    id: Uuid,
    name: String,
    target_agent: String,
    faults: Vec<Fault>,
    duration_secs: u64,
    abort_conditions: Vec<AbortCondition>,
    blast_radius: f64,
    clock: SharedClock,
    inner: Mutex<ExperimentInner>,
}

impl ChaosExperiment {
    /// Create an experiment. Blast radius is clamped into [0, 1]; fault
    /// injection adapters must sample uniformly to honor it.
    pub fn new(
        name: impl Into<String>,
        target_agent: impl Into<String>,
        faults: Vec<Fault>,
        duration_secs: u64,
        abort_conditions: Vec<AbortCondition>,
        blast_radius: f64,
        clock: SharedClock,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            target_agent: target_agent.into(),
            faults,
            duration_secs,
            abort_conditions,
            blast_radius: blast_radius.clamp(0.0, 1.0),
            clock,
            inner: Mutex::new(ExperimentInner {
                state: ExperimentState::Pending,
                started_at: None,
                ended_at: None,
                abort_reason: None,
                events: Vec::new(),
                resilience: None,
            }),
        }
    }

    /// Experiment id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Experiment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target agent.
    pub fn target_agent(&self) -> &str {
        &self.target_agent
    }

    /// Declared faults.
    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    /// Declared blast radius cap.
    pub fn blast_radius(&self) -> f64 {
        self.blast_radius
    }

    /// Current state (applying self-expiry).
    pub fn state(&self) -> ExperimentState {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_expire(&mut inner);
        inner.state
    }

    /// Start the experiment.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ExperimentState::Pending {
            return Err(Error::state(format!(
                "experiment '{}' cannot start from {:?}",
                self.name, inner.state
            )));
        }
        inner.state = ExperimentState::Running;
        inner.started_at = Some(self.clock.now());
        info!(experiment = %self.name, agent = %self.target_agent, "chaos experiment started");
        metrics::counter!("aegis_chaos_experiments_started_total").increment(1);
        Ok(())
    }

    /// Record a fault injection. No-op unless the experiment is running.
    pub fn inject_fault(
        &self,
        fault: &Fault,
        applied: bool,
        details: Option<HashMap<String, serde_json::Value>>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_expire(&mut inner);
        if inner.state != ExperimentState::Running {
            return;
        }
        inner.events.push(FaultEvent {
            kind: fault.kind,
            target: fault.target.clone(),
            applied,
            timestamp: self.clock.now(),
            details: details.unwrap_or_else(|| fault.params.clone()),
        });
    }

    /// Evaluate abort conditions against live metrics. The first match
    /// aborts the experiment and returns true.
    pub fn check_abort(&self, metrics_map: &HashMap<String, f64>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_expire(&mut inner);
        if inner.state != ExperimentState::Running {
            return false;
        }
        for condition in &self.abort_conditions {
            if let Some(value) = metrics_map.get(&condition.metric) {
                if condition.should_abort(*value) {
                    let reason = format!(
                        "{} = {value} (threshold {})",
                        condition.metric, condition.threshold
                    );
                    warn!(experiment = %self.name, %reason, "chaos experiment aborted");
                    metrics::counter!("aegis_chaos_experiments_aborted_total").increment(1);
                    inner.state = ExperimentState::Aborted;
                    inner.ended_at = Some(self.clock.now());
                    inner.abort_reason = Some(reason);
                    return true;
                }
            }
        }
        false
    }

    /// Mark the experiment completed.
    pub fn complete(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ExperimentState::Running {
            return Err(Error::state(format!(
                "experiment '{}' cannot complete from {:?}",
                self.name, inner.state
            )));
        }
        inner.state = ExperimentState::Completed;
        inner.ended_at = Some(self.clock.now());
        Ok(())
    }

    /// Compute the resilience score from observed success rates:
    /// `fault_tolerance = 100 * (under_chaos / baseline)` clamped,
    /// `recovery = 100 * exp(-recovery_ms / 10_000)`, and
    /// `overall = 0.6 * fault_tolerance + 0.4 * recovery`. Works in any
    /// state so aborted runs can still be scored.
    pub fn calculate_resilience(
        &self,
        baseline: f64,
        under_chaos: f64,
        recovery_ms: f64,
        cost_impact_percent: Option<f64>,
    ) -> ResilienceScore {
        let fault_tolerance = if baseline > 0.0 {
            (100.0 * under_chaos / baseline).clamp(0.0, 100.0)
        } else {
            0.0
        };
        let recovery = 100.0 * (-recovery_ms / 10_000.0).exp();
        let overall = 0.6 * fault_tolerance + 0.4 * recovery;
        let degradation_percent = if baseline > 0.0 {
            (100.0 * (1.0 - under_chaos / baseline)).max(0.0)
        } else {
            0.0
        };

        let score = ResilienceScore {
            overall,
            fault_tolerance,
            recovery_time_ms: recovery_ms,
            degradation_percent,
            cost_impact_percent: cost_impact_percent.unwrap_or(0.0),
        };
        self.inner.lock().unwrap().resilience = Some(score.clone());
        score
    }

    /// Seconds elapsed since start (0 before start).
    pub fn elapsed_secs(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        match inner.started_at {
            Some(started) => {
                let end = inner.ended_at.unwrap_or_else(|| self.clock.now());
                (end - started).num_milliseconds().max(0) as f64 / 1_000.0
            }
            None => 0.0,
        }
    }

    /// Abort reason, when aborted.
    pub fn abort_reason(&self) -> Option<String> {
        self.inner.lock().unwrap().abort_reason.clone()
    }

    /// Fault events recorded so far.
    pub fn events(&self) -> Vec<FaultEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    /// Serializable summary.
    pub fn snapshot(&self) -> ExperimentSnapshot {
        let mut inner = self.inner.lock().unwrap();
        self.maybe_expire(&mut inner);
        ExperimentSnapshot {
            id: self.id,
            name: self.name.clone(),
            target_agent: self.target_agent.clone(),
            state: inner.state,
            duration_secs: self.duration_secs,
            blast_radius: self.blast_radius,
            injection_count: inner.events.len(),
            abort_reason: inner.abort_reason.clone(),
            resilience: inner.resilience.clone(),
        }
    }

    /// Running experiments self-terminate at `start + duration`.
    fn maybe_expire(&self, inner: &mut ExperimentInner) {
        if inner.state != ExperimentState::Running {
            return;
        }
        if let Some(started) = inner.started_at {
            let elapsed = (self.clock.now() - started).num_seconds();
            if elapsed >= self.duration_secs as i64 {
                inner.state = ExperimentState::Completed;
                inner.ended_at = Some(started + chrono::Duration::seconds(self.duration_secs as i64));
            }
        }
    }
}
