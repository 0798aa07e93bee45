//! Progressive delivery: the canary rollout state machine.
//!
//! ```text
//! PENDING -> IN_PROGRESS -> (PAUSED <-> IN_PROGRESS) -> (ROLLED_BACK | PROMOTED)
//! ```
//!
//! A step is ready to advance when its dwell time has elapsed, every
//! analysis criterion passes against the supplied metrics, and any manual
//! gate has been approved. Rollback conditions are evaluated continuously
//! and take precedence over advancement. ROLLED_BACK and PROMOTED are
//! terminal; all further transitions fail with `InvalidState` and leave
//! the rollout unchanged.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use aegis_core::clock::SharedClock;
use aegis_core::error::{Error, Result};
use aegis_core::metric::Comparator;
use aegis_slo::spec::{RolloutSpec, VersionRef};

/// Rollout lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    /// Created, not started
    Pending,
    /// Actively shifting traffic
    InProgress,
    /// Held by an operator; step index unchanged
    Paused,
    /// Terminal: candidate withdrawn
    RolledBack,
    /// Terminal: candidate serving 100%
    Promoted,
}

impl RolloutState {
    fn is_terminal(self) -> bool {
        matches!(self, RolloutState::RolledBack | RolloutState::Promoted)
    }
}

/// A metric gate a step must pass before advancing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCriterion {
    /// Metric name
    pub metric: String,
    /// Threshold
    pub threshold: f64,
    /// Comparison direction
    pub comparator: Comparator,
}

impl AnalysisCriterion {
    /// Whether a metric value passes this gate.
    pub fn passes(&self, value: f64) -> bool {
        self.comparator.evaluate(value, self.threshold)
    }
}

/// A condition that triggers automatic rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackCondition {
    /// Metric name
    pub metric: String,
    /// Threshold
    pub threshold: f64,
    /// Comparison direction (Gte: roll back when the metric reaches it)
    pub comparator: Comparator,
}

impl RollbackCondition {
    /// Whether a metric value triggers rollback.
    pub fn triggers(&self, value: f64) -> bool {
        self.comparator.evaluate(value, self.threshold)
    }
}

/// One step of a rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutStep {
    /// Step name
    pub name: String,
    /// Candidate traffic fraction in [0, 1]
    pub weight: f64,
    /// Minimum dwell time before the step may advance
    pub duration_secs: u64,
    /// Analysis gates
    pub analysis: Vec<AnalysisCriterion>,
    /// Whether an explicit approval is required
    pub manual_gate: bool,
}

impl RolloutStep {
    /// Build a plain step with no gates.
    pub fn new(name: impl Into<String>, weight: f64, duration_secs: u64) -> Self {
        Self {
            name: name.into(),
            weight,
            duration_secs,
            analysis: Vec::new(),
            manual_gate: false,
        }
    }

    /// Add an analysis gate.
    pub fn with_analysis(mut self, criterion: AnalysisCriterion) -> Self {
        self.analysis.push(criterion);
        self
    }

    /// Require manual approval.
    pub fn with_manual_gate(mut self) -> Self {
        self.manual_gate = true;
        self
    }
}

/// What happened during a rollout, for the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutEventKind {
    /// Rollout started
    Started,
    /// Entered a new step
    StepEntered,
    /// Analysis gates passed
    AnalysisPass,
    /// Analysis gates failed
    AnalysisFail,
    /// Manual gate approved
    Approved,
    /// Paused
    Paused,
    /// Resumed
    Resumed,
    /// Rolled back
    RolledBack,
    /// Promoted
    Promoted,
}

/// Rollout event log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutEvent {
    /// What happened
    pub kind: RolloutEventKind,
    /// When
    pub timestamp: DateTime<Utc>,
    /// Step index at the time
    pub step_index: usize,
    /// Free-form detail
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug)]
struct RolloutInner {
    state: RolloutState,
    step_index: usize,
    step_entered_at: Option<DateTime<Utc>>,
    approved: bool,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    rollback_reason: Option<String>,
    events: Vec<RolloutEvent>,
}

/// Serializable rollout summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutSnapshot {
    /// Rollout id
    pub id: Uuid,
    /// Rollout name
    pub name: String,
    /// Lifecycle state
    pub state: RolloutState,
    /// Current step index
    pub current_step_index: usize,
    /// Candidate traffic weight at the current step
    pub current_weight: f64,
    /// Rollback reason, when rolled back
    pub rollback_reason: Option<String>,
    /// Serving version
    pub current_version: VersionRef,
    /// Candidate version
    pub candidate_version: VersionRef,
}

/// A staged traffic shift from `current` to `candidate`.
#[derive(Debug)]
pub struct Rollout {
    id: Uuid,
    name: String,
    current_version: VersionRef,
    candidate_version: VersionRef,
    steps: Vec<RolloutStep>,
    rollback_conditions: Vec<RollbackCondition>,
    clock: SharedClock,
    inner: Mutex<RolloutInner>,
}

impl Rollout {
    /// Create a rollout. Weights must be non-decreasing and the final step
    /// must carry weight 1.0.
    pub fn new(
        name: impl Into<String>,
        current_version: VersionRef,
        candidate_version: VersionRef,
        steps: Vec<RolloutStep>,
        rollback_conditions: Vec<RollbackCondition>,
        clock: SharedClock,
    ) -> Result<Self> {
        let name = name.into();
        if steps.is_empty() {
            return Err(Error::config(format!("rollout '{name}' requires at least one step")));
        }
        let mut previous = 0.0_f64;
        for (idx, step) in steps.iter().enumerate() {
            if !(0.0..=1.0).contains(&step.weight) {
                return Err(Error::config(format!(
                    "rollout '{name}' step {idx} weight {} out of range",
                    step.weight
                )));
            }
            if step.weight < previous {
                return Err(Error::config(format!(
                    "rollout '{name}' weights must be non-decreasing (step {idx})"
                )));
            }
            previous = step.weight;
        }
        if (steps[steps.len() - 1].weight - 1.0).abs() > f64::EPSILON {
            return Err(Error::config(format!(
                "rollout '{name}' final step must carry weight 1.0"
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name,
            current_version,
            candidate_version,
            steps,
            rollback_conditions,
            clock,
            inner: Mutex::new(RolloutInner {
                state: RolloutState::Pending,
                step_index: 0,
                step_entered_at: None,
                approved: false,
                started_at: None,
                completed_at: None,
                rollback_reason: None,
                events: Vec::new(),
            }),
        })
    }

    /// Build a rollout from a declarative spec.
    pub fn from_spec(spec: &RolloutSpec, clock: SharedClock) -> Result<Self> {
        let steps = spec
            .steps
            .iter()
            .map(|s| RolloutStep {
                name: s.name.clone(),
                weight: s.weight,
                duration_secs: s.duration_seconds,
                analysis: s
                    .analysis
                    .iter()
                    .map(|a| AnalysisCriterion {
                        metric: a.metric.clone(),
                        threshold: a.threshold,
                        comparator: a.comparator,
                    })
                    .collect(),
                manual_gate: s.manual_gate,
            })
            .collect();
        let rollback_conditions = spec
            .rollback_conditions
            .iter()
            .map(|c| RollbackCondition {
                metric: c.metric.clone(),
                threshold: c.threshold,
                comparator: c.comparator,
            })
            .collect();
        Self::new(
            format!("{}-{}", spec.candidate.name, spec.candidate.version),
            spec.current.clone(),
            spec.candidate.clone(),
            steps,
            rollback_conditions,
            clock,
        )
    }

    /// Rollout id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Rollout name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RolloutState {
        self.inner.lock().unwrap().state
    }

    /// Index of the current step.
    pub fn current_step_index(&self) -> usize {
        self.inner.lock().unwrap().step_index
    }

    /// Candidate traffic weight right now (0 before start, 1 after promote).
    pub fn current_weight(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            RolloutState::Pending => 0.0,
            RolloutState::RolledBack => 0.0,
            RolloutState::Promoted => 1.0,
            _ => self.steps[inner.step_index].weight,
        }
    }

    /// Start the rollout at step 0.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != RolloutState::Pending {
            return Err(Error::state(format!(
                "rollout '{}' cannot start from {:?}",
                self.name, inner.state
            )));
        }
        let now = self.clock.now();
        inner.state = RolloutState::InProgress;
        inner.started_at = Some(now);
        inner.step_entered_at = Some(now);
        inner.approved = false;
        Self::log(&mut inner, RolloutEventKind::Started, now, String::new());
        Self::log(&mut inner, RolloutEventKind::StepEntered, now, self.steps[0].name.clone());
        info!(rollout = %self.name, "rollout started");
        metrics::counter!("aegis_rollouts_started_total").increment(1);
        Ok(())
    }

    /// Advance to the next step; past the final step the rollout promotes.
    /// Valid only while IN_PROGRESS.
    pub fn advance(&self) -> Result<RolloutState> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != RolloutState::InProgress {
            return Err(Error::state(format!(
                "rollout '{}' cannot advance from {:?}",
                self.name, inner.state
            )));
        }
        let now = self.clock.now();
        if inner.step_index + 1 >= self.steps.len() {
            inner.state = RolloutState::Promoted;
            inner.completed_at = Some(now);
            Self::log(&mut inner, RolloutEventKind::Promoted, now, String::new());
            info!(rollout = %self.name, "rollout promoted");
            metrics::counter!("aegis_rollouts_promoted_total").increment(1);
        } else {
            inner.step_index += 1;
            inner.step_entered_at = Some(now);
            inner.approved = false;
            let name = self.steps[inner.step_index].name.clone();
            Self::log(&mut inner, RolloutEventKind::StepEntered, now, name);
        }
        Ok(inner.state)
    }

    /// Pause an in-progress rollout. The step index is unchanged.
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != RolloutState::InProgress {
            return Err(Error::state(format!(
                "rollout '{}' cannot pause from {:?}",
                self.name, inner.state
            )));
        }
        inner.state = RolloutState::Paused;
        let now = self.clock.now();
        Self::log(&mut inner, RolloutEventKind::Paused, now, String::new());
        Ok(())
    }

    /// Resume a paused rollout.
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != RolloutState::Paused {
            return Err(Error::state(format!(
                "rollout '{}' cannot resume from {:?}",
                self.name, inner.state
            )));
        }
        inner.state = RolloutState::InProgress;
        let now = self.clock.now();
        Self::log(&mut inner, RolloutEventKind::Resumed, now, String::new());
        Ok(())
    }

    /// Roll back from any non-terminal state, recording the reason.
    pub fn rollback(&self, reason: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return Err(Error::state(format!(
                "rollout '{}' cannot roll back from {:?}",
                self.name, inner.state
            )));
        }
        let reason = reason.into();
        let now = self.clock.now();
        warn!(rollout = %self.name, %reason, "rollout rolled back");
        metrics::counter!("aegis_rollouts_rolled_back_total").increment(1);
        inner.state = RolloutState::RolledBack;
        inner.completed_at = Some(now);
        inner.rollback_reason = Some(reason.clone());
        Self::log(&mut inner, RolloutEventKind::RolledBack, now, reason);
        Ok(())
    }

    /// Promote immediately, skipping remaining steps. Valid while
    /// IN_PROGRESS.
    pub fn promote(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != RolloutState::InProgress {
            return Err(Error::state(format!(
                "rollout '{}' cannot promote from {:?}",
                self.name, inner.state
            )));
        }
        let now = self.clock.now();
        inner.state = RolloutState::Promoted;
        inner.completed_at = Some(now);
        Self::log(&mut inner, RolloutEventKind::Promoted, now, "explicit".to_string());
        metrics::counter!("aegis_rollouts_promoted_total").increment(1);
        Ok(())
    }

    /// External cancellation: rolls back with reason "cancelled".
    pub fn cancel(&self) -> Result<()> {
        self.rollback("cancelled")
    }

    /// Approve the current step's manual gate.
    pub fn approve(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != RolloutState::InProgress {
            return Err(Error::state(format!(
                "rollout '{}' cannot approve from {:?}",
                self.name, inner.state
            )));
        }
        inner.approved = true;
        let now = self.clock.now();
        let name = self.steps[inner.step_index].name.clone();
        Self::log(&mut inner, RolloutEventKind::Approved, now, name);
        Ok(())
    }

    /// Whether the current step is ready to advance: dwell time elapsed,
    /// every analysis criterion passing, and manual gate approved.
    pub fn step_ready(&self, metrics_map: &HashMap<String, f64>) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != RolloutState::InProgress {
            return Err(Error::state(format!(
                "rollout '{}' has no active step in {:?}",
                self.name, inner.state
            )));
        }
        let step = &self.steps[inner.step_index];
        let now = self.clock.now();

        let entered = inner.step_entered_at.unwrap_or(now);
        let dwell_elapsed =
            (now - entered).num_seconds() >= step.duration_secs as i64;
        if !dwell_elapsed {
            return Ok(false);
        }

        // A criterion with no live metric reading is treated as not yet
        // passing; deployments are gated, not blocked forever; callers
        // keep polling as data arrives.
        let analysis_pass = step
            .analysis
            .iter()
            .all(|c| metrics_map.get(&c.metric).is_some_and(|v| c.passes(*v)));
        let kind = if analysis_pass {
            RolloutEventKind::AnalysisPass
        } else {
            RolloutEventKind::AnalysisFail
        };
        Self::log(&mut inner, kind, now, step.name.clone());
        if !analysis_pass {
            return Ok(false);
        }

        if step.manual_gate && !inner.approved {
            return Ok(false);
        }
        Ok(true)
    }

    /// One control-loop tick: evaluate rollback conditions first (they take
    /// precedence), then advance if the step is ready. Returns the
    /// resulting state.
    pub fn evaluate(&self, metrics_map: &HashMap<String, f64>) -> Result<RolloutState> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return Ok(inner.state);
            }
        }
        for condition in &self.rollback_conditions {
            if let Some(value) = metrics_map.get(&condition.metric) {
                if condition.triggers(*value) {
                    self.rollback(format!(
                        "{} = {value} (threshold {})",
                        condition.metric, condition.threshold
                    ))?;
                    return Ok(RolloutState::RolledBack);
                }
            }
        }
        if self.state() == RolloutState::InProgress && self.step_ready(metrics_map)? {
            return self.advance();
        }
        Ok(self.state())
    }

    /// Rollback reason, when rolled back.
    pub fn rollback_reason(&self) -> Option<String> {
        self.inner.lock().unwrap().rollback_reason.clone()
    }

    /// Copy of the event log.
    pub fn events(&self) -> Vec<RolloutEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    /// Serializable summary.
    pub fn snapshot(&self) -> RolloutSnapshot {
        let inner = self.inner.lock().unwrap();
        let weight = match inner.state {
            RolloutState::Pending | RolloutState::RolledBack => 0.0,
            RolloutState::Promoted => 1.0,
            _ => self.steps[inner.step_index].weight,
        };
        RolloutSnapshot {
            id: self.id,
            name: self.name.clone(),
            state: inner.state,
            current_step_index: inner.step_index,
            current_weight: weight,
            rollback_reason: inner.rollback_reason.clone(),
            current_version: self.current_version.clone(),
            candidate_version: self.candidate_version.clone(),
        }
    }

    fn log(inner: &mut RolloutInner, kind: RolloutEventKind, now: DateTime<Utc>, detail: String) {
        inner.events.push(RolloutEvent {
            kind,
            timestamp: now,
            step_index: inner.step_index,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::clock::ManualClock;
    use std::sync::Arc;

    fn versions() -> (VersionRef, VersionRef) {
        (
            VersionRef {
                name: "chat-agent".to_string(),
                version: "v1".to_string(),
            },
            VersionRef {
                name: "chat-agent".to_string(),
                version: "v2".to_string(),
            },
        )
    }

    fn canary(clock: Arc<ManualClock>) -> Rollout {
        let (cur, cand) = versions();
        Rollout::new(
            "chat-v2",
            cur,
            cand,
            vec![
                RolloutStep::new("canary-5", 0.05, 60),
                RolloutStep::new("canary-25", 0.25, 60),
                RolloutStep::new("full", 1.0, 0),
            ],
            vec![RollbackCondition {
                metric: "error_rate".to_string(),
                threshold: 0.10,
                comparator: Comparator::Gte,
            }],
            clock,
        )
        .unwrap()
    }

    #[test]
    fn weight_validation() {
        let (cur, cand) = versions();
        let clock = ManualClock::shared();

        // Decreasing weights rejected.
        assert!(Rollout::new(
            "bad",
            cur.clone(),
            cand.clone(),
            vec![RolloutStep::new("a", 0.5, 60), RolloutStep::new("b", 0.25, 60)],
            vec![],
            clock.clone(),
        )
        .is_err());

        // Final weight must be 1.0.
        assert!(Rollout::new(
            "bad",
            cur.clone(),
            cand.clone(),
            vec![RolloutStep::new("a", 0.5, 60)],
            vec![],
            clock.clone(),
        )
        .is_err());

        // Out-of-range weight rejected.
        assert!(Rollout::new(
            "bad",
            cur,
            cand,
            vec![RolloutStep::new("a", 1.5, 60)],
            vec![],
            clock,
        )
        .is_err());
    }

    #[test]
    fn rollback_scenario() {
        let clock = ManualClock::shared();
        let rollout = canary(clock.clone());
        rollout.start().unwrap();
        assert_eq!(rollout.state(), RolloutState::InProgress);
        assert_eq!(rollout.current_weight(), 0.05);

        // error_rate 0.12 >= 0.10 triggers automatic rollback.
        let metrics_map = HashMap::from([("error_rate".to_string(), 0.12)]);
        let state = rollout.evaluate(&metrics_map).unwrap();
        assert_eq!(state, RolloutState::RolledBack);
        assert!(rollout.rollback_reason().unwrap().contains("error_rate"));
        assert_eq!(rollout.current_weight(), 0.0);

        // Terminal: advance fails with InvalidState, state unchanged.
        let err = rollout.advance().unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(rollout.state(), RolloutState::RolledBack);
    }

    #[test]
    fn rollback_takes_precedence_over_ready_step() {
        let clock = ManualClock::shared();
        let rollout = canary(clock.clone());
        rollout.start().unwrap();
        clock.advance_secs(61);

        // Step is ready, but the rollback condition also triggers.
        let metrics_map = HashMap::from([("error_rate".to_string(), 0.5)]);
        assert_eq!(rollout.evaluate(&metrics_map).unwrap(), RolloutState::RolledBack);
    }

    #[test]
    fn full_promotion_path() {
        let clock = ManualClock::shared();
        let rollout = canary(clock.clone());
        rollout.start().unwrap();
        let metrics_map = HashMap::from([("error_rate".to_string(), 0.01)]);

        // Dwell not elapsed yet: no movement.
        assert_eq!(rollout.evaluate(&metrics_map).unwrap(), RolloutState::InProgress);
        assert_eq!(rollout.current_step_index(), 0);

        clock.advance_secs(61);
        assert_eq!(rollout.evaluate(&metrics_map).unwrap(), RolloutState::InProgress);
        assert_eq!(rollout.current_step_index(), 1);
        assert_eq!(rollout.current_weight(), 0.25);

        clock.advance_secs(61);
        assert_eq!(rollout.evaluate(&metrics_map).unwrap(), RolloutState::InProgress);
        assert_eq!(rollout.current_step_index(), 2);

        // Final step has zero dwell: next tick promotes.
        assert_eq!(rollout.evaluate(&metrics_map).unwrap(), RolloutState::Promoted);
        assert_eq!(rollout.current_weight(), 1.0);

        // Terminal.
        assert!(rollout.evaluate(&metrics_map).is_ok());
        assert!(rollout.pause().is_err());
        assert!(rollout.rollback("late").is_err());
    }

    #[test]
    fn analysis_gate_blocks_advancement() {
        let clock = ManualClock::shared();
        let (cur, cand) = versions();
        let rollout = Rollout::new(
            "gated",
            cur,
            cand,
            vec![
                RolloutStep::new("canary", 0.1, 10).with_analysis(AnalysisCriterion {
                    metric: "success_rate".to_string(),
                    threshold: 0.99,
                    comparator: Comparator::Gte,
                }),
                RolloutStep::new("full", 1.0, 0),
            ],
            vec![],
            clock.clone(),
        )
        .unwrap();
        rollout.start().unwrap();
        clock.advance_secs(11);

        let failing = HashMap::from([("success_rate".to_string(), 0.95)]);
        assert_eq!(rollout.evaluate(&failing).unwrap(), RolloutState::InProgress);
        assert_eq!(rollout.current_step_index(), 0);

        // A missing metric also holds the gate.
        assert_eq!(rollout.evaluate(&HashMap::new()).unwrap(), RolloutState::InProgress);

        let passing = HashMap::from([("success_rate".to_string(), 0.995)]);
        assert_eq!(rollout.evaluate(&passing).unwrap(), RolloutState::InProgress);
        assert_eq!(rollout.current_step_index(), 1);
    }

    #[test]
    fn manual_gate_requires_approval() {
        let clock = ManualClock::shared();
        let (cur, cand) = versions();
        let rollout = Rollout::new(
            "manual",
            cur,
            cand,
            vec![
                RolloutStep::new("canary", 0.1, 0).with_manual_gate(),
                RolloutStep::new("full", 1.0, 0),
            ],
            vec![],
            clock.clone(),
        )
        .unwrap();
        rollout.start().unwrap();
        clock.advance_secs(1);

        let metrics_map = HashMap::new();
        assert_eq!(rollout.evaluate(&metrics_map).unwrap(), RolloutState::InProgress);
        assert_eq!(rollout.current_step_index(), 0);

        rollout.approve().unwrap();
        assert_eq!(rollout.evaluate(&metrics_map).unwrap(), RolloutState::InProgress);
        assert_eq!(rollout.current_step_index(), 1);
    }

    #[test]
    fn pause_resume_keeps_step_index() {
        let clock = ManualClock::shared();
        let rollout = canary(clock.clone());
        rollout.start().unwrap();
        rollout.pause().unwrap();
        assert_eq!(rollout.state(), RolloutState::Paused);
        assert_eq!(rollout.current_step_index(), 0);

        // Paused rollouts cannot advance.
        assert!(rollout.advance().is_err());

        rollout.resume().unwrap();
        assert_eq!(rollout.state(), RolloutState::InProgress);
        assert_eq!(rollout.current_step_index(), 0);
    }

    #[test]
    fn cancel_rolls_back_with_reason() {
        let clock = ManualClock::shared();
        let rollout = canary(clock);
        rollout.start().unwrap();
        rollout.cancel().unwrap();
        assert_eq!(rollout.state(), RolloutState::RolledBack);
        assert_eq!(rollout.rollback_reason().unwrap(), "cancelled");
    }

    #[test]
    fn from_spec_builds_equivalent_rollout() {
        use aegis_slo::spec::{RolloutStepSpec, ThresholdSpec};
        let clock = ManualClock::shared();
        let (cur, cand) = versions();
        let spec = RolloutSpec {
            strategy: "canary".to_string(),
            current: cur,
            candidate: cand,
            steps: vec![
                RolloutStepSpec {
                    name: "canary".to_string(),
                    weight: 0.05,
                    duration_seconds: 60,
                    analysis: vec![ThresholdSpec {
                        metric: "error_rate".to_string(),
                        threshold: 0.02,
                        comparator: Comparator::Lte,
                    }],
                    manual_gate: false,
                },
                RolloutStepSpec {
                    name: "full".to_string(),
                    weight: 1.0,
                    duration_seconds: 0,
                    analysis: vec![],
                    manual_gate: false,
                },
            ],
            rollback_conditions: vec![],
        };
        let rollout = Rollout::from_spec(&spec, clock).unwrap();
        assert_eq!(rollout.name(), "chat-agent-v2");
        assert_eq!(rollout.state(), RolloutState::Pending);
    }
}
