//! Incident model and lifecycle.
//!
//! An incident owns a timeline of correlated signals and state changes.
//! Transitions are explicit and forward-only:
//! `OPEN -> ACKNOWLEDGED -> INVESTIGATING -> MITIGATED -> RESOLVED`
//! (resolve is allowed from any non-resolved state). Illegal transitions
//! fail with `InvalidState` and leave the incident unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aegis_core::error::{Error, Result};
use aegis_core::signal::{Signal, SignalKind};

/// Paging severity, P1 most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IncidentSeverity {
    /// Page immediately
    P1,
    /// Alert
    P2,
    /// Notify
    P3,
    /// Log only
    P4,
}

impl IncidentSeverity {
    /// The more severe of two severities (P1 beats P2).
    pub fn escalate(self, other: IncidentSeverity) -> IncidentSeverity {
        // Derived ordering puts P1 first, so "more severe" is the minimum.
        self.min(other)
    }
}

impl std::fmt::Display for IncidentSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
            Self::P4 => "P4",
        };
        write!(f, "{s}")
    }
}

/// Incident lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    /// Newly opened
    Open,
    /// A responder has acknowledged
    Acknowledged,
    /// Under active investigation
    Investigating,
    /// Impact contained
    Mitigated,
    /// Closed; excluded from correlation
    Resolved,
}

impl std::fmt::Display for IncidentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Investigating => "investigating",
            Self::Mitigated => "mitigated",
            Self::Resolved => "resolved",
        };
        write!(f, "{s}")
    }
}

/// What a timeline entry records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum TimelineEvent {
    /// A correlated signal was appended
    SignalAppended {
        /// The signal
        signal: Signal,
    },
    /// The incident changed state
    StateChanged {
        /// Previous state
        from: IncidentState,
        /// New state
        to: IncidentState,
    },
    /// An automated response hook ran
    ResponseTriggered {
        /// Hook name
        hook: String,
    },
}

/// A stamped timeline entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// What happened
    #[serde(flatten)]
    pub event: TimelineEvent,
}

/// A correlated cluster of signals with lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Incident id
    pub id: Uuid,
    /// Title derived from the opening signal
    pub title: String,
    /// Severity (escalates as signals arrive)
    pub severity: IncidentSeverity,
    /// Lifecycle state
    pub state: IncidentState,
    /// Agent the incident concerns
    pub source_agent: String,
    /// Correlated signals in arrival order
    pub signals: Vec<Signal>,
    /// Stamped timeline
    pub timeline: Vec<TimelineEntry>,
    /// Names of automated responses triggered
    pub responses: Vec<String>,
    /// Open time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Resolve time
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Open an incident from its first signal.
    pub fn open(signal: Signal, severity: IncidentSeverity, now: DateTime<Utc>) -> Self {
        let title = format!("{}: {}", signal.kind, signal.message);
        let source_agent = signal.source_agent.clone();
        let mut incident = Self {
            id: Uuid::new_v4(),
            title,
            severity,
            state: IncidentState::Open,
            source_agent,
            signals: Vec::new(),
            timeline: Vec::new(),
            responses: Vec::new(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };
        incident.append_signal(signal, severity, now);
        incident
    }

    /// Append a correlated signal, escalating severity as needed.
    pub fn append_signal(
        &mut self,
        signal: Signal,
        derived_severity: IncidentSeverity,
        now: DateTime<Utc>,
    ) {
        self.severity = self.severity.escalate(derived_severity);
        self.timeline.push(TimelineEntry {
            timestamp: now,
            event: TimelineEvent::SignalAppended {
                signal: signal.clone(),
            },
        });
        self.signals.push(signal);
        self.updated_at = now;
    }

    /// Record an automated response.
    pub fn record_response(&mut self, hook: &str, now: DateTime<Utc>) {
        self.responses.push(hook.to_string());
        self.timeline.push(TimelineEntry {
            timestamp: now,
            event: TimelineEvent::ResponseTriggered {
                hook: hook.to_string(),
            },
        });
        self.updated_at = now;
    }

    /// Acknowledge (from OPEN).
    pub fn acknowledge(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(IncidentState::Open, IncidentState::Acknowledged, now)
    }

    /// Begin investigating (from ACKNOWLEDGED).
    pub fn investigate(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(IncidentState::Acknowledged, IncidentState::Investigating, now)
    }

    /// Mark mitigated (from INVESTIGATING).
    pub fn mitigate(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(IncidentState::Investigating, IncidentState::Mitigated, now)
    }

    /// Resolve from any non-resolved state.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state == IncidentState::Resolved {
            return Err(Error::state(format!(
                "incident {} is already resolved",
                self.id
            )));
        }
        let from = self.state;
        self.state = IncidentState::Resolved;
        self.resolved_at = Some(now);
        self.stamp_state_change(from, IncidentState::Resolved, now);
        Ok(())
    }

    /// Whether the incident still participates in correlation.
    pub fn is_open(&self) -> bool {
        self.state != IncidentState::Resolved
    }

    /// Incident duration: to resolution, or to `now` while open.
    pub fn duration_secs(&self, now: DateTime<Utc>) -> f64 {
        let end = self.resolved_at.unwrap_or(now);
        (end - self.created_at).num_milliseconds().max(0) as f64 / 1_000.0
    }

    /// Distinct signal kinds on the timeline.
    pub fn signal_kinds(&self) -> Vec<SignalKind> {
        let mut kinds: Vec<SignalKind> = Vec::new();
        for signal in &self.signals {
            if !kinds.contains(&signal.kind) {
                kinds.push(signal.kind);
            }
        }
        kinds
    }

    fn transition(
        &mut self,
        expected: IncidentState,
        next: IncidentState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.state != expected {
            return Err(Error::state(format!(
                "incident {} cannot move {} -> {next} (currently {})",
                self.id, expected, self.state
            )));
        }
        self.state = next;
        self.stamp_state_change(expected, next, now);
        Ok(())
    }

    fn stamp_state_change(&mut self, from: IncidentState, to: IncidentState, now: DateTime<Utc>) {
        self.timeline.push(TimelineEntry {
            timestamp: now,
            event: TimelineEvent::StateChanged { from, to },
        });
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::signal::Severity;

    fn signal(kind: SignalKind) -> Signal {
        Signal::new(kind, "agent-a", Severity::Critical, "test", Utc::now())
    }

    #[test]
    fn severity_escalation_picks_more_severe() {
        assert_eq!(IncidentSeverity::P2.escalate(IncidentSeverity::P1), IncidentSeverity::P1);
        assert_eq!(IncidentSeverity::P1.escalate(IncidentSeverity::P3), IncidentSeverity::P1);
        assert_eq!(IncidentSeverity::P3.escalate(IncidentSeverity::P2), IncidentSeverity::P2);
    }

    #[test]
    fn lifecycle_happy_path_stamps_timeline() {
        let now = Utc::now();
        let mut incident = Incident::open(signal(SignalKind::SloBreach), IncidentSeverity::P2, now);
        incident.acknowledge(now).unwrap();
        incident.investigate(now).unwrap();
        incident.mitigate(now).unwrap();
        incident.resolve(now).unwrap();
        assert_eq!(incident.state, IncidentState::Resolved);
        assert!(incident.resolved_at.is_some());

        let state_changes = incident
            .timeline
            .iter()
            .filter(|e| matches!(e.event, TimelineEvent::StateChanged { .. }))
            .count();
        assert_eq!(state_changes, 4);
    }

    #[test]
    fn illegal_transitions_leave_state_unchanged() {
        let now = Utc::now();
        let mut incident = Incident::open(signal(SignalKind::SloBreach), IncidentSeverity::P2, now);

        // Cannot investigate before acknowledging.
        assert!(incident.investigate(now).is_err());
        assert_eq!(incident.state, IncidentState::Open);

        incident.resolve(now).unwrap();
        assert!(incident.acknowledge(now).is_err());
        assert!(incident.resolve(now).is_err());
        assert_eq!(incident.state, IncidentState::Resolved);
    }

    #[test]
    fn appending_signals_escalates_severity() {
        let now = Utc::now();
        let mut incident = Incident::open(signal(SignalKind::SloBreach), IncidentSeverity::P2, now);
        incident.append_signal(
            signal(SignalKind::ErrorBudgetExhausted),
            IncidentSeverity::P1,
            now,
        );
        assert_eq!(incident.severity, IncidentSeverity::P1);
        assert_eq!(incident.signals.len(), 2);
        assert_eq!(incident.signal_kinds().len(), 2);
    }

    #[test]
    fn incident_serde_round_trip() {
        let now = Utc::now();
        let incident = Incident::open(signal(SignalKind::CostAnomaly), IncidentSeverity::P3, now);
        let json = serde_json::to_string(&incident).unwrap();
        let back: Incident = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, incident.id);
        assert_eq!(back.state, IncidentState::Open);
        assert_eq!(back.signals.len(), 1);
    }
}
