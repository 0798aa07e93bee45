//! Postmortem generation.
//!
//! A postmortem is a structured artifact derived from a resolved (or
//! still-open) incident: ordered timeline, distinct signal kinds, and
//! action items seeded from what the signals say went wrong, plus a
//! rendered markdown form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aegis_core::signal::SignalKind;

use crate::incident::{Incident, IncidentSeverity, TimelineEntry, TimelineEvent};

/// A follow-up action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    /// Action id
    pub id: Uuid,
    /// Short title
    pub title: String,
    /// What to do
    pub description: String,
    /// low / medium / high / critical
    pub priority: String,
}

impl ActionItem {
    fn new(title: &str, description: &str, priority: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: description.to_string(),
            priority: priority.to_string(),
        }
    }
}

/// A structured incident postmortem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Postmortem {
    /// Postmortem id
    pub id: Uuid,
    /// Incident this covers
    pub incident_id: Uuid,
    /// Title
    pub title: String,
    /// Incident severity
    pub severity: IncidentSeverity,
    /// Incident duration in seconds
    pub duration_secs: f64,
    /// Summary paragraph
    pub summary: String,
    /// Ordered copy of the incident timeline
    pub timeline: Vec<TimelineEntry>,
    /// Distinct signal kinds observed
    pub signal_kinds: Vec<SignalKind>,
    /// Automated responses that ran
    pub responses: Vec<String>,
    /// Recommended follow-ups
    pub action_items: Vec<ActionItem>,
    /// Generation time
    pub created_at: DateTime<Utc>,
}

impl Postmortem {
    /// Generate a postmortem from an incident.
    pub fn generate(incident: &Incident, now: DateTime<Utc>) -> Self {
        let signal_kinds = incident.signal_kinds();
        let duration_secs = incident.duration_secs(now);

        let summary = format!(
            "A {} incident affecting agent '{}' correlated {} signal(s) over {:.0}s. {}",
            incident.severity,
            incident.source_agent,
            incident.signals.len(),
            duration_secs,
            if incident.is_open() { "Ongoing." } else { "Resolved." }
        );

        let mut timeline = incident.timeline.clone();
        timeline.sort_by_key(|e| e.timestamp);

        Self {
            id: Uuid::new_v4(),
            incident_id: incident.id,
            title: format!("Postmortem: {}", incident.title),
            severity: incident.severity,
            duration_secs,
            summary,
            timeline,
            signal_kinds: signal_kinds.clone(),
            responses: incident.responses.clone(),
            action_items: seed_action_items(&signal_kinds),
            created_at: now,
        }
    }

    /// Render as markdown.
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            format!("# {}", self.title),
            String::new(),
            format!("**Incident:** {}", self.incident_id),
            format!("**Severity:** {}", self.severity),
            format!("**Duration:** {:.0}s", self.duration_secs),
            String::new(),
            "## Summary".to_string(),
            self.summary.clone(),
            String::new(),
        ];

        if !self.signal_kinds.is_empty() {
            lines.push("## Signals".to_string());
            for kind in &self.signal_kinds {
                lines.push(format!("- {kind}"));
            }
            lines.push(String::new());
        }

        if !self.timeline.is_empty() {
            lines.push("## Timeline".to_string());
            for entry in &self.timeline {
                let description = match &entry.event {
                    TimelineEvent::SignalAppended { signal } => {
                        format!("signal {} from '{}': {}", signal.kind, signal.source_agent, signal.message)
                    }
                    TimelineEvent::StateChanged { from, to } => {
                        format!("state {from} -> {to}")
                    }
                    TimelineEvent::ResponseTriggered { hook } => {
                        format!("automated response '{hook}'")
                    }
                };
                lines.push(format!(
                    "- {}: {description}",
                    entry.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                ));
            }
            lines.push(String::new());
        }

        lines.push("## Response".to_string());
        if self.responses.is_empty() {
            lines.push("No automated responses were triggered.".to_string());
        } else {
            lines.push(format!("Automated responses: {}", self.responses.join(", ")));
        }
        lines.push(String::new());

        if !self.action_items.is_empty() {
            lines.push("## Action Items".to_string());
            for item in &self.action_items {
                lines.push(format!(
                    "- [ ] **[{}]** {}: {}",
                    item.priority.to_uppercase(),
                    item.title,
                    item.description
                ));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

fn seed_action_items(kinds: &[SignalKind]) -> Vec<ActionItem> {
    let mut items = Vec::new();
    for kind in kinds {
        match kind {
            SignalKind::SloBreach => items.push(ActionItem::new(
                "Review SLO targets",
                "Evaluate whether current targets are realistic given observed performance.",
                "medium",
            )),
            SignalKind::ErrorBudgetExhausted => items.push(ActionItem::new(
                "Freeze deployments",
                "Halt rollouts for the affected agent until the error budget recovers.",
                "high",
            )),
            SignalKind::CostAnomaly => items.push(ActionItem::new(
                "Investigate cost spike",
                "Analyze task-level cost breakdowns to find the source of the anomaly.",
                "high",
            )),
            SignalKind::PolicyViolation => items.push(ActionItem::new(
                "Audit policy configuration",
                "Review policy rules and agent behavior for compliance gaps.",
                "critical",
            )),
            SignalKind::TrustRevocation => items.push(ActionItem::new(
                "Re-verify agent identity",
                "Confirm the revocation was intended and rotate credentials.",
                "critical",
            )),
            SignalKind::LatencySpike => items.push(ActionItem::new(
                "Profile slow paths",
                "Identify which tool or provider calls drove the latency spike.",
                "medium",
            )),
            SignalKind::ToolFailureSpike => items.push(ActionItem::new(
                "Check tool health",
                "Verify upstream tool availability and recent schema changes.",
                "high",
            )),
            SignalKind::CascadeFailure => items.push(ActionItem::new(
                "Review breaker thresholds",
                "Tune circuit-breaker settings to contain future cascades earlier.",
                "high",
            )),
        }
    }
    items.push(ActionItem::new(
        "Review monitoring coverage",
        "Ensure SLIs and alerts cover the failure mode seen in this incident.",
        "medium",
    ));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::signal::{Severity, Signal};

    fn incident() -> Incident {
        let now = Utc::now();
        let mut incident = Incident::open(
            Signal::new(
                SignalKind::SloBreach,
                "agent-a",
                Severity::Critical,
                "success rate below target",
                now,
            ),
            IncidentSeverity::P2,
            now,
        );
        incident.append_signal(
            Signal::new(
                SignalKind::CostAnomaly,
                "agent-a",
                Severity::Warn,
                "spend spike",
                now,
            ),
            IncidentSeverity::P3,
            now,
        );
        incident.record_response("notify_oncall", now);
        incident
    }

    #[test]
    fn generated_postmortem_covers_incident() {
        let incident = incident();
        let pm = Postmortem::generate(&incident, Utc::now());
        assert_eq!(pm.incident_id, incident.id);
        assert_eq!(pm.severity, IncidentSeverity::P2);
        assert_eq!(pm.signal_kinds.len(), 2);
        assert_eq!(pm.responses, vec!["notify_oncall".to_string()]);

        // Action items seeded from the observed signal kinds, plus the
        // standing monitoring-coverage item.
        assert!(pm.action_items.iter().any(|a| a.title.contains("SLO targets")));
        assert!(pm.action_items.iter().any(|a| a.title.contains("cost spike")));
        assert!(pm
            .action_items
            .iter()
            .any(|a| a.title.contains("monitoring coverage")));
    }

    #[test]
    fn markdown_rendering_is_structured() {
        let incident = incident();
        let pm = Postmortem::generate(&incident, Utc::now());
        let md = pm.to_markdown();
        assert!(md.starts_with("# Postmortem:"));
        assert!(md.contains("## Summary"));
        assert!(md.contains("## Timeline"));
        assert!(md.contains("## Action Items"));
        assert!(md.contains("slo_breach"));
    }

    #[test]
    fn timeline_is_time_ordered() {
        let incident = incident();
        let pm = Postmortem::generate(&incident, Utc::now());
        for pair in pm.timeline.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }
}
