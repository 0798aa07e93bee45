//! Incident detection: signal correlation, deduplication, and automated
//! response hooks.
//!
//! Ingestion is causally ordered by arrival. A signal whose dedup key
//! matches a still-open incident inside the correlation window is dropped.
//! Otherwise it either joins an open incident correlated by source agent or
//! shared dedup-key prefix, or opens a new one with severity derived from
//! its kind. Resolved incidents no longer correlate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use aegis_core::clock::SharedClock;
use aegis_core::error::{Error, Result};
use aegis_core::signal::{Severity, Signal, SignalKind};

use crate::incident::{Incident, IncidentSeverity};
use crate::postmortem::Postmortem;

/// Callback invoked with the incident after a signal lands on it.
pub type ResponseHook = Arc<dyn Fn(&Incident) + Send + Sync>;

/// Detector configuration.
#[derive(Debug, Clone)]
pub struct IncidentDetectorConfig {
    /// Sliding correlation window in seconds
    pub correlation_window_secs: u64,
}

impl Default for IncidentDetectorConfig {
    fn default() -> Self {
        Self {
            correlation_window_secs: 300,
        }
    }
}

/// Ingestion counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DetectorStats {
    /// Signals ingested
    pub signals_ingested: u64,
    /// Signals dropped as duplicates
    pub signals_deduplicated: u64,
    /// Incidents opened
    pub incidents_opened: u64,
}

/// Correlates reliability signals into incidents.
pub struct IncidentDetector {
    config: IncidentDetectorConfig,
    clock: SharedClock,
    incidents: Mutex<Vec<Incident>>,
    hooks: Mutex<HashMap<SignalKind, Vec<(String, ResponseHook)>>>,
    ingested: AtomicU64,
    deduplicated: AtomicU64,
    opened: AtomicU64,
}

impl std::fmt::Debug for IncidentDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentDetector")
            .field("config", &self.config)
            .field("incidents", &self.incidents.lock().unwrap().len())
            .finish()
    }
}

impl IncidentDetector {
    /// Create a detector.
    pub fn new(config: IncidentDetectorConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            incidents: Mutex::new(Vec::new()),
            hooks: Mutex::new(HashMap::new()),
            ingested: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
            opened: AtomicU64::new(0),
        }
    }

    /// Create a detector with the default 300s correlation window.
    pub fn with_defaults(clock: SharedClock) -> Self {
        Self::new(IncidentDetectorConfig::default(), clock)
    }

    /// Register a named automated response for a signal kind. The callback
    /// is resolved once at registration; ingestion only walks the table.
    pub fn register_response(
        &self,
        kind: SignalKind,
        name: impl Into<String>,
        hook: ResponseHook,
    ) {
        let name = name.into();
        debug!(%kind, hook = %name, "response hook registered");
        self.hooks
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push((name, hook));
    }

    /// Ingest a signal. Returns the affected incident (a snapshot), or
    /// `None` when the signal was suppressed as a duplicate.
    pub fn ingest_signal(&self, signal: Signal) -> Option<Incident> {
        let now = self.clock.now();
        self.ingested.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("aegis_signals_ingested_total").increment(1);

        let window = chrono::Duration::seconds(self.config.correlation_window_secs as i64);
        let derived = derive_severity(&signal);

        let snapshot = {
            let mut incidents = self.incidents.lock().unwrap();

            // Duplicate: identical dedup key on a still-open incident
            // within the correlation window.
            if let Some(key) = signal.dedup_key.as_deref() {
                let duplicate = incidents.iter().any(|incident| {
                    incident.is_open()
                        && now - incident.updated_at <= window
                        && incident
                            .signals
                            .iter()
                            .any(|s| s.dedup_key.as_deref() == Some(key))
                });
                if duplicate {
                    self.deduplicated.fetch_add(1, Ordering::Relaxed);
                    debug!(dedup_key = key, "signal suppressed as duplicate");
                    return None;
                }
            }

            // Correlate by source agent or shared dedup prefix.
            let prefix = signal.dedup_prefix().map(str::to_string);
            let correlated = incidents.iter_mut().find(|incident| {
                incident.is_open()
                    && now - incident.updated_at <= window
                    && (incident.source_agent == signal.source_agent
                        || prefix.as_deref().is_some_and(|p| {
                            incident
                                .signals
                                .iter()
                                .any(|s| s.dedup_prefix() == Some(p))
                        }))
            });

            match correlated {
                Some(incident) => {
                    incident.append_signal(signal.clone(), derived, now);
                    incident.clone()
                }
                None => {
                    let incident = Incident::open(signal.clone(), derived, now);
                    info!(
                        incident = %incident.id,
                        severity = %incident.severity,
                        agent = %incident.source_agent,
                        "incident opened"
                    );
                    self.opened.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("aegis_incidents_opened_total").increment(1);
                    incidents.push(incident.clone());
                    incident
                }
            }
        };

        self.run_hooks(&snapshot, signal.kind)
    }

    /// Execute hooks for the kind, then return the refreshed incident.
    fn run_hooks(&self, snapshot: &Incident, kind: SignalKind) -> Option<Incident> {
        let hooks: Vec<(String, ResponseHook)> = self
            .hooks
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        if hooks.is_empty() {
            return Some(snapshot.clone());
        }

        // Hooks run outside the incident lock; their effects are stamped
        // afterwards.
        for (name, hook) in &hooks {
            hook(snapshot);
            debug!(incident = %snapshot.id, hook = %name, "automated response executed");
        }

        let now = self.clock.now();
        let mut incidents = self.incidents.lock().unwrap();
        let incident = incidents.iter_mut().find(|i| i.id == snapshot.id)?;
        for (name, _) in &hooks {
            incident.record_response(name, now);
        }
        Some(incident.clone())
    }

    /// Snapshot of one incident.
    pub fn incident(&self, id: Uuid) -> Option<Incident> {
        self.incidents
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    /// Snapshots of all open incidents.
    pub fn open_incidents(&self) -> Vec<Incident> {
        self.incidents
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.is_open())
            .cloned()
            .collect()
    }

    /// Snapshots of every incident ever opened.
    pub fn all_incidents(&self) -> Vec<Incident> {
        self.incidents.lock().unwrap().clone()
    }

    /// Acknowledge an incident.
    pub fn acknowledge(&self, id: Uuid) -> Result<Incident> {
        self.with_incident(id, |incident, now| incident.acknowledge(now))
    }

    /// Move an incident to INVESTIGATING.
    pub fn investigate(&self, id: Uuid) -> Result<Incident> {
        self.with_incident(id, |incident, now| incident.investigate(now))
    }

    /// Move an incident to MITIGATED.
    pub fn mitigate(&self, id: Uuid) -> Result<Incident> {
        self.with_incident(id, |incident, now| incident.mitigate(now))
    }

    /// Resolve an incident, removing it from correlation.
    pub fn resolve(&self, id: Uuid) -> Result<Incident> {
        self.with_incident(id, |incident, now| incident.resolve(now))
    }

    /// Generate a postmortem for an incident.
    pub fn generate_postmortem(&self, id: Uuid) -> Result<Postmortem> {
        let incident = self
            .incident(id)
            .ok_or_else(|| Error::state(format!("no incident {id}")))?;
        Ok(Postmortem::generate(&incident, self.clock.now()))
    }

    /// Ingestion counters.
    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            signals_ingested: self.ingested.load(Ordering::Relaxed),
            signals_deduplicated: self.deduplicated.load(Ordering::Relaxed),
            incidents_opened: self.opened.load(Ordering::Relaxed),
        }
    }

    fn with_incident(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Incident, chrono::DateTime<chrono::Utc>) -> Result<()>,
    ) -> Result<Incident> {
        let now = self.clock.now();
        let mut incidents = self.incidents.lock().unwrap();
        let incident = incidents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| Error::state(format!("no incident {id}")))?;
        f(incident, now)?;
        Ok(incident.clone())
    }
}

/// Severity derived from a signal's kind (and magnitude, for cost
/// anomalies; safety classification for policy violations).
fn derive_severity(signal: &Signal) -> IncidentSeverity {
    match signal.kind {
        SignalKind::ErrorBudgetExhausted | SignalKind::TrustRevocation => IncidentSeverity::P1,
        SignalKind::CascadeFailure => IncidentSeverity::P1,
        SignalKind::SloBreach | SignalKind::ToolFailureSpike => IncidentSeverity::P2,
        SignalKind::CostAnomaly => {
            if signal.severity >= Severity::Critical {
                IncidentSeverity::P2
            } else {
                IncidentSeverity::P3
            }
        }
        SignalKind::PolicyViolation => {
            let safety = signal
                .metadata
                .get("safety_class")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if safety {
                IncidentSeverity::P1
            } else {
                IncidentSeverity::P2
            }
        }
        SignalKind::LatencySpike => IncidentSeverity::P3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::clock::ManualClock;
    use aegis_core::Clock;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    fn detector() -> (IncidentDetector, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        (IncidentDetector::with_defaults(clock.clone()), clock)
    }

    fn signal(kind: SignalKind, agent: &str, severity: Severity, now: chrono::DateTime<Utc>) -> Signal {
        Signal::new(kind, agent, severity, format!("{kind} on {agent}"), now)
    }

    #[test]
    fn correlation_scenario() {
        // Three signals from the same agent within the window fold into a
        // single incident; severity escalates to P1; a repeat with an
        // identical dedup key is suppressed.
        let (det, clock) = detector();
        let now = clock.now();

        let s1 = signal(SignalKind::SloBreach, "agent-a", Severity::Critical, now)
            .with_dedup_key("agent-a:slo:critical");
        let first = det.ingest_signal(s1.clone()).unwrap();
        assert_eq!(first.severity, IncidentSeverity::P2);

        clock.advance_secs(20);
        let s2 = signal(SignalKind::CostAnomaly, "agent-a", Severity::Warn, clock.now());
        let second = det.ingest_signal(s2).unwrap();
        assert_eq!(second.id, first.id);

        clock.advance_secs(20);
        let s3 = signal(
            SignalKind::PolicyViolation,
            "agent-a",
            Severity::Critical,
            clock.now(),
        )
        .with_metadata("safety_class", serde_json::json!(true));
        let third = det.ingest_signal(s3).unwrap();
        assert_eq!(third.id, first.id);
        assert_eq!(third.severity, IncidentSeverity::P1);
        assert_eq!(third.signals.len(), 3);

        // Identical dedup key within the window: suppressed.
        let repeat = signal(SignalKind::SloBreach, "agent-a", Severity::Critical, clock.now())
            .with_dedup_key("agent-a:slo:critical");
        assert!(det.ingest_signal(repeat).is_none());
        assert_eq!(det.stats().signals_deduplicated, 1);
        assert_eq!(det.stats().incidents_opened, 1);
    }

    #[test]
    fn different_agents_open_separate_incidents() {
        let (det, clock) = detector();
        let now = clock.now();
        det.ingest_signal(signal(SignalKind::SloBreach, "agent-a", Severity::Critical, now));
        det.ingest_signal(signal(SignalKind::SloBreach, "agent-b", Severity::Critical, now));
        assert_eq!(det.open_incidents().len(), 2);
    }

    #[test]
    fn signals_outside_window_open_new_incident() {
        let (det, clock) = detector();
        det.ingest_signal(signal(
            SignalKind::SloBreach,
            "agent-a",
            Severity::Critical,
            clock.now(),
        ));
        clock.advance_secs(301);
        det.ingest_signal(signal(
            SignalKind::SloBreach,
            "agent-a",
            Severity::Critical,
            clock.now(),
        ));
        assert_eq!(det.open_incidents().len(), 2);
    }

    #[test]
    fn resolved_incidents_do_not_correlate() {
        let (det, clock) = detector();
        let incident = det
            .ingest_signal(signal(
                SignalKind::SloBreach,
                "agent-a",
                Severity::Critical,
                clock.now(),
            ))
            .unwrap();
        det.resolve(incident.id).unwrap();

        let next = det
            .ingest_signal(signal(
                SignalKind::SloBreach,
                "agent-a",
                Severity::Critical,
                clock.now(),
            ))
            .unwrap();
        assert_ne!(next.id, incident.id);
    }

    #[test]
    fn dedup_prefix_correlates_across_status_changes() {
        let (det, clock) = detector();
        let first = det
            .ingest_signal(
                signal(SignalKind::SloBreach, "agent-a", Severity::Critical, clock.now())
                    .with_dedup_key("agent-a:chat-slo:critical"),
            )
            .unwrap();

        clock.advance_secs(30);
        // Same agent+slo, different status: shares the prefix.
        let second = det
            .ingest_signal(
                signal(
                    SignalKind::ErrorBudgetExhausted,
                    "agent-a",
                    Severity::Critical,
                    clock.now(),
                )
                .with_dedup_key("agent-a:chat-slo:exhausted"),
            )
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.severity, IncidentSeverity::P1);
    }

    #[test]
    fn severity_derivation() {
        let now = Utc::now();
        let cases = [
            (SignalKind::ErrorBudgetExhausted, Severity::Critical, IncidentSeverity::P1),
            (SignalKind::TrustRevocation, Severity::Warn, IncidentSeverity::P1),
            (SignalKind::SloBreach, Severity::Critical, IncidentSeverity::P2),
            (SignalKind::CostAnomaly, Severity::Critical, IncidentSeverity::P2),
            (SignalKind::CostAnomaly, Severity::Warn, IncidentSeverity::P3),
            (SignalKind::LatencySpike, Severity::Warn, IncidentSeverity::P3),
        ];
        for (kind, severity, expected) in cases {
            let s = signal(kind, "agent-a", severity, now);
            assert_eq!(derive_severity(&s), expected, "{kind}");
        }

        // Policy violations: P1 only when safety-class.
        let plain = signal(SignalKind::PolicyViolation, "agent-a", Severity::Warn, now);
        assert_eq!(derive_severity(&plain), IncidentSeverity::P2);
        let safety = plain.clone().with_metadata("safety_class", serde_json::json!(true));
        assert_eq!(derive_severity(&safety), IncidentSeverity::P1);
    }

    #[test]
    fn response_hooks_execute_and_stamp() {
        let (det, clock) = detector();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        det.register_response(
            SignalKind::SloBreach,
            "auto_rollback",
            Arc::new(move |_incident| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let incident = det
            .ingest_signal(signal(
                SignalKind::SloBreach,
                "agent-a",
                Severity::Critical,
                clock.now(),
            ))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(incident.responses, vec!["auto_rollback".to_string()]);

        // Hooks keyed on a different kind do not run.
        det.ingest_signal(signal(
            SignalKind::CostAnomaly,
            "agent-a",
            Severity::Warn,
            clock.now(),
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lifecycle_via_detector() {
        let (det, clock) = detector();
        let incident = det
            .ingest_signal(signal(
                SignalKind::SloBreach,
                "agent-a",
                Severity::Critical,
                clock.now(),
            ))
            .unwrap();
        det.acknowledge(incident.id).unwrap();
        det.investigate(incident.id).unwrap();
        det.mitigate(incident.id).unwrap();
        let resolved = det.resolve(incident.id).unwrap();
        assert!(!resolved.is_open());
        assert!(det.open_incidents().is_empty());

        // Unknown incident id is an error.
        assert!(det.acknowledge(Uuid::new_v4()).is_err());
    }
}
