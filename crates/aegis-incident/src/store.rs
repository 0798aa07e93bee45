//! Durable sinks for alerts and incident transitions.
//!
//! The core defines the interfaces only; real backends (time-series
//! databases, object stores) are adapter territory. In-memory
//! implementations back tests and single-process deployments.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aegis_core::error::Result;

use crate::alert::{Alert, AlertSeverity};
use crate::incident::IncidentState;

/// Query over a stored alert stream.
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    /// Restrict to one agent
    pub agent_id: Option<String>,
    /// Restrict to alerts at or above this severity rank
    pub min_severity: Option<AlertSeverity>,
    /// Restrict to a closed time range
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Append-only alert sink with range queries.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Append one delivered alert.
    async fn append(&self, alert: &Alert) -> Result<()>;

    /// Query stored alerts.
    async fn query(&self, query: AlertQuery) -> Result<Vec<Alert>>;
}

/// In-memory alert store.
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored alerts.
    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn append(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }

    async fn query(&self, query: AlertQuery) -> Result<Vec<Alert>> {
        let alerts = self.alerts.lock().unwrap();
        Ok(alerts
            .iter()
            .filter(|a| {
                query
                    .agent_id
                    .as_deref()
                    .map_or(true, |agent| a.agent_id == agent)
            })
            .filter(|a| {
                query
                    .min_severity
                    .map_or(true, |min| a.severity.rank() >= min.rank())
            })
            .filter(|a| {
                query
                    .range
                    .map_or(true, |(start, end)| a.timestamp >= start && a.timestamp <= end)
            })
            .cloned()
            .collect())
    }
}

/// Store that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAlertStore;

#[async_trait]
impl AlertStore for NoopAlertStore {
    async fn append(&self, _alert: &Alert) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _query: AlertQuery) -> Result<Vec<Alert>> {
        Ok(Vec::new())
    }
}

/// One incident state transition, the unit of incident persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentTransition {
    /// Incident id
    pub incident_id: Uuid,
    /// Previous state (None for the opening record)
    pub from: Option<IncidentState>,
    /// New state
    pub to: IncidentState,
    /// Transition time
    pub timestamp: DateTime<Utc>,
}

/// Append-only incident transition log; current state is reconstructed by
/// replaying transitions in order.
pub trait IncidentStore: Send + Sync {
    /// Append a transition.
    fn append(&self, transition: IncidentTransition);

    /// All transitions for an incident, in append order.
    fn transitions(&self, incident_id: Uuid) -> Vec<IncidentTransition>;

    /// Current state by replay; `None` when the incident is unknown.
    fn replay(&self, incident_id: Uuid) -> Option<IncidentState> {
        self.transitions(incident_id).last().map(|t| t.to)
    }
}

/// In-memory incident transition log.
#[derive(Debug, Default)]
pub struct MemoryIncidentStore {
    transitions: Mutex<Vec<IncidentTransition>>,
}

impl MemoryIncidentStore {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IncidentStore for MemoryIncidentStore {
    fn append(&self, transition: IncidentTransition) {
        self.transitions.lock().unwrap().push(transition);
    }

    fn transitions(&self, incident_id: Uuid) -> Vec<IncidentTransition> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.incident_id == incident_id)
            .cloned()
            .collect()
    }
}
