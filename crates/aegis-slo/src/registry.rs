//! Per-agent indicator registry.
//!
//! Keeps the SLI instances owned by each agent so telemetry sinks and
//! dashboards can route measurements by `(agent_id, indicator_name)`
//! without holding references into the SLO graph.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::indicator::{Sli, SliKind, SliSnapshot};

/// Registry of SLI instances keyed by agent.
#[derive(Debug, Default)]
pub struct SliRegistry {
    instances: DashMap<String, Vec<Arc<Sli>>>,
}

impl SliRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// Register an indicator instance for an agent.
    pub fn register(&self, agent_id: impl Into<String>, sli: Arc<Sli>) {
        let agent_id = agent_id.into();
        debug!(agent = %agent_id, indicator = %sli.name(), "indicator registered");
        self.instances.entry(agent_id).or_default().push(sli);
    }

    /// All indicator instances for an agent.
    pub fn instances(&self, agent_id: &str) -> Vec<Arc<Sli>> {
        self.instances
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Look up one indicator by agent and name.
    pub fn get(&self, agent_id: &str, name: &str) -> Option<Arc<Sli>> {
        self.instances
            .get(agent_id)?
            .value()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// Record a measurement against a named indicator. Returns false when
    /// the agent has no indicator with that name.
    pub fn record(&self, agent_id: &str, name: &str, value: f64) -> bool {
        match self.get(agent_id, name) {
            Some(sli) => {
                sli.record(value);
                true
            }
            None => false,
        }
    }

    /// Record a measurement against every indicator of the given kind
    /// discriminant owned by the agent. Returns the number of indicators
    /// updated.
    pub fn record_kind(&self, agent_id: &str, kind_matches: impl Fn(&SliKind) -> bool, value: f64) -> usize {
        let mut updated = 0;
        for sli in self.instances(agent_id) {
            if kind_matches(sli.kind()) {
                sli.record(value);
                updated += 1;
            }
        }
        updated
    }

    /// Snapshots of every indicator owned by an agent.
    pub fn collect_all(&self, agent_id: &str) -> Vec<SliSnapshot> {
        self.instances(agent_id)
            .iter()
            .map(|s| s.snapshot())
            .collect()
    }

    /// Registered agent ids.
    pub fn agent_ids(&self) -> Vec<String> {
        self.instances.iter().map(|e| e.key().clone()).collect()
    }
}
