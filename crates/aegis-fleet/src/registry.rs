//! Fleet registry and health aggregation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use aegis_core::clock::SharedClock;
use aegis_slo::objective::{Slo, SloStatus};

/// Per-agent health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealthState {
    /// Fresh heartbeat, success rate at or above threshold
    Healthy,
    /// Reporting, but success rate below threshold
    Degraded,
    /// No heartbeat within the timeout
    Unresponsive,
    /// Scheduled for removal; excluded from degradation accounting
    Draining,
}

/// Fleet configuration.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Heartbeat staleness threshold (secs)
    pub heartbeat_timeout_secs: u64,
    /// Success rate below which an agent is degraded
    pub success_rate_threshold: f64,
    /// Event window for recent counters (secs)
    pub event_window_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 300,
            success_rate_threshold: 0.9,
            event_window_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone)]
struct AgentEvent {
    timestamp: DateTime<Utc>,
    success: bool,
    latency_ms: f64,
    cost_usd: f64,
}

#[derive(Debug)]
struct AgentRecord {
    tags: BTreeMap<String, String>,
    registered_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    draining: bool,
    events: VecDeque<AgentEvent>,
    slo: Option<Arc<Slo>>,
}

/// Per-agent health report.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    /// Agent id
    pub agent_id: String,
    /// Health classification
    pub state: AgentHealthState,
    /// Success rate over the event window, when events exist
    pub success_rate: Option<f64>,
    /// Mean latency over the event window
    pub avg_latency_ms: Option<f64>,
    /// Total cost over the event window
    pub window_cost_usd: f64,
    /// Events in the window
    pub event_count: usize,
    /// Seconds since registration
    pub uptime_secs: f64,
    /// Tags
    pub tags: BTreeMap<String, String>,
    /// Status of the attached SLO, when present
    pub slo_status: Option<SloStatus>,
}

/// Per-tag-value rollup inside a fleet status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagRollup {
    /// Agents carrying the tag
    pub total: usize,
    /// Healthy among them
    pub healthy: usize,
    /// Degraded among them
    pub degraded: usize,
    /// Unresponsive among them
    pub unresponsive: usize,
}

/// Aggregate fleet snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    /// Registered agents
    pub total_agents: usize,
    /// Healthy count
    pub healthy: usize,
    /// Degraded count
    pub degraded: usize,
    /// Unresponsive count
    pub unresponsive: usize,
    /// Draining count
    pub draining: usize,
    /// Fleet-wide success rate over the window
    pub fleet_success_rate: Option<f64>,
    /// Fleet-wide mean latency over the window
    pub fleet_avg_latency_ms: Option<f64>,
    /// Fleet-wide cost over the window
    pub fleet_window_cost_usd: f64,
    /// Rollup per `key=value` tag
    pub by_tag: BTreeMap<String, TagRollup>,
    /// Per-agent reports
    pub agents: Vec<AgentHealth>,
}

/// Central agent registry and health aggregator.
#[derive(Debug)]
pub struct FleetManager {
    config: FleetConfig,
    clock: SharedClock,
    agents: DashMap<String, AgentRecord>,
}

impl FleetManager {
    /// Create a fleet manager.
    pub fn new(config: FleetConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            agents: DashMap::new(),
        }
    }

    /// Create a fleet manager with default thresholds.
    pub fn with_defaults(clock: SharedClock) -> Self {
        Self::new(FleetConfig::default(), clock)
    }

    /// Register an agent, optionally with tags and an SLO reference.
    /// Re-registering replaces the previous record.
    pub fn register(
        &self,
        agent_id: impl Into<String>,
        tags: Option<BTreeMap<String, String>>,
        slo: Option<Arc<Slo>>,
    ) {
        let agent_id = agent_id.into();
        let now = self.clock.now();
        info!(agent = %agent_id, "agent registered");
        metrics::gauge!("aegis_fleet_agents").increment(1.0);
        self.agents.insert(
            agent_id,
            AgentRecord {
                tags: tags.unwrap_or_default(),
                registered_at: now,
                last_heartbeat: now,
                draining: false,
                events: VecDeque::new(),
                slo,
            },
        );
    }

    /// Remove an agent. Returns false when unknown.
    pub fn deregister(&self, agent_id: &str) -> bool {
        let removed = self.agents.remove(agent_id).is_some();
        if removed {
            metrics::gauge!("aegis_fleet_agents").decrement(1.0);
        }
        removed
    }

    /// Stamp a heartbeat. Returns false when the agent is unknown.
    pub fn heartbeat(&self, agent_id: &str) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(mut record) => {
                record.last_heartbeat = self.clock.now();
                true
            }
            None => false,
        }
    }

    /// Record a task event. Feeds the attached SLO's error budget when one
    /// is present. Returns false when the agent is unknown.
    pub fn record_event(
        &self,
        agent_id: &str,
        success: bool,
        latency_ms: Option<f64>,
        cost_usd: Option<f64>,
    ) -> bool {
        let now = self.clock.now();
        let slo = match self.agents.get_mut(agent_id) {
            Some(mut record) => {
                record.events.push_back(AgentEvent {
                    timestamp: now,
                    success,
                    latency_ms: latency_ms.unwrap_or(0.0),
                    cost_usd: cost_usd.unwrap_or(0.0),
                });
                let cutoff = now - chrono::Duration::seconds(self.config.event_window_secs as i64);
                while let Some(front) = record.events.front() {
                    if front.timestamp < cutoff {
                        record.events.pop_front();
                    } else {
                        break;
                    }
                }
                debug!(agent = agent_id, success, "fleet event recorded");
                record.slo.clone()
            }
            None => return false,
        };
        // The SLO records outside the map entry lock.
        if let Some(slo) = slo {
            slo.record_event(success);
        }
        true
    }

    /// Mark an agent as draining. Returns false when unknown.
    pub fn drain(&self, agent_id: &str) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(mut record) => {
                record.draining = true;
                true
            }
            None => false,
        }
    }

    /// Health report for one agent.
    pub fn agent_health(&self, agent_id: &str) -> Option<AgentHealth> {
        let record = self.agents.get(agent_id)?;
        Some(self.health_of(agent_id, record.value()))
    }

    /// Registered agent ids.
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    /// Agents matching a tag key-value pair.
    pub fn agents_by_tag(&self, key: &str, value: &str) -> Vec<String> {
        self.agents
            .iter()
            .filter(|e| e.value().tags.get(key).map(String::as_str) == Some(value))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Top-N agents by cost over the event window.
    pub fn top_cost_agents(&self, n: usize) -> Vec<(String, f64)> {
        let mut costs: Vec<(String, f64)> = self
            .agents
            .iter()
            .map(|e| {
                let total = e.value().events.iter().map(|ev| ev.cost_usd).sum();
                (e.key().clone(), total)
            })
            .collect();
        costs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        costs.truncate(n);
        costs
    }

    /// Aggregate fleet status with per-tag rollups.
    pub fn status(&self) -> FleetStatus {
        let mut agents: Vec<AgentHealth> = Vec::new();
        let mut healthy = 0;
        let mut degraded = 0;
        let mut unresponsive = 0;
        let mut draining = 0;
        let mut events_total = 0usize;
        let mut successes = 0usize;
        let mut latency_sum = 0.0;
        let mut cost_sum = 0.0;
        let mut by_tag: BTreeMap<String, TagRollup> = BTreeMap::new();

        for entry in self.agents.iter() {
            let health = self.health_of(entry.key(), entry.value());
            match health.state {
                AgentHealthState::Healthy => healthy += 1,
                AgentHealthState::Degraded => degraded += 1,
                AgentHealthState::Unresponsive => unresponsive += 1,
                AgentHealthState::Draining => draining += 1,
            }
            for event in &entry.value().events {
                events_total += 1;
                if event.success {
                    successes += 1;
                }
                latency_sum += event.latency_ms;
                cost_sum += event.cost_usd;
            }
            for (key, value) in &health.tags {
                let rollup = by_tag.entry(format!("{key}={value}")).or_default();
                rollup.total += 1;
                match health.state {
                    AgentHealthState::Healthy => rollup.healthy += 1,
                    AgentHealthState::Degraded => rollup.degraded += 1,
                    AgentHealthState::Unresponsive => rollup.unresponsive += 1,
                    AgentHealthState::Draining => {}
                }
            }
            agents.push(health);
        }

        FleetStatus {
            total_agents: agents.len(),
            healthy,
            degraded,
            unresponsive,
            draining,
            fleet_success_rate: if events_total > 0 {
                Some(successes as f64 / events_total as f64)
            } else {
                None
            },
            fleet_avg_latency_ms: if events_total > 0 {
                Some(latency_sum / events_total as f64)
            } else {
                None
            },
            fleet_window_cost_usd: cost_sum,
            by_tag,
            agents,
        }
    }

    fn health_of(&self, agent_id: &str, record: &AgentRecord) -> AgentHealth {
        let now = self.clock.now();
        let cutoff = now - chrono::Duration::seconds(self.config.event_window_secs as i64);
        let live: Vec<&AgentEvent> = record
            .events
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .collect();

        let success_rate = if live.is_empty() {
            None
        } else {
            Some(live.iter().filter(|e| e.success).count() as f64 / live.len() as f64)
        };
        let avg_latency_ms = if live.is_empty() {
            None
        } else {
            Some(live.iter().map(|e| e.latency_ms).sum::<f64>() / live.len() as f64)
        };
        let window_cost_usd = live.iter().map(|e| e.cost_usd).sum();

        let heartbeat_fresh = (now - record.last_heartbeat).num_seconds()
            < self.config.heartbeat_timeout_secs as i64;
        let state = if record.draining {
            AgentHealthState::Draining
        } else if !heartbeat_fresh {
            AgentHealthState::Unresponsive
        } else if success_rate.is_some_and(|r| r < self.config.success_rate_threshold) {
            AgentHealthState::Degraded
        } else {
            AgentHealthState::Healthy
        };

        AgentHealth {
            agent_id: agent_id.to_string(),
            state,
            success_rate,
            avg_latency_ms,
            window_cost_usd,
            event_count: live.len(),
            uptime_secs: (now - record.registered_at).num_milliseconds().max(0) as f64 / 1_000.0,
            tags: record.tags.clone(),
            slo_status: record.slo.as_ref().map(|slo| slo.evaluate()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::bus::SignalBus;
    use aegis_core::clock::ManualClock;
    use aegis_slo::indicator::Sli;

    fn fleet() -> (FleetManager, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        (FleetManager::with_defaults(clock.clone()), clock)
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn fresh_agent_is_healthy() {
        let (fleet, _) = fleet();
        fleet.register("agent-a", None, None);
        let health = fleet.agent_health("agent-a").unwrap();
        assert_eq!(health.state, AgentHealthState::Healthy);
        assert_eq!(health.success_rate, None);
    }

    #[test]
    fn stale_heartbeat_is_unresponsive() {
        let (fleet, clock) = fleet();
        fleet.register("agent-a", None, None);
        clock.advance_secs(301);
        assert_eq!(
            fleet.agent_health("agent-a").unwrap().state,
            AgentHealthState::Unresponsive
        );

        // A heartbeat restores health.
        assert!(fleet.heartbeat("agent-a"));
        assert_eq!(
            fleet.agent_health("agent-a").unwrap().state,
            AgentHealthState::Healthy
        );
    }

    #[test]
    fn low_success_rate_is_degraded() {
        let (fleet, _) = fleet();
        fleet.register("agent-a", None, None);
        for i in 0..10 {
            fleet.record_event("agent-a", i % 2 == 0, Some(100.0), Some(0.01));
        }
        let health = fleet.agent_health("agent-a").unwrap();
        assert_eq!(health.state, AgentHealthState::Degraded);
        assert_eq!(health.success_rate, Some(0.5));
        assert_eq!(health.event_count, 10);
    }

    #[test]
    fn unknown_agent_operations_return_false() {
        let (fleet, _) = fleet();
        assert!(!fleet.heartbeat("ghost"));
        assert!(!fleet.record_event("ghost", true, None, None));
        assert!(!fleet.drain("ghost"));
        assert!(fleet.agent_health("ghost").is_none());
    }

    #[test]
    fn status_aggregates_and_rolls_up_tags() {
        let (fleet, clock) = fleet();
        fleet.register("a", Some(tags(&[("team", "search")])), None);
        fleet.register("b", Some(tags(&[("team", "search")])), None);
        fleet.register("c", Some(tags(&[("team", "support")])), None);

        for _ in 0..10 {
            fleet.record_event("a", true, Some(100.0), Some(0.02));
            fleet.record_event("b", false, Some(200.0), Some(0.04));
        }
        clock.advance_secs(1);

        let status = fleet.status();
        assert_eq!(status.total_agents, 3);
        assert_eq!(status.degraded, 1);
        assert_eq!(status.fleet_success_rate, Some(0.5));
        assert!((status.fleet_window_cost_usd - 0.6).abs() < 1e-9);

        let search = status.by_tag.get("team=search").unwrap();
        assert_eq!(search.total, 2);
        assert_eq!(search.degraded, 1);
    }

    #[test]
    fn draining_agents_are_counted_separately() {
        let (fleet, _) = fleet();
        fleet.register("a", None, None);
        fleet.drain("a");
        let status = fleet.status();
        assert_eq!(status.draining, 1);
        assert_eq!(status.healthy, 0);
    }

    #[test]
    fn events_expire_from_window() {
        let (fleet, clock) = fleet();
        fleet.register("a", None, None);
        fleet.record_event("a", false, Some(100.0), Some(0.01));
        clock.advance_secs(3_601);
        fleet.heartbeat("a");
        let health = fleet.agent_health("a").unwrap();
        assert_eq!(health.event_count, 0);
        assert_eq!(health.state, AgentHealthState::Healthy);
    }

    #[test]
    fn top_cost_agents_sorted() {
        let (fleet, _) = fleet();
        fleet.register("cheap", None, None);
        fleet.register("pricey", None, None);
        fleet.record_event("cheap", true, None, Some(0.01));
        fleet.record_event("pricey", true, None, Some(2.50));

        let top = fleet.top_cost_agents(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, "pricey");
    }

    #[test]
    fn attached_slo_receives_events() {
        let clock = ManualClock::shared();
        let bus = Arc::new(SignalBus::default());
        let sli = Arc::new(Sli::task_success_rate(clock.clone()));
        let slo = Arc::new(
            Slo::new("agent-slo", "a", vec![sli], None, bus, clock.clone()).unwrap(),
        );
        let fleet = FleetManager::with_defaults(clock.clone());
        fleet.register("a", None, Some(slo.clone()));

        fleet.record_event("a", false, None, None);
        fleet.record_event("a", true, None, None);
        assert!(slo.budget().consumed() >= 0.0);
        let health = fleet.agent_health("a").unwrap();
        assert!(health.slo_status.is_some());
    }
}
